//! Surface database: surface ID → impact assets.

use std::fmt;
use std::path::Path;

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::common::config::{self, ConfigError};

/// Name of an authored impact asset (effect, decal or sound template).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetKey(pub String);

impl AssetKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AssetKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceEntry {
    pub surface_id: u8,
    pub name: String,
    pub effect: Option<AssetKey>,
    pub decal: Option<AssetKey>,
    pub sound: Option<AssetKey>,
    pub scale_multiplier: f32,
}

impl Default for SurfaceEntry {
    fn default() -> Self {
        Self {
            surface_id: 0,
            name: String::new(),
            effect: None,
            decal: None,
            sound: None,
            scale_multiplier: 1.0,
        }
    }
}

impl SurfaceEntry {
    pub fn new(surface_id: u8, name: impl Into<String>) -> Self {
        Self {
            surface_id,
            name: name.into(),
            ..default()
        }
    }

    pub fn with_effect(mut self, key: impl Into<AssetKey>) -> Self {
        self.effect = Some(key.into());
        self
    }

    pub fn with_decal(mut self, key: impl Into<AssetKey>) -> Self {
        self.decal = Some(key.into());
        self
    }

    pub fn with_sound(mut self, key: impl Into<AssetKey>) -> Self {
        self.sound = Some(key.into());
        self
    }

    pub fn with_scale(mut self, scale_multiplier: f32) -> Self {
        self.scale_multiplier = scale_multiplier;
        self
    }
}

/// Ordered surface table plus the entry used when no ID matches.
///
/// Inserted as a resource before startup, it is handed to the dispatcher by
/// `core::initialize`.
#[derive(Resource, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceDatabase {
    pub entries: Vec<SurfaceEntry>,
    pub default_entry: SurfaceEntry,
}

impl SurfaceDatabase {
    pub fn new(entries: Vec<SurfaceEntry>, default_entry: SurfaceEntry) -> Self {
        Self { entries, default_entry }
    }

    /// First entry whose ID matches exactly, in table order; otherwise the default.
    pub fn resolve_surface(&self, surface_id: u8) -> &SurfaceEntry {
        self.entries
            .iter()
            .find(|entry| entry.surface_id == surface_id)
            .unwrap_or(&self.default_entry)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let database: Self = config::from_json_str(text)?;
        database.validate()?;
        Ok(database)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let database: Self = config::from_json_file(path)?;
        database.validate()?;
        Ok(database)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for entry in self.entries.iter().chain(std::iter::once(&self.default_entry)) {
            if !entry.scale_multiplier.is_finite() || entry.scale_multiplier < 0.0 {
                return Err(ConfigError::Invalid {
                    field: "scale_multiplier",
                    reason: format!("surface `{}` has {}", entry.name, entry.scale_multiplier),
                });
            }
        }
        Ok(())
    }
}
