//! Authored bullet data. Read-only once registered.

use std::path::Path;
use std::sync::Arc;

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::common::config::{self, ConfigError};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RicochetSettings {
    /// Base probability of a ricochet, `0..=1`.
    pub chance: f32,
    /// Multiplier applied to `chance` per bounce already taken.
    pub chance_falloff: f32,
    /// Smallest angle between the reversed travel direction and the normal that may bounce.
    pub min_angle_deg: f32,
    /// Damage multiplier applied per bounce.
    pub damage_multiplier: f32,
    /// Optional hard cap on bounces. Probability decay applies either way.
    pub max_ricochets: Option<u32>,
}

impl Default for RicochetSettings {
    fn default() -> Self {
        Self {
            chance: 0.3,
            chance_falloff: 0.5,
            min_angle_deg: 20.0,
            damage_multiplier: 0.7,
            max_ricochets: None,
        }
    }
}

impl RicochetSettings {
    pub fn disabled() -> Self {
        Self {
            chance: 0.0,
            ..default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulletTemplate {
    pub name: String,
    /// Metres per second.
    pub speed: f32,
    /// Maximum deviation per axis, in degrees.
    pub spread_deg: f32,
    pub lifetime_secs: f32,
    pub damage: i32,
    /// Uniform scale of the projectile body.
    pub size: f32,
    pub mass: f32,
    pub explosion_radius: f32,
    pub explosion_force: f32,
    pub ricochet: RicochetSettings,
}

impl Default for BulletTemplate {
    fn default() -> Self {
        Self {
            name: "bullet".into(),
            speed: 100.0,
            spread_deg: 0.0,
            lifetime_secs: 2.0,
            damage: 10,
            size: 1.0,
            mass: 0.01,
            explosion_radius: 0.0,
            explosion_force: 0.0,
            ricochet: RicochetSettings::default(),
        }
    }
}

impl BulletTemplate {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [("speed", self.speed), ("size", self.size), ("mass", self.mass)];
        for (field, value) in positive {
            if !(value > 0.0) {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("`{}` needs a positive value, got {value}", self.name),
                });
            }
        }
        if self.lifetime_secs < 0.0 || self.explosion_radius < 0.0 {
            return Err(ConfigError::Invalid {
                field: "lifetime_secs",
                reason: format!("`{}` has a negative lifetime or explosion radius", self.name),
            });
        }
        let r = &self.ricochet;
        if !(0.0..=1.0).contains(&r.chance) || !(0.0..=1.0).contains(&r.chance_falloff) {
            return Err(ConfigError::Invalid {
                field: "ricochet",
                reason: format!("`{}` chance and falloff must be within 0..=1", self.name),
            });
        }
        Ok(())
    }
}

/// Index of a template in the `BulletLibrary`. Also names its pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BulletTemplateId(pub u32);

#[derive(Resource, Debug, Default, Clone)]
pub struct BulletLibrary {
    templates: Vec<Arc<BulletTemplate>>,
}

impl BulletLibrary {
    pub fn register(&mut self, template: BulletTemplate) -> BulletTemplateId {
        let id = BulletTemplateId(self.templates.len() as u32);
        self.templates.push(Arc::new(template));
        id
    }

    pub fn get(&self, id: BulletTemplateId) -> Option<&Arc<BulletTemplate>> {
        self.templates.get(id.0 as usize)
    }

    pub fn find(&self, name: &str) -> Option<BulletTemplateId> {
        self.templates
            .iter()
            .position(|t| t.name == name)
            .map(|i| BulletTemplateId(i as u32))
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Build a library from a JSON array of templates.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let templates: Vec<BulletTemplate> = config::from_json_str(text)?;
        Self::from_templates(templates)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let templates: Vec<BulletTemplate> = config::from_json_file(path)?;
        Self::from_templates(templates)
    }

    fn from_templates(templates: Vec<BulletTemplate>) -> Result<Self, ConfigError> {
        let mut library = Self::default();
        for template in templates {
            template.validate()?;
            library.register(template);
        }
        Ok(library)
    }
}
