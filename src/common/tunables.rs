//! Tunable runtime constants.

use std::path::Path;

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use super::config::{self, ConfigError};

/// Which hit resolver turns a contact into a texture coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitResolverBackend {
    Cpu,
    #[default]
    Gpu,
}

/// Storage format for vertex attributes uploaded to the compute device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VertexPrecision {
    #[default]
    Full,
    Half,
}

#[derive(Resource, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tunables {
    /// Fixed simulation rate.
    pub fixed_hz: f64,
    pub gravity: f32,
    /// Radius of the swept sphere used for continuous collision checks.
    pub projectile_radius: f32,
    /// Extra sweep distance beyond one step of travel.
    pub skin_width: f32,
    /// UV probe rays start this far outside the surface.
    pub probe_offset: f32,
    /// UV probe rays stop this far past their origin.
    pub probe_length: f32,
    pub gpu_max_distance: f32,
    pub hit_resolver: HitResolverBackend,
    pub vertex_precision: VertexPrecision,
    pub effect_lifetime_secs: f32,
    pub effect_prewarm: usize,
    pub default_bullet_pool_size: usize,
    pub rng_seed: u64,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            fixed_hz: 64.0,
            gravity: -9.81,
            projectile_radius: 0.025,
            skin_width: 0.01,
            probe_offset: 0.01,
            probe_length: 0.02,
            gpu_max_distance: 10.0,
            hit_resolver: HitResolverBackend::Gpu,
            vertex_precision: VertexPrecision::Full,
            effect_lifetime_secs: 5.0,
            effect_prewarm: 10,
            default_bullet_pool_size: 10,
            rng_seed: 0x5eed,
        }
    }
}

impl Tunables {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let tunables: Self = config::from_json_str(text)?;
        tunables.validate()?;
        Ok(tunables)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let tunables: Self = config::from_json_file(path)?;
        tunables.validate()?;
        Ok(tunables)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.fixed_hz > 0.0) {
            return Err(ConfigError::Invalid {
                field: "fixed_hz",
                reason: format!("must be positive, got {}", self.fixed_hz),
            });
        }
        if self.probe_length <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "probe_length",
                reason: format!("must be positive, got {}", self.probe_length),
            });
        }
        if self.effect_lifetime_secs < 0.0 {
            return Err(ConfigError::Invalid {
                field: "effect_lifetime_secs",
                reason: "must not be negative".into(),
            });
        }
        Ok(())
    }

    #[inline]
    pub fn probe_max_distance(&self) -> f32 {
        self.probe_offset + self.probe_length
    }
}
