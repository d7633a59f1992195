use std::sync::Arc;

use bevy::prelude::*;

use super::template::{BulletTemplate, BulletTemplateId};

#[derive(Component)]
pub struct PooledProjectile;

/// `Idle` (in its pool) → `InFlight` → `Retiring` → `Idle`.
///
/// A ricochet is not a separate stored state: the bounce is applied inside the hit
/// step and the projectile stays `InFlight`.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProjectileState {
    #[default]
    Idle,
    InFlight,
    Retiring,
}

/// Non-owning back-reference to the pool that holds this projectile.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolLink(pub BulletTemplateId);

#[derive(Component, Debug, Clone)]
pub struct Projectile {
    pub template: Arc<BulletTemplate>,
    pub damage_multiplier: f32,
    pub ricochet_count: u32,
    /// Set once a hit has been taken this fixed step; later reports are dropped.
    pub hit_this_step: bool,
    /// Velocity at the start of the current fixed step.
    pub step_velocity: Vec3,
}

impl Projectile {
    pub fn new(template: Arc<BulletTemplate>) -> Self {
        Self {
            template,
            damage_multiplier: 1.0,
            ricochet_count: 0,
            hit_this_step: false,
            step_velocity: Vec3::ZERO,
        }
    }

    #[inline]
    pub fn reset_for_launch(&mut self, damage_multiplier: f32) {
        self.damage_multiplier = damage_multiplier;
        self.ricochet_count = 0;
        self.hit_this_step = false;
    }

    /// Damage of a direct or splash hit at the current multiplier.
    #[inline]
    pub fn hit_damage(&self) -> i32 {
        (self.template.damage as f32 * self.damage_multiplier) as i32
    }
}

/// Damage receiver.
#[derive(Component, Debug, Clone)]
pub struct Health {
    pub hp: i32,
}

impl Health {
    pub fn new(hp: i32) -> Self {
        Self { hp }
    }

    #[inline]
    pub fn apply_damage(&mut self, amount: i32) {
        self.hp -= amount;
    }

    #[inline]
    pub fn is_dead(&self) -> bool {
        self.hp <= 0
    }
}

/// Written for every damage application, direct or splash.
#[derive(Message, Debug, Clone, Copy, PartialEq, Eq)]
pub struct DamageApplied {
    pub target: Entity,
    pub amount: i32,
    pub source: Entity,
}
