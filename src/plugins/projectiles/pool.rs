//! Bullet pools: one `Pool<Entity>` per bullet template.
//!
//! Pooled bodies keep all physics components for their whole life. Inactive ones
//! collide with nothing (empty filters), ignore gravity and sit hidden, so
//! activation and return are value writes only.

use std::sync::Arc;

use avian3d::prelude::*;
use bevy::log::error_once;
use bevy::platform::collections::HashMap;
use bevy::prelude::*;

use super::components::{PoolLink, PooledProjectile, Projectile, ProjectileState};
use super::template::{BulletLibrary, BulletTemplate, BulletTemplateId};
use crate::common::layers::inactive_projectile_layers;
use crate::common::tunables::Tunables;
use crate::plugins::pooling::Pool;

#[derive(Resource, Debug, Default)]
pub struct BulletPools {
    pools: HashMap<BulletTemplateId, Pool<Entity>>,
    initialized: bool,
    collider_radius: f32,
}

impl BulletPools {
    /// Start the subsystem. A second call is ignored with a warning.
    pub fn initialize(&mut self, tunables: &Tunables) -> bool {
        if self.initialized {
            warn!("bullet pools already initialized; ignoring");
            return false;
        }
        self.collider_radius = tunables.projectile_radius;
        self.initialized = true;
        info!("bullet pools initialized");
        true
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn pool(&self, template: BulletTemplateId) -> Option<&Pool<Entity>> {
        self.pools.get(&template)
    }

    pub fn active_len(&self) -> usize {
        self.pools.values().map(Pool::active_len).sum()
    }

    /// Take a projectile from the template's pool, creating the pool (prewarmed to
    /// `desired_pool_size`) on first use. `None` only for an unknown template.
    ///
    /// The returned entity is still `Idle`; launching it is the caller's job.
    pub fn get_bullet(
        &mut self,
        commands: &mut Commands,
        library: &BulletLibrary,
        template: BulletTemplateId,
        desired_pool_size: usize,
    ) -> Option<Entity> {
        let Some(data) = library.get(template) else {
            error_once!("bullet template {template:?} is not registered");
            return None;
        };
        let radius = self.collider_radius();

        let pool = self.pools.entry(template).or_insert_with(|| {
            let mut pool = Pool::new();
            pool.prewarm(desired_pool_size, || spawn_idle_projectile(commands, template, data, radius));
            debug!("created pool for `{}` with {desired_pool_size} projectiles", data.name);
            pool
        });
        let acquired = pool.acquire_with(|| spawn_idle_projectile(commands, template, data, radius));
        Some(acquired.instance)
    }

    /// Put a projectile back. `false` if it was not out of that pool.
    pub fn return_bullet(&mut self, template: BulletTemplateId, projectile: Entity) -> bool {
        match self.pools.get_mut(&template) {
            Some(pool) => pool.release(projectile),
            None => {
                warn!("no pool for {template:?} while returning {projectile}");
                false
            }
        }
    }

    /// Arm (or re-arm) the lifetime timer of an active projectile.
    pub fn set_lifetime(&mut self, template: BulletTemplateId, projectile: Entity, secs: f32) -> bool {
        self.pools
            .get_mut(&template)
            .is_some_and(|pool| pool.set_ttl(projectile, secs))
    }

    /// Advance lifetime timers; returns projectiles whose lifetime ran out. They are
    /// already idle in their pool.
    pub fn tick(&mut self, dt: f32) -> Vec<Entity> {
        self.pools.values_mut().flat_map(|pool| pool.tick(dt)).collect()
    }

    /// Cancel every timer and despawn every projectile, idle and active.
    pub fn shutdown(&mut self, commands: &mut Commands) {
        for (_, mut pool) in self.pools.drain() {
            for entity in pool.clear() {
                commands.entity(entity).try_despawn();
            }
        }
        self.initialized = false;
    }

    fn collider_radius(&self) -> f32 {
        if self.collider_radius > 0.0 {
            self.collider_radius
        } else {
            Tunables::default().projectile_radius
        }
    }
}

/// Spawn one pooled projectile in the inactive configuration.
fn spawn_idle_projectile(
    commands: &mut Commands,
    template: BulletTemplateId,
    data: &Arc<BulletTemplate>,
    radius: f32,
) -> Entity {
    commands
        .spawn((
            Name::new(format!("Projectile({})", data.name)),
            PooledProjectile,
            ProjectileState::Idle,
            Projectile::new(Arc::clone(data)),
            PoolLink(template),
            Transform::from_scale(Vec3::splat(data.size)),
            Visibility::Hidden,
            RigidBody::Dynamic,
            Collider::sphere(radius),
            // Contact response is applied by the hit pipeline, not the solver.
            Sensor,
            Mass(data.mass),
            inactive_projectile_layers(),
            LinearVelocity::ZERO,
            GravityScale(0.0),
            CollisionEventsEnabled,
        ))
        .id()
}
