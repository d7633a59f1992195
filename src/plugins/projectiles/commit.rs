//! Return commit: recycle retired projectiles into their pools.
//!
//! This system is the "owner" of the *Idle invariants*.
//!
//! Invariant: Idle projectiles must be:
//! - hidden
//! - linear and angular velocity = 0
//! - unaffected by gravity
//! - collide with nothing (filters empty)

use avian3d::prelude::*;
use bevy::prelude::*;

use super::components::{PoolLink, PooledProjectile, ProjectileState};
use super::pool::BulletPools;
use crate::common::layers::inactive_projectile_layers;

pub fn return_to_pool_commit(
    mut pools: ResMut<BulletPools>,
    mut q: Query<(
        Entity,
        &PoolLink,
        &mut ProjectileState,
        &mut Visibility,
        &mut LinearVelocity,
        &mut AngularVelocity,
        &mut GravityScale,
        &mut CollisionLayers,
    ), With<PooledProjectile>>,
) {
    for (e, link, mut state, mut vis, mut vel, mut ang, mut gravity, mut layers) in &mut q {
        if *state != ProjectileState::Retiring { continue; }

        *state = ProjectileState::Idle;
        *vis = Visibility::Hidden;
        vel.0 = Vec3::ZERO;
        ang.0 = Vec3::ZERO;
        gravity.0 = 0.0;
        *layers = inactive_projectile_layers();

        // Already idle in the pool when the lifetime ran out.
        pools.return_bullet(link.0, e);
    }
}
