//! Fixed-step continuous collision: lifetimes, per-step reset, sphere sweep.

use avian3d::prelude::*;
use bevy::prelude::*;

use super::components::{PooledProjectile, Projectile, ProjectileState};
use super::hit::{PendingHit, PendingHits};
use super::pool::BulletPools;
use crate::common::layers::projectile_hit_mask;
use crate::common::tunables::Tunables;

/// Lifetime expiry: the pool already took the projectile back, so force it to retire
/// whatever it was doing.
pub fn tick_projectile_lifetimes(
    time: Res<Time>,
    mut pools: ResMut<BulletPools>,
    mut q: Query<(&mut ProjectileState, &mut LinearVelocity), With<PooledProjectile>>,
) {
    for entity in pools.tick(time.delta_secs()) {
        let Ok((mut state, mut velocity)) = q.get_mut(entity) else {
            continue;
        };
        if *state == ProjectileState::InFlight {
            debug!("{entity} reached the end of its lifetime");
            velocity.0 = Vec3::ZERO;
            *state = ProjectileState::Retiring;
        }
    }
}

/// Clear the per-step hit flag and remember the velocity the step starts with.
pub fn begin_projectile_step(mut q: Query<(&mut Projectile, &ProjectileState, &LinearVelocity), With<PooledProjectile>>) {
    for (mut projectile, state, velocity) in &mut q {
        if *state != ProjectileState::InFlight {
            continue;
        }
        projectile.hit_this_step = false;
        projectile.step_velocity = velocity.0;
    }
}

/// Sweep a sphere along each projectile's velocity for one step of travel plus the
/// skin width. The first hit is authoritative for the step.
pub fn sweep_projectiles(
    time: Res<Time>,
    tunables: Res<Tunables>,
    spatial: SpatialQuery,
    sensors: Query<(), With<Sensor>>,
    mut pending: ResMut<PendingHits>,
    mut q: Query<(Entity, &mut Projectile, &ProjectileState, &Transform, &LinearVelocity), With<PooledProjectile>>,
) {
    let dt = time.delta_secs();
    for (entity, mut projectile, state, transform, velocity) in &mut q {
        if *state != ProjectileState::InFlight || projectile.hit_this_step {
            continue;
        }
        let Ok(direction) = Dir3::new(velocity.0) else {
            continue;
        };
        let distance = velocity.0.length() * dt + tunables.skin_width;
        let shape = Collider::sphere(tunables.projectile_radius * projectile.template.size);
        let filter = SpatialQueryFilter::from_mask(projectile_hit_mask()).with_excluded_entities([entity]);

        let Some(hit) = spatial.cast_shape_predicate(
            &shape,
            transform.translation,
            Quat::IDENTITY,
            direction,
            &ShapeCastConfig::from_max_distance(distance),
            &filter,
            &|candidate| !sensors.contains(candidate),
        ) else {
            continue;
        };

        projectile.hit_this_step = true;
        pending.push(PendingHit {
            projectile: entity,
            target: hit.entity,
            point: hit.point1,
            normal: hit.normal1,
            velocity: velocity.0,
        });
    }
}
