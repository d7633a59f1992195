//! Discrete contact fallback.
//!
//! Runs after the physics step. A `CollisionStart` for a projectile counts only
//! when the sweep took no hit for it this step. Contact manifolds of a sensor body
//! carry no points, so the point and normal come from a short ray along the
//! pre-step velocity against the struck collider.

use avian3d::prelude::*;
use bevy::platform::collections::HashSet;
use bevy::prelude::*;

use super::components::{PooledProjectile, Projectile, ProjectileState};
use super::hit::{PendingHit, PendingHits};
use crate::common::tunables::Tunables;

/// Ray reach behind and ahead of the post-step position, in step lengths.
const CONTACT_PROBE_STEPS: f32 = 2.0;

pub fn collect_contact_hits(
    mut started: MessageReader<CollisionStart>,
    time: Res<Time>,
    tunables: Res<Tunables>,
    spatial: SpatialQuery,
    sensors: Query<(), With<Sensor>>,
    q_is_projectile: Query<(), With<PooledProjectile>>,
    mut q: Query<(&mut Projectile, &ProjectileState, &Transform), With<PooledProjectile>>,
    mut pending: ResMut<PendingHits>,
    mut seen: Local<HashSet<Entity>>,
) {
    seen.clear();
    let dt = time.delta_secs();

    for ev in started.read() {
        let p1 = q_is_projectile.contains(ev.collider1);
        let p2 = q_is_projectile.contains(ev.collider2);
        if !(p1 ^ p2) {
            continue;
        }
        let (projectile_entity, other) = if p1 {
            (ev.collider1, ev.collider2)
        } else {
            (ev.collider2, ev.collider1)
        };
        if sensors.contains(other) || !seen.insert(projectile_entity) {
            continue;
        }

        let Ok((mut projectile, state, transform)) = q.get_mut(projectile_entity) else {
            continue;
        };
        if *state != ProjectileState::InFlight || projectile.hit_this_step {
            continue;
        }

        let velocity = projectile.step_velocity;
        let (point, normal) = match Dir3::new(velocity) {
            Ok(direction) => {
                let step = velocity.length() * dt + tunables.skin_width;
                let origin = transform.translation - direction * step;
                let filter = SpatialQueryFilter::default().with_excluded_entities([projectile_entity]);
                spatial
                    .cast_ray_predicate(origin, direction, step * CONTACT_PROBE_STEPS, true, &filter, &|e| e == other)
                    .map(|ray| (origin + direction * ray.distance, ray.normal))
                    .unwrap_or((transform.translation, -direction.as_vec3()))
            }
            Err(_) => (transform.translation, Vec3::Y),
        };

        projectile.hit_this_step = true;
        pending.push(PendingHit {
            projectile: projectile_entity,
            target: other,
            point,
            normal,
            velocity,
        });
    }
}
