//! Hit application: momentum, damage, explosion, impact feedback, ricochet.
//!
//! Detection (sweep or contact fallback) only records a `PendingHit`. The
//! per-step flag on `Projectile` guarantees at most one record per projectile per
//! fixed step; this system drains the records in order.

use avian3d::prelude::*;
use bevy::ecs::system::SystemParam;
use bevy::platform::collections::HashSet;
use bevy::prelude::*;

use super::components::{DamageApplied, Health, PooledProjectile, Projectile, ProjectileState};
use super::launch::up_for;
use super::ricochet::{self, RicochetOutcome};
use crate::common::layers::projectile_hit_mask;
use crate::common::rng::BallisticsRng;
use crate::common::tunables::Tunables;
use crate::plugins::impacts::{EffectTemplates, ImpactDispatcher};
use crate::plugins::surfaces::{HitReport, SurfaceHitQuery};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingHit {
    pub projectile: Entity,
    /// Struck collider.
    pub target: Entity,
    pub point: Vec3,
    pub normal: Vec3,
    /// Projectile velocity when the hit was detected.
    pub velocity: Vec3,
}

#[derive(Resource, Debug, Default)]
pub struct PendingHits(Vec<PendingHit>);

impl PendingHits {
    pub fn push(&mut self, hit: PendingHit) {
        self.0.push(hit);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn drain(&mut self) -> std::vec::Drain<'_, PendingHit> {
        self.0.drain(..)
    }
}

/// Whatever a hit can touch besides the projectile itself.
#[derive(SystemParam)]
pub struct HitTargets<'w, 's> {
    collider_of: Query<'w, 's, &'static ColliderOf>,
    bodies: Query<'w, 's, (&'static RigidBody, &'static GlobalTransform)>,
    forces: Query<'w, 's, Forces, Without<PooledProjectile>>,
    health: Query<'w, 's, &'static mut Health>,
    sensors: Query<'w, 's, (), With<Sensor>>,
    spatial: SpatialQuery<'w, 's>,
    damage: MessageWriter<'w, DamageApplied>,
}

impl HitTargets<'_, '_> {
    /// Rigid body of a collider, or the collider itself.
    #[inline]
    fn owner(&self, collider: Entity) -> Entity {
        self.collider_of.get(collider).map_or(collider, |c| c.body)
    }

    fn dynamic_body(&self, collider: Entity) -> Option<Entity> {
        let body = self.owner(collider);
        match self.bodies.get(body) {
            Ok((rb, _)) if rb.is_dynamic() => Some(body),
            _ => None,
        }
    }

    /// Push the struck body with `impulse` at `point`, if it is dynamic.
    pub fn push(&mut self, collider: Entity, impulse: Vec3, point: Vec3) {
        let Some(body) = self.dynamic_body(collider) else {
            return;
        };
        if let Ok(mut forces) = self.forces.get_mut(body) {
            forces.apply_linear_impulse_at_point(impulse, point);
        }
    }

    /// Damage the receiver behind `collider`. Absence of a receiver is not an error.
    pub fn damage(&mut self, collider: Entity, amount: i32, source: Entity) -> bool {
        let owner = self.owner(collider);
        let target = if self.health.contains(owner) { owner } else { collider };
        let Ok(mut health) = self.health.get_mut(target) else {
            return false;
        };
        health.apply_damage(amount);
        self.damage.write(DamageApplied { target, amount, source });
        true
    }

    /// Splash damage and a radial impulse on everything in the hit mask within
    /// `radius` of `center`. Triggers are skipped; each owner is hit once.
    pub fn explode(&mut self, center: Vec3, radius: f32, force: f32, amount: i32, source: Entity) {
        let filter = SpatialQueryFilter::from_mask(projectile_hit_mask()).with_excluded_entities([source]);
        let colliders = self
            .spatial
            .shape_intersections(&Collider::sphere(radius), center, Quat::IDENTITY, &filter);

        let mut damaged: HashSet<Entity> = HashSet::default();
        let mut pushed: HashSet<Entity> = HashSet::default();
        for collider in colliders {
            if self.sensors.contains(collider) {
                continue;
            }
            let owner = self.owner(collider);
            if damaged.insert(owner) {
                self.damage(collider, amount, source);
            }

            let Some(body) = self.dynamic_body(collider) else {
                continue;
            };
            if !pushed.insert(body) {
                continue;
            }
            let Ok((_, transform)) = self.bodies.get(body) else {
                continue;
            };
            let offset = transform.translation() - center;
            let falloff = (1.0 - offset.length() / radius).clamp(0.0, 1.0);
            let direction = offset.try_normalize().unwrap_or(Vec3::Y);
            if let Ok(mut forces) = self.forces.get_mut(body) {
                forces.apply_linear_impulse(direction * force * falloff);
            }
        }
    }
}

/// Impact feedback for the struck surface.
#[derive(SystemParam)]
pub struct HitFeedback<'w, 's> {
    surfaces: SurfaceHitQuery<'w, 's>,
    dispatcher: ResMut<'w, ImpactDispatcher>,
    templates: Res<'w, EffectTemplates>,
}

pub fn apply_projectile_hits(
    mut commands: Commands,
    mut pending: ResMut<PendingHits>,
    mut projectiles: Query<
        (&mut Projectile, &mut ProjectileState, &mut Transform, &mut LinearVelocity),
        With<PooledProjectile>,
    >,
    mut targets: HitTargets,
    mut feedback: HitFeedback,
    mut rng: ResMut<BallisticsRng>,
    tunables: Res<Tunables>,
) {
    for hit in pending.drain() {
        let Ok((mut projectile, mut state, mut transform, mut velocity)) = projectiles.get_mut(hit.projectile) else {
            continue;
        };
        if *state != ProjectileState::InFlight {
            continue;
        }
        let template = projectile.template.clone();
        let damage = projectile.hit_damage();

        // 1. momentum
        targets.push(hit.target, hit.velocity * template.mass, hit.point);

        // 2. direct damage
        targets.damage(hit.target, damage, hit.projectile);

        // 3. explosion
        if template.explosion_radius > 0.0 {
            targets.explode(
                transform.translation,
                template.explosion_radius,
                template.explosion_force,
                damage,
                hit.projectile,
            );
        }

        // 4. surface sample + impact feedback
        let sample = feedback.surfaces.sample(&HitReport::new(hit.target, hit.point, hit.normal));
        feedback.dispatcher.dispatch(
            &mut commands,
            &feedback.templates,
            sample.point,
            sample.normal,
            sample.surface_id,
            1.0,
        );

        // 5. ricochet or retire
        match ricochet::evaluate(&template, projectile.ricochet_count, hit.velocity, hit.normal, &mut rng.0) {
            RicochetOutcome::Bounce { direction, speed, angle_deg } => {
                projectile.ricochet_count += 1;
                projectile.damage_multiplier *= template.ricochet.damage_multiplier;
                velocity.0 = direction * speed;
                // Leave from the struck point, clear of the surface.
                let clearance = tunables.projectile_radius * template.size + tunables.skin_width;
                transform.translation = hit.point + hit.normal.normalize_or_zero() * clearance;
                transform.look_to(direction, up_for(direction));
                debug!(
                    "{} ricocheted at {angle_deg:.1}° ({} bounces, multiplier {:.2})",
                    hit.projectile, projectile.ricochet_count, projectile.damage_multiplier
                );
            }
            RicochetOutcome::Retire => {
                velocity.0 = Vec3::ZERO;
                *state = ProjectileState::Retiring;
            }
        }
    }
}
