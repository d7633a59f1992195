//! Ricochet model.
//!
//! `angle` is the angle between the reversed travel direction and the surface
//! normal, in degrees: 0 for a head-on hit, approaching 90 as the hit gets more
//! grazing.

use bevy::prelude::*;
use rand::Rng;

use super::template::{BulletTemplate, RicochetSettings};

/// Hits at or above this angle are treated as sliding along the surface.
pub const MAX_RICOCHET_ANGLE_DEG: f32 = 89.0;
/// Below this angle the bounce direction is not randomized.
pub const DEVIATION_MIN_ANGLE_DEG: f32 = 25.0;
pub const MAX_DEVIATION_DEG: f32 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RicochetOutcome {
    Bounce {
        direction: Vec3,
        speed: f32,
        angle_deg: f32,
    },
    Retire,
}

#[inline]
pub fn incidence_angle_deg(incoming: Vec3, normal: Vec3) -> f32 {
    (-incoming).angle_between(normal).to_degrees()
}

/// `chance * falloff^count`.
#[inline]
pub fn effective_chance(settings: &RicochetSettings, ricochet_count: u32) -> f32 {
    settings.chance * settings.chance_falloff.powi(ricochet_count.min(i32::MAX as u32) as i32)
}

#[inline]
pub fn is_eligible(settings: &RicochetSettings, angle_deg: f32, ricochet_count: u32) -> bool {
    if settings.max_ricochets.is_some_and(|max| ricochet_count >= max) {
        return false;
    }
    angle_deg >= settings.min_angle_deg && angle_deg < MAX_RICOCHET_ANGLE_DEG
}

/// Fraction of the template speed kept after a bounce.
#[inline]
pub fn speed_factor(angle_deg: f32) -> f32 {
    (1.0 - (angle_deg / 90.0) * 0.5).clamp(0.0, 1.0)
}

#[inline]
pub fn deviation_limit_deg(angle_deg: f32) -> f32 {
    if angle_deg < DEVIATION_MIN_ANGLE_DEG { 0.0 } else { MAX_DEVIATION_DEG }
}

#[inline]
pub fn reflect(incoming: Vec3, normal: Vec3) -> Vec3 {
    incoming - 2.0 * incoming.dot(normal) * normal
}

/// Reflection of `incoming` about `normal`, rotated by `deviation_deg` around the
/// tangent `normal × reflected`.
pub fn ricochet_direction(incoming: Vec3, normal: Vec3, deviation_deg: f32) -> Vec3 {
    let reflected = reflect(incoming, normal).normalize_or_zero();
    let Some(tangent) = normal.cross(reflected).try_normalize() else {
        return reflected;
    };
    (Quat::from_axis_angle(tangent, deviation_deg.to_radians()) * reflected).normalize_or_zero()
}

/// Decide whether a hit bounces. Draws from `rng` only when the hit is eligible.
pub fn evaluate(
    template: &BulletTemplate,
    ricochet_count: u32,
    incoming_velocity: Vec3,
    normal: Vec3,
    rng: &mut impl Rng,
) -> RicochetOutcome {
    let Some(normal) = normal.try_normalize() else {
        warn!("zero-length hit normal; projectile retires");
        return RicochetOutcome::Retire;
    };
    let Some(incoming) = incoming_velocity.try_normalize() else {
        return RicochetOutcome::Retire;
    };

    let settings = &template.ricochet;
    let angle_deg = incidence_angle_deg(incoming, normal);
    if !is_eligible(settings, angle_deg, ricochet_count) {
        return RicochetOutcome::Retire;
    }

    let chance = effective_chance(settings, ricochet_count);
    let draw: f32 = rng.r#gen();
    if !(chance > 0.0 && draw <= chance) {
        return RicochetOutcome::Retire;
    }

    let limit = deviation_limit_deg(angle_deg);
    let deviation = if limit > 0.0 { rng.gen_range(-limit..=limit) } else { 0.0 };

    RicochetOutcome::Bounce {
        direction: ricochet_direction(incoming, normal, deviation),
        speed: template.speed * speed_factor(angle_deg),
        angle_deg,
    }
}
