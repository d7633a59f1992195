//! Launch consumer: take projectiles from their pools and put them in flight.
//!
//! Fire-mode logic writes `LaunchRequest`s; this system is the single writer of
//! the bullet pools on the launch side.

use avian3d::prelude::*;
use bevy::prelude::*;
use rand::Rng;

use super::components::{Projectile, ProjectileState};
use super::pool::BulletPools;
use super::template::{BulletLibrary, BulletTemplateId};
use crate::common::layers::active_projectile_layers;
use crate::common::rng::BallisticsRng;
use crate::common::tunables::Tunables;

#[derive(Message, Debug, Clone, Copy, PartialEq)]
pub struct LaunchRequest {
    pub template: BulletTemplateId,
    pub position: Vec3,
    pub direction: Vec3,
    pub damage_multiplier: f32,
}

impl LaunchRequest {
    pub fn new(template: BulletTemplateId, position: Vec3, direction: Vec3) -> Self {
        Self {
            template,
            position,
            direction,
            damage_multiplier: 1.0,
        }
    }
}

/// An up vector that is never parallel to `forward`.
#[inline]
pub fn up_for(forward: Vec3) -> Vec3 {
    if forward.cross(Vec3::Y).length_squared() < 1e-6 { Vec3::Z } else { Vec3::Y }
}

/// Deviate `direction` by a uniform angle in `±spread_deg` around the aim's
/// up axis (yaw) and right axis (pitch).
pub fn apply_spread(direction: Vec3, spread_deg: f32, rng: &mut impl Rng) -> Vec3 {
    if spread_deg <= 0.0 {
        return direction;
    }
    let yaw = rng.gen_range(-spread_deg..=spread_deg).to_radians();
    let pitch = rng.gen_range(-spread_deg..=spread_deg).to_radians();
    let aim = Transform::IDENTITY.looking_to(direction, up_for(direction)).rotation;
    (aim * Quat::from_euler(EulerRot::YXZ, yaw, pitch, 0.0) * Vec3::NEG_Z).normalize()
}

/// Activate one projectile for `request`. Returns `None` for a zero direction or an
/// unknown template.
pub fn launch(
    commands: &mut Commands,
    pools: &mut BulletPools,
    library: &BulletLibrary,
    tunables: &Tunables,
    rng: &mut impl Rng,
    request: &LaunchRequest,
) -> Option<Entity> {
    let Some(direction) = request.direction.try_normalize() else {
        warn!("launch request with zero direction ignored");
        return None;
    };
    let template = library.get(request.template)?;
    let entity = pools.get_bullet(commands, library, request.template, tunables.default_bullet_pool_size)?;

    let direction = apply_spread(direction, template.spread_deg, rng);
    let transform = Transform::from_translation(request.position)
        .looking_to(direction, up_for(direction))
        .with_scale(Vec3::splat(template.size));

    let mut projectile = Projectile::new(template.clone());
    projectile.reset_for_launch(request.damage_multiplier);

    commands.entity(entity).insert((
        ProjectileState::InFlight,
        projectile,
        transform,
        LinearVelocity(direction * template.speed),
        AngularVelocity::ZERO,
        Visibility::Visible,
        active_projectile_layers(),
        GravityScale(1.0),
    ));

    pools.set_lifetime(request.template, entity, template.lifetime_secs);
    Some(entity)
}

pub fn launch_projectiles(
    mut commands: Commands,
    mut reader: MessageReader<LaunchRequest>,
    mut pools: ResMut<BulletPools>,
    library: Res<BulletLibrary>,
    tunables: Res<Tunables>,
    mut rng: ResMut<BallisticsRng>,
) {
    for request in reader.read() {
        launch(&mut commands, &mut pools, &library, &tunables, &mut rng.0, request);
    }
}
