//! Integration test harness.
//!
//! Keep integration tests headless:
//! - `MinimalPlugins` provides core ECS runtime.
//! - we then call `bevy_ballistics::game::configure_headless` to install gameplay plugins.
//! - time advances by exactly one fixed step per `app.update()`.

#![allow(dead_code)]

use std::time::Duration;

use avian3d::prelude::*;
use bevy::asset::AssetPlugin;
use bevy::prelude::*;
use bevy::scene::ScenePlugin;
use bevy::state::app::StatesPlugin;
use bevy::time::TimeUpdateStrategy;
use bevy::transform::TransformPlugin;
use bevy_ballistics::common::layers::Layer;
use bevy_ballistics::common::tunables::Tunables;
use bevy_ballistics::plugins::projectiles::{BulletLibrary, BulletTemplate, BulletTemplateId, LaunchRequest, Projectile, ProjectileState};

pub const HZ: f64 = 64.0;

pub fn app_headless() -> App {
    app_with(Tunables::default(), BulletLibrary::default())
}

/// Headless app with the given tunables and bullet templates (no gravity unless
/// the tunables say otherwise).
pub fn app_with(tunables: Tunables, library: BulletLibrary) -> App {
    let mut app = App::new();

    app.add_plugins((
        MinimalPlugins,
        StatesPlugin,
        TransformPlugin,
        AssetPlugin::default(),
        ScenePlugin,
    ));
    app.init_asset::<Mesh>();
    app.insert_resource(TimeUpdateStrategy::ManualDuration(Duration::from_secs_f64(1.0 / HZ)));
    app.insert_resource(Tunables { fixed_hz: HZ, ..tunables });
    if !library.is_empty() {
        app.insert_resource(library);
    }

    bevy_ballistics::game::configure_headless(&mut app);
    app.finish();
    app.cleanup();
    app
}

/// Zero-gravity tunables so straight-line geometry holds exactly.
pub fn flat_tunables() -> Tunables {
    Tunables { gravity: 0.0, ..Tunables::default() }
}

pub fn library_of(template: BulletTemplate) -> (BulletLibrary, BulletTemplateId) {
    let mut library = BulletLibrary::default();
    let id = library.register(template);
    (library, id)
}

/// Static wall facing +Z whose front face sits at `front_z`.
pub fn spawn_wall(app: &mut App, front_z: f32) -> Entity {
    app.world_mut()
        .spawn((
            Name::new("TestWall"),
            Transform::from_xyz(0.0, 5.0, front_z - 0.25),
            RigidBody::Static,
            Collider::cuboid(40.0, 10.0, 0.5),
            CollisionLayers::new(Layer::World, [Layer::Projectile]),
        ))
        .id()
}

/// Run a few frames so spawned colliders reach the spatial query pipeline.
pub fn settle(app: &mut App) {
    for _ in 0..3 {
        app.update();
    }
}

/// Write a launch request and run the frame that consumes it.
pub fn fire(app: &mut App, request: LaunchRequest) -> Entity {
    app.world_mut().write_message(request);
    app.update();
    app.world_mut()
        .query::<(Entity, &ProjectileState)>()
        .iter(app.world())
        .find(|(_, s)| **s == ProjectileState::InFlight)
        .map(|(e, _)| e)
        .expect("a projectile in flight")
}

pub fn state(app: &App, e: Entity) -> ProjectileState {
    *app.world().get::<ProjectileState>(e).expect("pooled projectile")
}

pub fn velocity(app: &App, e: Entity) -> Vec3 {
    app.world().get::<LinearVelocity>(e).expect("projectile velocity").0
}

pub fn projectile(app: &App, e: Entity) -> &Projectile {
    app.world().get::<Projectile>(e).expect("projectile data")
}
