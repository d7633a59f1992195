//! Feature plugins.

use bevy::prelude::*;

use crate::plugins::projectiles::ProjectilesPlugin;

pub mod core;
pub mod impacts;
pub mod physics;
pub mod pooling;
pub mod projectiles;
pub mod surfaces;
pub mod world;

// Render-only
pub mod camera;
pub mod lighting;

/// Register gameplay plugins that work in headless tests.
pub fn register_gameplay(app: &mut App) {
    core::plugin(app);
    physics::plugin(app);
    surfaces::plugin(app);
    impacts::plugin(app);
    app.add_plugins(ProjectilesPlugin);
    world::plugin(app);
}

/// Register render-only plugins (requires DefaultPlugins / render infra).
pub fn register_render(app: &mut App) {
    lighting::plugin(app);
    camera::plugin(app);
    world::demo_fire_plugin(app);
}

/// Register all plugins (full app).
pub fn register_all(app: &mut App) {
    register_gameplay(app);
    register_render(app);
}
