//! Game composition root.
//!
//! Provides two public configuration functions:
//! - `configure_full`: includes DefaultPlugins (window/render) + game plugins.
//! - `configure_headless`: minimal configuration for integration tests.

use std::path::{Path, PathBuf};

use bevy::prelude::*;
use bevy::window::WindowResolution;

use crate::common::state::GameState;
use crate::common::tunables::Tunables;
use crate::plugins;
use crate::plugins::impacts::SurfaceDatabase;
use crate::plugins::projectiles::BulletLibrary;

#[cfg(target_os = "windows")]
use bevy::render::{
    RenderPlugin,
    settings::{Backends, PowerPreference, WgpuSettings},
};

/// Directory holding `tunables.json`, `bullets.json` and `surfaces.json`.
pub const CONFIG_DIR_ENV: &str = "BALLISTICS_CONFIG_DIR";

pub fn run() {
    App::new().add_plugins(configure_full).run();
}

/// Full configuration for `cargo run`.
pub fn configure_full(app: &mut App) {
    let default_plugins = DefaultPlugins.set(WindowPlugin {
        primary_window: Some(Window {
            title: "Ballistics Range".into(),
            resolution: WindowResolution::new(1280, 720),
            ..default()
        }),
        ..default()
    });

    // DX12 on a high-performance adapter.
    #[cfg(target_os = "windows")]
    let default_plugins = default_plugins.set(RenderPlugin {
        render_creation: WgpuSettings {
            backends: Some(Backends::DX12),
            power_preference: PowerPreference::HighPerformance,
            ..default()
        }
        .into(),
        ..default()
    });

    app.add_plugins(default_plugins);

    load_authored_data(app, &config_dir());
    configure_game(app);
    plugins::register_render(app);
}

/// Headless configuration for integration tests.
///
/// Notes:
/// - Do NOT add DefaultPlugins.
/// - Do NOT add render-only plugins (camera/lighting/demo fire).
pub fn configure_headless(app: &mut App) {
    configure_game(app);
}

/// Configuration shared by both full and headless apps.
fn configure_game(app: &mut App) {
    app.init_state::<GameState>();
    plugins::register_gameplay(app);
}

fn config_dir() -> PathBuf {
    std::env::var_os(CONFIG_DIR_ENV).map_or_else(|| PathBuf::from("config"), PathBuf::from)
}

/// Insert whatever authored data `dir` provides. Missing files keep the built-in
/// defaults; malformed ones are logged and skipped.
pub fn load_authored_data(app: &mut App, dir: &Path) {
    let tunables = dir.join("tunables.json");
    if tunables.exists() {
        match Tunables::from_json_file(&tunables) {
            Ok(t) => {
                app.insert_resource(t);
            }
            Err(err) => error!("{err}"),
        }
    }

    let bullets = dir.join("bullets.json");
    if bullets.exists() {
        match BulletLibrary::from_json_file(&bullets) {
            Ok(library) => {
                info!("loaded {} bullet templates", library.len());
                app.insert_resource(library);
            }
            Err(err) => error!("{err}"),
        }
    }

    let surfaces = dir.join("surfaces.json");
    if surfaces.exists() {
        match SurfaceDatabase::from_json_file(&surfaces) {
            Ok(database) => {
                app.insert_resource(database);
            }
            Err(err) => error!("{err}"),
        }
    }
}
