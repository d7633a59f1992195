//! Core plugin: shared resources, fixed step and subsystem lifecycle.

use bevy::prelude::*;

use crate::common::rng::BallisticsRng;
use crate::common::tunables::Tunables;
use crate::plugins::impacts::{ImpactDispatcher, SurfaceDatabase};
use crate::plugins::projectiles::BulletPools;
use crate::plugins::surfaces;

/// Installs shared resources. A `Tunables` inserted before this plugin wins over
/// the defaults.
pub fn plugin(app: &mut App) {
    let tunables = app.world().get_resource::<Tunables>().cloned().unwrap_or_default();
    if let Err(err) = tunables.validate() {
        error!("invalid tunables: {err}");
    }

    app.insert_resource(Time::<Fixed>::from_hz(tunables.fixed_hz));
    app.insert_resource(BallisticsRng::from_seed(tunables.rng_seed));
    app.insert_resource(ClearColor(Color::srgb(0.05, 0.05, 0.07)));
    app.insert_resource(tunables);

    app.add_systems(Startup, initialize_on_startup);
    app.add_systems(Last, shutdown_on_exit);
}

/// Start the bullet pools and the impact dispatcher. Returns `false` (and logs a
/// warning) when they were already running.
pub fn initialize(world: &mut World, database: Option<SurfaceDatabase>) -> bool {
    let tunables = world.get_resource::<Tunables>().cloned().unwrap_or_default();
    world.init_resource::<BulletPools>();
    world.init_resource::<ImpactDispatcher>();

    let pools = world.resource_mut::<BulletPools>().initialize(&tunables);
    let impacts = world.resource_mut::<ImpactDispatcher>().initialize(database, &tunables);
    if !(pools && impacts) {
        warn!("ballistics already initialized");
        return false;
    }
    info!("ballistics initialized");
    true
}

/// Cancel every timer, despawn every pooled instance (idle and active) and drop
/// the hit resolver caches along with their device buffers.
pub fn shutdown(world: &mut World) {
    if let Some(mut pools) = world.remove_resource::<BulletPools>() {
        pools.shutdown(&mut world.commands());
        world.insert_resource(pools);
    }
    if let Some(mut dispatcher) = world.remove_resource::<ImpactDispatcher>() {
        dispatcher.shutdown(&mut world.commands());
        world.insert_resource(dispatcher);
    }
    world.flush();
    surfaces::clear_caches(world);
    info!("ballistics shut down");
}

/// Takes a `SurfaceDatabase` resource, if one was inserted, and initializes with it.
fn initialize_on_startup(world: &mut World) {
    let database = world.remove_resource::<SurfaceDatabase>();
    initialize(world, database);
}

fn shutdown_on_exit(mut exit: MessageReader<AppExit>, mut commands: Commands) {
    if exit.read().next().is_some() {
        commands.queue(shutdown);
    }
}
