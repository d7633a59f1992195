//! Impact feedback: surface table lookup and pooled effect instances.
//!
//! ```text
//!   projectile hit ──► ImpactDispatcher::dispatch ─┐
//!   ImpactRequest  ──► handle_impact_requests ─────┴─► pool per (kind, template)
//!                                                          │ acquire_with_ttl(effect lifetime)
//!   FixedUpdate: expire_impacts ── pool.tick ──► hidden, idle again
//! ```

pub mod database;
pub mod dispatcher;

use bevy::prelude::*;

use crate::common::state::GameState;

pub use database::{AssetKey, SurfaceDatabase, SurfaceEntry};
pub use dispatcher::{EffectTemplate, EffectTemplates, ImpactDispatcher, ImpactInstance, ImpactKind, ImpactRequest};

pub fn plugin(app: &mut App) {
    app.init_resource::<ImpactDispatcher>()
        .init_resource::<EffectTemplates>()
        .add_message::<ImpactRequest>();

    app.add_systems(
        FixedUpdate,
        (dispatcher::handle_impact_requests, dispatcher::expire_impacts)
            .chain()
            .run_if(in_state(GameState::InGame)),
    );
}
