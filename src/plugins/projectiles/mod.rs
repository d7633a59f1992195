//! Projectiles plugin: pooled bullets, continuous collision, hit response, ricochet.
//!
//! # Data flow
//! ```text
//!   Update (variable dt)
//!┌────────────────────────────────────────────────────────────────────────────┐
//!│  (A) Producer: fire-mode logic (outside this module)                       │
//!│      - writes: LaunchRequest message                                       │
//!│                                                                            │
//!│  (B) Consumer: launch_projectiles                                          │
//!│      - reads: LaunchRequest, BulletLibrary                                 │
//!│      - mutates: BulletPools (acquire + lifetime timer)                     │
//!│      - writes: ProjectileState::InFlight, velocity, layers, gravity        │
//!└────────────────────────────────────────────────────────────────────────────┘
//!                │
//!                v
//!   FixedUpdate (fixed dt)
//!┌────────────────────────────────────────────────────────────────────────────┐
//!│  (C) tick_projectile_lifetimes: expired InFlight → Retiring                │
//!│  (D) begin_projectile_step: clear hit flag, record step velocity           │
//!│  (E) sweep_projectiles: sphere cast over one step → PendingHits            │
//!│  (F) apply_projectile_hits: impulse, damage, explosion, impact feedback,   │
//!│      then ricochet (stay InFlight) or retire                               │
//!└────────────────────────────────────────────────────────────────────────────┘
//!                │
//!                v
//!   FixedPostUpdate (fixed dt)
//!┌────────────────────────────────────────────────────────────────────────────┐
//!│  (G) Physics step emits CollisionStart (Avian)                             │
//!│  (H) collect_contact_hits: fallback for steps the sweep missed             │
//!│  (I) apply_projectile_hits                                                 │
//!│  (J) return_to_pool_commit: Retiring → Idle, writes the Idle invariants    │
//!└────────────────────────────────────────────────────────────────────────────┘
//!
//! Feedback loop:
//!   commit releases the entity into its BulletPools pool
//!   launch acquires it again
//! ```
//!
//! At most one hit is taken per projectile per fixed step: the sweep and the
//! contact fallback both check and set `Projectile::hit_this_step`.

pub mod commit;
pub mod components;
pub mod contact;
pub mod hit;
pub mod launch;
pub mod pool;
pub mod ricochet;
pub mod sweep;
pub mod template;


use avian3d::collision::narrow_phase::CollisionEventSystems;
use bevy::prelude::*;

use crate::common::state::GameState;

pub use components::{DamageApplied, Health, PoolLink, PooledProjectile, Projectile, ProjectileState};
pub use hit::{PendingHit, PendingHits};
pub use launch::LaunchRequest;
pub use pool::BulletPools;
pub use ricochet::RicochetOutcome;
pub use template::{BulletLibrary, BulletTemplate, BulletTemplateId, RicochetSettings};

pub struct ProjectilesPlugin;

impl Plugin for ProjectilesPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<pool::BulletPools>()
            .init_resource::<template::BulletLibrary>()
            .init_resource::<hit::PendingHits>()
            .add_message::<launch::LaunchRequest>()
            .add_message::<components::DamageApplied>();

        app.add_systems(
            Update,
            launch::launch_projectiles.run_if(in_state(GameState::InGame)),
        );

        app.add_systems(
            FixedUpdate,
            (
                sweep::tick_projectile_lifetimes,
                sweep::begin_projectile_step,
                sweep::sweep_projectiles,
                hit::apply_projectile_hits,
            )
                .chain()
                .run_if(in_state(GameState::InGame)),
        );

        app.add_systems(
            FixedPostUpdate,
            (
                contact::collect_contact_hits.after(CollisionEventSystems),
                hit::apply_projectile_hits,
                commit::return_to_pool_commit,
            )
                .chain()
                .run_if(in_state(GameState::InGame)),
        );
    }
}
