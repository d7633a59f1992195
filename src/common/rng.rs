//! Seeded randomness shared by every ballistics system.
//!
//! Spread, ricochet rolls and ricochet deviation all draw from one stream so a
//! run is reproducible from `Tunables::rng_seed`.

use bevy::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

#[derive(Resource, Debug, Clone, Deref, DerefMut)]
pub struct BallisticsRng(pub ChaCha8Rng);

impl BallisticsRng {
    pub fn from_seed(seed: u64) -> Self {
        Self(ChaCha8Rng::seed_from_u64(seed))
    }
}

impl Default for BallisticsRng {
    fn default() -> Self {
        Self::from_seed(0)
    }
}
