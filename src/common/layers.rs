//! Collision layers.

use avian3d::prelude::*;

#[derive(PhysicsLayer, Default, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Layer {
    #[default]
    Default,
    World,
    Target,
    Projectile,
    Effect,
}

/// Layers a projectile sweep, contact or explosion may touch.
#[inline]
pub fn projectile_hit_mask() -> LayerMask {
    LayerMask::from([Layer::Default, Layer::World, Layer::Target])
}

#[inline]
pub fn active_projectile_layers() -> CollisionLayers {
    CollisionLayers::new(Layer::Projectile, projectile_hit_mask())
}

/// "Disabled" without structural changes: empty filters means we collide with nothing.
#[inline]
pub fn inactive_projectile_layers() -> CollisionLayers {
    CollisionLayers::new(Layer::Projectile, LayerMask::NONE)
}
