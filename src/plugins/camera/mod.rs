//! Camera plugin (render-only).
//!
//! The camera keeps its position and eases its focus toward the centroid of the
//! projectiles in flight, falling back to the range centre.
//!
//! ```text
//! OnEnter(InGame): spawn MainCamera
//! PostUpdate:      follow_projectiles (disjoint Transform queries)
//! ```

use bevy::prelude::*;
use bevy::state::state_scoped::DespawnOnExit;

use crate::common::state::GameState;
use crate::plugins::projectiles::{PooledProjectile, ProjectileState};

const RANGE_CENTRE: Vec3 = Vec3::new(0.0, 1.5, -12.0);

#[derive(Component)]
pub struct MainCamera {
    pub responsiveness: f32,
    pub focus: Vec3,
}

pub fn plugin(app: &mut App) {
    app.add_systems(OnEnter(GameState::InGame), spawn_camera).add_systems(
        PostUpdate,
        follow_projectiles
            .before(TransformSystems::Propagate)
            .run_if(in_state(GameState::InGame)),
    );
}

fn spawn_camera(mut commands: Commands) {
    commands.spawn((
        Name::new("MainCamera"),
        Camera3d::default(),
        MainCamera { responsiveness: 2.0, focus: RANGE_CENTRE },
        Transform::from_xyz(8.0, 6.0, 14.0).looking_at(RANGE_CENTRE, Vec3::Y),
        DespawnOnExit(GameState::InGame),
    ));
}

fn follow_projectiles(
    time: Res<Time>,
    // Disjointness proof: projectiles are never the camera.
    q_projectiles: Query<(&Transform, &ProjectileState), (With<PooledProjectile>, Without<MainCamera>)>,
    mut q_cam: Query<(&mut Transform, &mut MainCamera), Without<PooledProjectile>>,
) {
    let (sum, count) = q_projectiles
        .iter()
        .filter(|(_, state)| **state == ProjectileState::InFlight)
        .fold((Vec3::ZERO, 0u32), |(sum, n), (tf, _)| (sum + tf.translation, n + 1));
    let goal = if count > 0 { sum / count as f32 } else { RANGE_CENTRE };

    let dt = time.delta_secs();
    for (mut tf, mut cam) in &mut q_cam {
        let alpha = 1.0 - (-cam.responsiveness * dt).exp();
        cam.focus = cam.focus.lerp(goal, alpha);
        let focus = cam.focus;
        tf.look_at(focus, Vec3::Y);
    }
}
