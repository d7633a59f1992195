//! World plugin: a small firing range.
//!
//! Floor, a striped backstop (metal/wood bands sampled from a surface map), a
//! dynamic target with `Health`, plus the demo bullet templates, surface table
//! and effect templates that go with them.

use avian3d::prelude::*;
use bevy::prelude::*;
use bevy::state::state_scoped::DespawnOnExit;

use crate::common::layers::Layer;
use crate::common::state::GameState;
use crate::plugins::impacts::{EffectTemplate, EffectTemplates, SurfaceDatabase, SurfaceEntry};
use crate::plugins::projectiles::{BulletLibrary, BulletTemplate, BulletTemplateId, Health, LaunchRequest, RicochetSettings};
use crate::plugins::surfaces::identity::{GrayscaleMap, ImpactSurface};

pub const CONCRETE: u8 = 40;
pub const METAL: u8 = 120;
pub const WOOD: u8 = 200;

const FLOOR_HALF: f32 = 25.0;
const BACKSTOP_Z: f32 = -20.0;
const MUZZLE: Vec3 = Vec3::new(0.0, 1.5, 10.0);

pub fn plugin(app: &mut App) {
    if !app.world().contains_resource::<SurfaceDatabase>() {
        app.insert_resource(demo_surfaces());
    }
    app.add_systems(Startup, (register_demo_bullets, register_demo_effects));
    app.add_systems(OnEnter(GameState::InGame), spawn_range);
}

/// Periodic volleys from the muzzle at the backstop. Render builds only.
pub fn demo_fire_plugin(app: &mut App) {
    app.insert_resource(FireTimer(Timer::from_seconds(0.4, TimerMode::Repeating)));
    app.add_systems(Update, fire_demo_volley.run_if(in_state(GameState::InGame)));
}

pub fn demo_surfaces() -> SurfaceDatabase {
    SurfaceDatabase::new(
        vec![
            SurfaceEntry::new(CONCRETE, "concrete").with_effect("dust").with_decal("chip"),
            SurfaceEntry::new(METAL, "metal").with_effect("sparks").with_decal("dent").with_sound("clang"),
            SurfaceEntry::new(WOOD, "wood").with_effect("splinters").with_scale(1.5),
        ],
        SurfaceEntry::new(0, "default").with_effect("dust"),
    )
}

pub fn demo_bullets() -> Vec<BulletTemplate> {
    vec![
        BulletTemplate {
            name: "rifle".into(),
            speed: 300.0,
            spread_deg: 0.5,
            damage: 25,
            mass: 0.01,
            ..default()
        },
        BulletTemplate {
            name: "grenade".into(),
            speed: 30.0,
            lifetime_secs: 4.0,
            damage: 40,
            size: 3.0,
            mass: 0.2,
            explosion_radius: 3.0,
            explosion_force: 8.0,
            ricochet: RicochetSettings::disabled(),
            ..default()
        },
    ]
}

fn register_demo_bullets(mut library: ResMut<BulletLibrary>) {
    if !library.is_empty() {
        return;
    }
    for template in demo_bullets() {
        library.register(template);
    }
}

fn register_demo_effects(
    meshes: Option<ResMut<Assets<Mesh>>>,
    materials: Option<ResMut<Assets<StandardMaterial>>>,
    mut templates: ResMut<EffectTemplates>,
) {
    let (Some(mut meshes), Some(mut materials)) = (meshes, materials) else {
        // Headless: instances are transforms only.
        for key in ["dust", "chip", "sparks", "dent", "clang", "splinters"] {
            templates.insert(key, EffectTemplate::empty());
        }
        return;
    };

    let burst = meshes.add(Sphere::new(0.05));
    let decal = meshes.add(Cuboid::new(0.08, 0.08, 0.005));
    let mut effect = |color: Color, mesh: &Handle<Mesh>| EffectTemplate {
        mesh: Some(mesh.clone()),
        material: Some(materials.add(StandardMaterial { base_color: color, unlit: true, ..default() })),
        base_scale: 1.0,
    };

    templates
        .insert("dust", effect(Color::srgb(0.6, 0.58, 0.52), &burst))
        .insert("chip", effect(Color::srgb(0.3, 0.3, 0.3), &decal))
        .insert("sparks", effect(Color::srgb(1.0, 0.8, 0.3), &burst))
        .insert("dent", effect(Color::srgb(0.2, 0.2, 0.22), &decal))
        .insert("splinters", effect(Color::srgb(0.55, 0.4, 0.2), &burst))
        .insert("clang", EffectTemplate::empty());
}

/// Vertical metal/wood bands across the backstop's U axis.
fn backstop_map() -> GrayscaleMap {
    let bands = [METAL, WOOD, METAL, WOOD];
    let luma = bands.iter().map(|id| f32::from(*id) / 255.0).collect();
    GrayscaleMap::from_luma(bands.len() as u32, 1, luma).unwrap_or_else(|| GrayscaleMap::uniform(METAL))
}

fn spawn_range(
    mut commands: Commands,
    meshes: Option<ResMut<Assets<Mesh>>>,
    materials: Option<ResMut<Assets<StandardMaterial>>>,
) {
    let static_layers = CollisionLayers::new(Layer::World, [Layer::Projectile, Layer::Target]);
    let target_layers = CollisionLayers::new(Layer::Target, [Layer::Projectile, Layer::World]);

    let floor = commands
        .spawn((
            Name::new("Floor"),
            Transform::from_xyz(0.0, -0.5, 0.0),
            RigidBody::Static,
            Collider::cuboid(FLOOR_HALF * 2.0, 1.0, FLOOR_HALF * 2.0),
            static_layers,
            ImpactSurface::constant(CONCRETE),
            DespawnOnExit(GameState::InGame),
        ))
        .id();

    let backstop = commands
        .spawn((
            Name::new("Backstop"),
            Transform::from_xyz(0.0, 2.5, BACKSTOP_Z),
            RigidBody::Static,
            Collider::cuboid(12.0, 5.0, 0.5),
            static_layers,
            ImpactSurface::with_map(backstop_map()),
            DespawnOnExit(GameState::InGame),
        ))
        .id();

    let target = commands
        .spawn((
            Name::new("Target"),
            Transform::from_xyz(0.0, 1.0, BACKSTOP_Z + 5.0),
            RigidBody::Dynamic,
            Collider::cuboid(1.0, 2.0, 0.3),
            target_layers,
            Health::new(200),
            ImpactSurface::constant(WOOD),
            DespawnOnExit(GameState::InGame),
        ))
        .id();

    // Meshes double as the UV source for surface sampling.
    let (Some(mut meshes), Some(mut materials)) = (meshes, materials) else {
        return;
    };
    let gray = materials.add(Color::srgb(0.35, 0.35, 0.38));
    let parts = [
        (floor, Cuboid::new(FLOOR_HALF * 2.0, 1.0, FLOOR_HALF * 2.0)),
        (backstop, Cuboid::new(12.0, 5.0, 0.5)),
        (target, Cuboid::new(1.0, 2.0, 0.3)),
    ];
    for (entity, shape) in parts {
        commands
            .entity(entity)
            .insert((Mesh3d(meshes.add(shape)), MeshMaterial3d(gray.clone())));
    }
}

#[derive(Resource)]
struct FireTimer(Timer);

fn fire_demo_volley(
    time: Res<Time>,
    mut timer: ResMut<FireTimer>,
    library: Res<BulletLibrary>,
    mut launches: MessageWriter<LaunchRequest>,
    mut shot: Local<usize>,
) {
    if !timer.0.tick(time.delta()).just_finished() || library.is_empty() {
        return;
    }
    *shot += 1;
    let template = BulletTemplateId((*shot % library.len()) as u32);

    // Sweep the aim across the backstop, grazing the floor now and then.
    let t = time.elapsed_secs();
    let aim = Vec3::new((t * 0.7).sin() * 5.0, 1.0 + (t * 1.3).sin().abs() * 2.0, BACKSTOP_Z);
    launches.write(LaunchRequest::new(template, MUZZLE, aim - MUZZLE));
    debug!("demo volley #{}: {template:?}", *shot);
}
