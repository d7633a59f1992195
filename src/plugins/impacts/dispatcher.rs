//! Impact dispatcher: pooled effect, decal and sound instances per surface hit.

use bevy::log::warn_once;
use bevy::platform::collections::{HashMap, HashSet};
use bevy::prelude::*;

use super::database::{AssetKey, SurfaceDatabase, SurfaceEntry};
use crate::common::tunables::Tunables;
use crate::plugins::pooling::Pool;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImpactKind {
    Effect,
    Decal,
    /// Positional emitter only; playback belongs to the audio layer.
    Sound,
}

/// Marks a pooled impact instance and the template it was built from.
#[derive(Component, Debug, Clone, PartialEq, Eq)]
pub struct ImpactInstance {
    pub template: AssetKey,
    pub kind: ImpactKind,
}

/// What to attach to an impact instance when it is first created.
#[derive(Clone, Debug, Default)]
pub struct EffectTemplate {
    pub mesh: Option<Handle<Mesh>>,
    pub material: Option<Handle<StandardMaterial>>,
    /// Uniform scale applied on top of the dispatch scale.
    pub base_scale: f32,
}

impl EffectTemplate {
    pub fn empty() -> Self {
        Self {
            base_scale: 1.0,
            ..default()
        }
    }
}

/// Registered templates by asset key.
#[derive(Resource, Debug, Default, Clone)]
pub struct EffectTemplates {
    templates: HashMap<AssetKey, EffectTemplate>,
}

impl EffectTemplates {
    pub fn insert(&mut self, key: impl Into<AssetKey>, template: EffectTemplate) -> &mut Self {
        self.templates.insert(key.into(), template);
        self
    }

    pub fn get(&self, key: &AssetKey) -> Option<&EffectTemplate> {
        self.templates.get(key)
    }

    pub fn contains(&self, key: &AssetKey) -> bool {
        self.templates.contains_key(key)
    }
}

/// Request to play the impact pipeline at a point. Other damage sources (melee,
/// environment) write these instead of reaching into the dispatcher.
#[derive(Message, Debug, Clone, Copy, PartialEq)]
pub struct ImpactRequest {
    pub position: Vec3,
    pub normal: Vec3,
    pub surface_id: u8,
    pub scale: f32,
}

/// Owns the surface database and one pool per (kind, template).
#[derive(Resource, Debug, Default)]
pub struct ImpactDispatcher {
    database: Option<SurfaceDatabase>,
    initialized: bool,
    lifetime: f32,
    prewarm: usize,
    pools: HashMap<(ImpactKind, AssetKey), Pool<Entity>>,
    failed_templates: HashSet<AssetKey>,
}

impl ImpactDispatcher {
    /// Bind the surface table. A second call is ignored with a warning.
    pub fn initialize(&mut self, database: Option<SurfaceDatabase>, tunables: &Tunables) -> bool {
        if self.initialized {
            warn!("impact dispatcher already initialized; ignoring");
            return false;
        }
        match &database {
            Some(db) => info!("impact dispatcher initialized with {} surface entries", db.entries.len()),
            None => error!("impact dispatcher has no surface database; impacts will be skipped"),
        }
        self.database = database;
        self.lifetime = tunables.effect_lifetime_secs;
        self.prewarm = tunables.effect_prewarm;
        self.initialized = true;
        true
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn database(&self) -> Option<&SurfaceDatabase> {
        self.database.as_ref()
    }

    pub fn pool(&self, kind: ImpactKind, key: &AssetKey) -> Option<&Pool<Entity>> {
        self.pools.get(&(kind, key.clone()))
    }

    /// Number of instances currently out of their pools.
    pub fn active_instances(&self) -> usize {
        self.pools.values().map(Pool::active_len).sum()
    }

    /// Same as `dispatch`; the entry point for non-projectile damage sources.
    pub fn handle_impact(
        &mut self,
        commands: &mut Commands,
        templates: &EffectTemplates,
        position: Vec3,
        normal: Vec3,
        surface_id: u8,
        scale: f32,
    ) -> Vec<Entity> {
        self.dispatch(commands, templates, position, normal, surface_id, scale)
    }

    /// Spawn the effect, decal and sound of the entry matching `surface_id`,
    /// facing along `normal`. Returns the activated instances.
    pub fn dispatch(
        &mut self,
        commands: &mut Commands,
        templates: &EffectTemplates,
        position: Vec3,
        normal: Vec3,
        surface_id: u8,
        scale: f32,
    ) -> Vec<Entity> {
        let Some(database) = self.database.as_ref() else {
            warn_once!("impact dispatched without a surface database; skipped");
            return Vec::new();
        };
        let entry: SurfaceEntry = database.resolve_surface(surface_id).clone();
        let transform = impact_transform(position, normal, scale * entry.scale_multiplier);

        let mut spawned = Vec::new();
        let assets = [
            (ImpactKind::Effect, entry.effect),
            (ImpactKind::Decal, entry.decal),
            (ImpactKind::Sound, entry.sound),
        ];
        for (kind, key) in assets {
            let Some(key) = key else { continue };
            if let Some(entity) = self.spawn_pooled(commands, templates, kind, key, transform) {
                spawned.push(entity);
            }
        }
        spawned
    }

    fn spawn_pooled(
        &mut self,
        commands: &mut Commands,
        templates: &EffectTemplates,
        kind: ImpactKind,
        key: AssetKey,
        transform: Transform,
    ) -> Option<Entity> {
        if self.failed_templates.contains(&key) {
            return None;
        }
        let Some(template) = templates.get(&key) else {
            error!("impact template `{key}` is not registered; its impacts are skipped");
            self.failed_templates.insert(key);
            return None;
        };

        let prewarm = self.prewarm;
        let pool = self.pools.entry((kind, key.clone())).or_insert_with(|| {
            let mut pool = Pool::new();
            pool.prewarm(prewarm, || spawn_idle(commands, &key, kind, template));
            debug!("created {kind:?} pool for `{key}` with {prewarm} instances");
            pool
        });

        let acquired = pool.acquire_with_ttl(self.lifetime, || spawn_idle(commands, &key, kind, template));
        let scaled = transform.with_scale(transform.scale * template.base_scale);
        commands.entity(acquired.instance).insert((scaled, Visibility::Visible));
        Some(acquired.instance)
    }

    /// Advance every pool's expiry timers; returns the instances that went idle.
    pub fn tick(&mut self, dt: f32) -> Vec<Entity> {
        self.pools.values_mut().flat_map(|pool| pool.tick(dt)).collect()
    }

    /// Return an instance early. `false` if no pool holds it as active.
    pub fn release(&mut self, entity: Entity) -> bool {
        self.pools.values_mut().any(|pool| pool.release(entity))
    }

    /// Cancel every timer and despawn every instance, idle and active.
    pub fn shutdown(&mut self, commands: &mut Commands) {
        for (_, mut pool) in self.pools.drain() {
            for entity in pool.clear() {
                commands.entity(entity).try_despawn();
            }
        }
        self.failed_templates.clear();
        self.database = None;
        self.initialized = false;
    }
}

/// Forward (-Z) along the surface normal.
pub fn impact_transform(position: Vec3, normal: Vec3, scale: f32) -> Transform {
    let forward = normal.try_normalize().unwrap_or(Vec3::Y);
    let up = if forward.cross(Vec3::Y).length_squared() < 1e-6 {
        Vec3::Z
    } else {
        Vec3::Y
    };
    Transform::from_translation(position)
        .looking_to(forward, up)
        .with_scale(Vec3::splat(scale))
}

fn spawn_idle(commands: &mut Commands, key: &AssetKey, kind: ImpactKind, template: &EffectTemplate) -> Entity {
    let mut entity = commands.spawn((
        Name::new(format!("impact:{key}")),
        ImpactInstance {
            template: key.clone(),
            kind,
        },
        Transform::default(),
        Visibility::Hidden,
    ));
    if let Some(mesh) = &template.mesh {
        entity.insert(Mesh3d(mesh.clone()));
    }
    if let Some(material) = &template.material {
        entity.insert(MeshMaterial3d(material.clone()));
    }
    entity.id()
}

/// Consumer for `ImpactRequest` messages.
pub fn handle_impact_requests(
    mut commands: Commands,
    mut requests: MessageReader<ImpactRequest>,
    mut dispatcher: ResMut<ImpactDispatcher>,
    templates: Res<EffectTemplates>,
) {
    for request in requests.read() {
        dispatcher.handle_impact(
            &mut commands,
            &templates,
            request.position,
            request.normal,
            request.surface_id,
            request.scale,
        );
    }
}

/// Hide instances whose lifetime ran out. They are already back in their pool.
pub fn expire_impacts(time: Res<Time>, mut dispatcher: ResMut<ImpactDispatcher>, mut visibility: Query<&mut Visibility, With<ImpactInstance>>) {
    for entity in dispatcher.tick(time.delta_secs()) {
        if let Ok(mut vis) = visibility.get_mut(entity) {
            *vis = Visibility::Hidden;
        }
    }
}
