//! Surface hit resolution: which texture coordinate and surface type a contact struck.
//!
//! ```text
//!   HitReport (entity, point, normal, optional triangle + barycentric)
//!        │
//!        ├─ triangle reported ──► cpu::resolve_barycentric          (O(1))
//!        │
//!        └─ point + normal only ─► probe ray from just outside the surface
//!                                  ├─ Cpu backend: cpu::resolve_ray  (sequential scan)
//!                                  └─ Gpu backend: gpu::resolve_ray  (compute kernel)
//!        │
//!        ▼
//!   identity::resolve_surface_id(uv) ──► HitSample { point, normal, uv, surface_id }
//! ```
//!
//! Both backends share the geometry snapshot in `MeshGeometryCache`. Skinned meshes
//! are snapshotted from their current pose on every query and never cached.
//! The GPU backend borrows the renderer's device at startup; an app without one
//! can insert a standalone `ComputeDevice` before the plugin runs.

pub mod cpu;
pub mod geometry;
pub mod gpu;
pub mod identity;
pub mod raycast;

use std::sync::Arc;

use bevy::ecs::message::Messages;
use bevy::ecs::system::SystemParam;
use bevy::log::warn_once;
use bevy::math::Affine3A;
use bevy::prelude::*;
use bevy::render::renderer::{RenderDevice, RenderQueue};

use crate::common::tunables::{HitResolverBackend, Tunables};

use self::cpu::MeshGeometryCache;
use self::geometry::MeshGeometry;
use self::gpu::device::ComputeDevice;
use self::gpu::{GpuMeshCache, StaticBatched};
use self::identity::{GrayscaleMap, ImpactSurface, SurfaceMapCache, SurfaceMaterial};
use self::raycast::HitRay;

/// The deformed mesh of a skinned surface, rewritten by animation every frame.
#[derive(Component, Debug, Clone)]
pub struct SkinnedPose {
    pub mesh: Handle<Mesh>,
}

/// What the physics query reported about a contact.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitReport {
    pub entity: Entity,
    pub point: Vec3,
    pub normal: Vec3,
    /// Triangle index and barycentric weights, when the query provides them.
    pub feature: Option<(usize, Vec3)>,
}

impl HitReport {
    pub fn new(entity: Entity, point: Vec3, normal: Vec3) -> Self {
        Self {
            entity,
            point,
            normal,
            feature: None,
        }
    }

    pub fn with_feature(mut self, triangle: usize, barycentric: Vec3) -> Self {
        self.feature = Some((triangle, barycentric));
        self
    }
}

/// Resolved surface data for one hit. Lives for one simulation step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitSample {
    pub point: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
    pub surface_id: u8,
}

enum Snapshot {
    Cached(AssetId<Mesh>, Arc<MeshGeometry>),
    Transient(MeshGeometry),
}

impl Snapshot {
    fn geometry(&self) -> &MeshGeometry {
        match self {
            Snapshot::Cached(_, geometry) => Arc::as_ref(geometry),
            Snapshot::Transient(geometry) => geometry,
        }
    }
}

type SurfaceData = (
    Option<&'static Mesh3d>,
    Option<&'static GlobalTransform>,
    Has<StaticBatched>,
    Option<&'static SkinnedPose>,
    Option<&'static ImpactSurface>,
    Option<&'static SurfaceMaterial>,
);

/// Everything needed to turn a `HitReport` into a `HitSample`.
#[derive(SystemParam)]
pub struct SurfaceHitQuery<'w, 's> {
    meshes: Option<Res<'w, Assets<Mesh>>>,
    images: Option<Res<'w, Assets<Image>>>,
    geometry_cache: Res<'w, MeshGeometryCache>,
    map_cache: Res<'w, SurfaceMapCache>,
    gpu_cache: Res<'w, GpuMeshCache>,
    device: Res<'w, ComputeDevice>,
    tunables: Res<'w, Tunables>,
    surfaces: Query<'w, 's, SurfaceData>,
}

impl SurfaceHitQuery<'_, '_> {
    pub fn sample(&self, report: &HitReport) -> HitSample {
        let uv = match report.feature {
            Some((triangle, barycentric)) => self.resolve_barycentric(report.entity, triangle, barycentric),
            None => self.resolve_uv(report.entity, report.point, report.normal),
        };
        HitSample {
            point: report.point,
            normal: report.normal,
            uv,
            surface_id: self.surface_id(report.entity, uv),
        }
    }

    pub fn surface_id(&self, entity: Entity, uv: Vec2) -> u8 {
        match self.surfaces.get(entity) {
            Ok((_, _, _, _, surface, material)) => {
                identity::resolve_surface_id(surface, |name| self.material_map(material?, name), uv)
            }
            Err(_) => 0,
        }
    }

    /// The named material texture as a grayscale map, converted once per image.
    fn material_map(&self, material: &SurfaceMaterial, name: &str) -> Option<Arc<GrayscaleMap>> {
        let handle = material.texture(name)?;
        let image = self.images.as_deref()?.get(handle)?;
        let map = self.map_cache.get_or_convert(handle.id(), image);
        if map.is_none() {
            warn_once!("surface map `{name}` has no readable pixel data; using the default surface");
        }
        map
    }

    pub fn resolve_barycentric(&self, entity: Entity, triangle: usize, barycentric: Vec3) -> Vec2 {
        let Some(snapshot) = self.snapshot(entity) else {
            return Vec2::ZERO;
        };
        cpu::resolve_barycentric(snapshot.geometry(), triangle, barycentric)
    }

    /// Probe-ray mode with the configured backend.
    pub fn resolve_uv(&self, entity: Entity, point: Vec3, normal: Vec3) -> Vec2 {
        let tunables = &*self.tunables;
        let reach = match tunables.hit_resolver {
            HitResolverBackend::Cpu => tunables.probe_max_distance(),
            HitResolverBackend::Gpu => tunables.gpu_max_distance,
        };
        let Some(ray) = HitRay::probe(point, normal, tunables.probe_offset, reach) else {
            debug!("zero-length hit normal on {entity}, UV resolve skipped");
            return Vec2::ZERO;
        };
        self.resolve_ray(entity, &ray, tunables.hit_resolver)
    }

    pub fn resolve_ray(&self, entity: Entity, ray: &HitRay, backend: HitResolverBackend) -> Vec2 {
        let Ok((_, transform, batched, _, _, _)) = self.surfaces.get(entity) else {
            return Vec2::ZERO;
        };
        let local_to_world = transform.map_or(Affine3A::IDENTITY, GlobalTransform::affine);
        let Some(snapshot) = self.snapshot(entity) else {
            return Vec2::ZERO;
        };

        match backend {
            HitResolverBackend::Cpu => {
                cpu::resolve_ray(snapshot.geometry(), &local_to_world, ray).unwrap_or_else(|| {
                    if !snapshot.geometry().has_uvs() {
                        warn_once!("struck mesh on {entity} has no UV attribute; UV resolves to zero");
                    }
                    Vec2::ZERO
                })
            }
            HitResolverBackend::Gpu => {
                let precision = self.tunables.vertex_precision;
                match &snapshot {
                    Snapshot::Cached(id, geometry) => gpu::resolve_ray(
                        &self.device,
                        &self.gpu_cache,
                        *id,
                        geometry,
                        batched,
                        &local_to_world,
                        ray,
                        precision,
                    ),
                    Snapshot::Transient(geometry) => {
                        gpu::resolve_snapshot(&self.device, geometry, &local_to_world, ray, precision)
                    }
                }
            }
        }
    }

    fn snapshot(&self, entity: Entity) -> Option<Snapshot> {
        let (mesh, _, _, pose, _, _) = self.surfaces.get(entity).ok()?;
        let Some(meshes) = self.meshes.as_deref() else {
            warn_once!("no mesh assets available; surface UVs resolve to zero");
            return None;
        };

        if let Some(pose) = pose {
            let baked = meshes.get(&pose.mesh)?;
            return match MeshGeometry::from_mesh(baked) {
                Ok(geometry) => Some(Snapshot::Transient(geometry)),
                Err(err) => {
                    warn_once!("skinned pose on {entity} unusable: {err}");
                    None
                }
            };
        }

        let id = mesh?.0.id();
        let asset = meshes.get(id)?;
        match self.geometry_cache.get_or_build(id, asset) {
            Ok(geometry) => Some(Snapshot::Cached(id, geometry)),
            Err(err) => {
                warn_once!("mesh {id:?} unusable for hit resolve: {err}");
                None
            }
        }
    }
}

/// Share the renderer's device with the GPU resolver, unless a device was
/// attached already.
fn attach_render_device(
    render_device: Option<Res<RenderDevice>>,
    render_queue: Option<Res<RenderQueue>>,
    mut compute: ResMut<ComputeDevice>,
    tunables: Res<Tunables>,
) {
    if compute.is_available() {
        return;
    }
    match (render_device, render_queue) {
        (Some(device), Some(queue)) => {
            *compute = ComputeDevice::from_render(&device, &queue);
            info!("GPU hit resolver attached to the render device");
        }
        _ if tunables.hit_resolver == HitResolverBackend::Gpu => {
            warn!("no render device; GPU hit resolves return zero UVs");
        }
        _ => {}
    }
}

/// Drop cached geometry and buffers for meshes that changed or went away.
fn invalidate_changed_meshes(
    mut events: MessageReader<AssetEvent<Mesh>>,
    geometry_cache: Res<MeshGeometryCache>,
    gpu_cache: Res<GpuMeshCache>,
    device: Res<ComputeDevice>,
) {
    for event in events.read() {
        let id = match event {
            AssetEvent::Modified { id } | AssetEvent::Removed { id } | AssetEvent::Unused { id } => *id,
            _ => continue,
        };
        geometry_cache.invalidate(id);
        gpu_cache.invalidate(&device, id);
    }
}

fn invalidate_changed_images(mut events: MessageReader<AssetEvent<Image>>, map_cache: Res<SurfaceMapCache>) {
    for event in events.read() {
        if let AssetEvent::Modified { id } | AssetEvent::Removed { id } | AssetEvent::Unused { id } = event {
            map_cache.invalidate(*id);
        }
    }
}

/// Empty every geometry, surface-map and device-buffer cache.
pub fn clear_caches(world: &World) {
    if let Some(cache) = world.get_resource::<MeshGeometryCache>() {
        cache.clear();
    }
    if let Some(cache) = world.get_resource::<SurfaceMapCache>() {
        cache.clear();
    }
    if let (Some(cache), Some(device)) = (world.get_resource::<GpuMeshCache>(), world.get_resource::<ComputeDevice>()) {
        cache.clear(device);
    }
}

pub fn plugin(app: &mut App) {
    // A pre-inserted (standalone) device is kept.
    app.init_resource::<MeshGeometryCache>()
        .init_resource::<SurfaceMapCache>()
        .init_resource::<GpuMeshCache>()
        .init_resource::<ComputeDevice>();

    app.add_systems(Startup, attach_render_device);
    app.add_systems(
        PreUpdate,
        (
            invalidate_changed_meshes.run_if(resource_exists::<Messages<AssetEvent<Mesh>>>),
            invalidate_changed_images.run_if(resource_exists::<Messages<AssetEvent<Image>>>),
        ),
    );
}

#[cfg(test)]
mod tests;
