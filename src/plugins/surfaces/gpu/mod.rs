//! GPU hit resolver: per-mesh raw storage buffers on the compute device and a
//! nearest-triangle compute kernel.
//!
//! Entries are keyed by mesh and coordinate space. A `StaticBatched` mesh has its
//! vertices uploaded already transformed to world space; every other mesh is
//! uploaded in local space and the query ray is moved into mesh space instead.
//! World-space vertices always use full precision: half floats at world offsets
//! move the surface further than rays start outside it.

pub mod device;
pub mod kernel;
pub mod layout;

use std::sync::{Arc, Mutex, PoisonError};

use bevy::log::warn_once;
use bevy::platform::collections::HashMap;
use bevy::math::Affine3A;
use bevy::prelude::*;
use thiserror::Error;

use self::device::{BufferHandle, ComputeDevice, DeviceError, DispatchError};
use self::kernel::KernelParams;
use self::layout::{pack_indices, pack_vertices, VertexLayout};
use super::geometry::{GeometryError, IndexWidth, MeshGeometry};
use super::raycast::HitRay;
use crate::common::tunables::VertexPrecision;

/// Marks a mesh whose vertices live in world space (static batching).
#[derive(Component, Debug, Default, Clone, Copy)]
pub struct StaticBatched;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CoordinateSpace {
    Local,
    World,
}

impl CoordinateSpace {
    pub fn for_batched(batched: bool) -> Self {
        if batched { Self::World } else { Self::Local }
    }

    fn other(self) -> Self {
        match self {
            Self::Local => Self::World,
            Self::World => Self::Local,
        }
    }
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("mesh has no texture-coordinate attribute")]
    MissingUvs,
    #[error("mesh has no triangles")]
    EmptyMesh,
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Buffer handles and attribute layout of one uploaded mesh.
#[derive(Debug, Clone, Copy)]
pub struct GpuMeshEntry {
    pub vertex: BufferHandle,
    pub index: BufferHandle,
    pub layout: VertexLayout,
    pub triangle_count: u32,
    pub index_width: IndexWidth,
    pub space: CoordinateSpace,
}

impl GpuMeshEntry {
    pub fn is_valid(&self, device: &ComputeDevice) -> bool {
        device.is_valid(self.vertex) && device.is_valid(self.index)
    }

    pub fn release(&self, device: &ComputeDevice) {
        device.release(self.vertex);
        device.release(self.index);
    }

    /// Run the kernel for a world-space ray.
    pub fn dispatch(&self, device: &ComputeDevice, local_to_world: &Affine3A, ray: &HitRay) -> Result<Vec2, DispatchError> {
        let ray = match self.space {
            CoordinateSpace::World => *ray,
            CoordinateSpace::Local => match ray.transformed(&local_to_world.inverse()) {
                Some(ray) => ray,
                None => return Ok(Vec2::ZERO),
            },
        };
        let params = KernelParams::new(&ray, &self.layout, self.triangle_count, self.index_width);
        device.dispatch_uv_kernel(&params, self.vertex, self.index)
    }
}

/// Raw vertex and index bytes of one mesh, ready for upload.
#[derive(Debug, Clone)]
pub struct PackedMesh {
    pub vertices: Vec<u8>,
    pub indices: Vec<u8>,
    pub layout: VertexLayout,
    pub triangle_count: u32,
    pub index_width: IndexWidth,
}

/// Precision actually used for `space`.
pub fn effective_precision(space: CoordinateSpace, requested: VertexPrecision) -> VertexPrecision {
    match space {
        CoordinateSpace::Local => requested,
        CoordinateSpace::World => VertexPrecision::Full,
    }
}

/// Pack `geometry` into raw buffer bytes. World-space entries bake
/// `local_to_world` into the vertices.
pub fn pack(
    geometry: &MeshGeometry,
    space: CoordinateSpace,
    local_to_world: &Affine3A,
    precision: VertexPrecision,
) -> Result<PackedMesh, UploadError> {
    let Some(uvs) = geometry.uvs.as_deref() else {
        return Err(UploadError::MissingUvs);
    };
    if geometry.triangle_count() == 0 {
        return Err(UploadError::EmptyMesh);
    }

    let world_positions;
    let positions: &[Vec3] = match space {
        CoordinateSpace::Local => &geometry.positions,
        CoordinateSpace::World => {
            world_positions = geometry
                .positions
                .iter()
                .map(|p| local_to_world.transform_point3(*p))
                .collect::<Vec<_>>();
            &world_positions
        }
    };

    let (vertices, layout) = pack_vertices(positions, Some(uvs), effective_precision(space, precision));
    Ok(PackedMesh {
        vertices,
        indices: pack_indices(&geometry.indices, geometry.index_width),
        layout,
        triangle_count: geometry.triangle_count() as u32,
        index_width: geometry.index_width,
    })
}

/// Pack `geometry` and create its storage buffers on `device`.
pub fn upload(
    device: &ComputeDevice,
    geometry: &MeshGeometry,
    space: CoordinateSpace,
    local_to_world: &Affine3A,
    precision: VertexPrecision,
) -> Result<GpuMeshEntry, UploadError> {
    let packed = pack(geometry, space, local_to_world, precision)?;
    let vertex = device.create_buffer("hit_vertices", &packed.vertices)?;
    let index = match device.create_buffer("hit_indices", &packed.indices) {
        Ok(index) => index,
        Err(err) => {
            device.release(vertex);
            return Err(err.into());
        }
    };

    Ok(GpuMeshEntry {
        vertex,
        index,
        layout: packed.layout,
        triangle_count: packed.triangle_count,
        index_width: packed.index_width,
        space,
    })
}

/// Uploaded meshes keyed by `(mesh, coordinate space)`.
#[derive(Resource, Default, Debug)]
pub struct GpuMeshCache {
    entries: Mutex<HashMap<(AssetId<Mesh>, CoordinateSpace), GpuMeshEntry>>,
}

impl GpuMeshCache {
    /// Look up or upload the entry for `id` in `space`.
    ///
    /// Switching a mesh's batching state drops the entry for the other space.
    /// A stale entry is dropped and reported as an error; the next call uploads again.
    pub fn get_or_upload(
        &self,
        device: &ComputeDevice,
        id: AssetId<Mesh>,
        geometry: &MeshGeometry,
        space: CoordinateSpace,
        local_to_world: &Affine3A,
        precision: VertexPrecision,
    ) -> Result<GpuMeshEntry, CacheError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(previous) = entries.remove(&(id, space.other())) {
            debug!("mesh {id:?} switched to {space:?} space, dropping old buffers");
            previous.release(device);
        }

        if let Some(entry) = entries.get(&(id, space)).copied() {
            if entry.is_valid(device) {
                return Ok(entry);
            }
            entries.remove(&(id, space));
            entry.release(device);
            return Err(CacheError::Stale);
        }

        let entry = upload(device, geometry, space, local_to_world, precision)?;
        entries.insert((id, space), entry);
        Ok(entry)
    }

    pub fn get(&self, id: AssetId<Mesh>, space: CoordinateSpace) -> Option<GpuMeshEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(id, space))
            .copied()
    }

    pub fn invalidate(&self, device: &ComputeDevice, id: AssetId<Mesh>) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        for space in [CoordinateSpace::Local, CoordinateSpace::World] {
            if let Some(entry) = entries.remove(&(id, space)) {
                entry.release(device);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self, device: &ComputeDevice) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, entry) in entries.drain() {
            entry.release(device);
        }
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cached buffers were invalidated")]
    Stale,
    #[error(transparent)]
    Upload(#[from] UploadError),
}

/// Resolve a UV for a cached mesh. Every failure degrades to `Vec2::ZERO` with a warning.
#[allow(clippy::too_many_arguments)]
pub fn resolve_ray(
    device: &ComputeDevice,
    cache: &GpuMeshCache,
    id: AssetId<Mesh>,
    geometry: &MeshGeometry,
    batched: bool,
    local_to_world: &Affine3A,
    ray: &HitRay,
    precision: VertexPrecision,
) -> Vec2 {
    if !device.is_available() {
        warn_once!("no compute adapter; GPU hit resolves return zero");
        return Vec2::ZERO;
    }
    let space = CoordinateSpace::for_batched(batched);
    let entry = match cache.get_or_upload(device, id, geometry, space, local_to_world, precision) {
        Ok(entry) => entry,
        Err(CacheError::Upload(UploadError::MissingUvs)) => {
            warn_once!("mesh {id:?} has no UV attribute; GPU hit resolve returns zero");
            return Vec2::ZERO;
        }
        Err(err) => {
            warn!("GPU hit resolve for mesh {id:?} abandoned: {err}");
            return Vec2::ZERO;
        }
    };

    match entry.dispatch(device, local_to_world, ray) {
        Ok(uv) => uv,
        Err(err) => {
            warn!("GPU hit resolve for mesh {id:?} abandoned: {err}");
            cache.invalidate(device, id);
            Vec2::ZERO
        }
    }
}

/// Resolve against a transient snapshot (a skinned pose). The buffers live for
/// this one dispatch only.
pub fn resolve_snapshot(
    device: &ComputeDevice,
    geometry: &MeshGeometry,
    local_to_world: &Affine3A,
    ray: &HitRay,
    precision: VertexPrecision,
) -> Vec2 {
    if !device.is_available() {
        warn_once!("no compute adapter; GPU hit resolves return zero");
        return Vec2::ZERO;
    }
    let entry = match upload(device, geometry, CoordinateSpace::Local, local_to_world, precision) {
        Ok(entry) => entry,
        Err(err) => {
            warn_once!("GPU hit resolve on skinned snapshot skipped: {err}");
            return Vec2::ZERO;
        }
    };
    let uv = entry.dispatch(device, local_to_world, ray).unwrap_or_else(|err| {
        warn!("GPU hit resolve on skinned snapshot abandoned: {err}");
        Vec2::ZERO
    });
    entry.release(device);
    uv
}
