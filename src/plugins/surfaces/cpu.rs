//! CPU hit resolver: barycentric interpolation or a brute-force triangle scan.

use std::sync::{Arc, Mutex, PoisonError};

use bevy::platform::collections::HashMap;
use bevy::math::Affine3A;
use bevy::prelude::*;

use super::geometry::{GeometryError, MeshGeometry};
use super::raycast::{intersect_triangle, interpolate_uv, HitRay, TriangleHit};

/// Geometry snapshots keyed by mesh asset, built lazily on first use.
///
/// The lock covers check-then-insert so concurrent first lookups agree on one entry.
#[derive(Resource, Default, Debug)]
pub struct MeshGeometryCache {
    entries: Mutex<HashMap<AssetId<Mesh>, Arc<MeshGeometry>>>,
}

impl MeshGeometryCache {
    pub fn get_or_build(&self, id: AssetId<Mesh>, mesh: &Mesh) -> Result<Arc<MeshGeometry>, GeometryError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(geometry) = entries.get(&id) {
            return Ok(Arc::clone(geometry));
        }
        let geometry = Arc::new(MeshGeometry::from_mesh(mesh)?);
        entries.insert(id, Arc::clone(&geometry));
        Ok(geometry)
    }

    pub fn get(&self, id: AssetId<Mesh>) -> Option<Arc<MeshGeometry>> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    pub fn invalidate(&self, id: AssetId<Mesh>) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

/// Interpolate the UVs of `triangle` by weights reported from a physics query.
/// Missing UVs or an out-of-range triangle give the zero coordinate.
pub fn resolve_barycentric(geometry: &MeshGeometry, triangle: usize, barycentric: Vec3) -> Vec2 {
    geometry
        .triangle_uvs(triangle)
        .map(|uvs| interpolate_uv(uvs, barycentric))
        .unwrap_or(Vec2::ZERO)
}

/// Test every triangle (transformed to world space) against `ray` and return the
/// accepted hit closest to the ray origin, with its triangle index.
pub fn nearest_triangle(
    geometry: &MeshGeometry,
    local_to_world: &Affine3A,
    ray: &HitRay,
) -> Option<(usize, TriangleHit)> {
    let mut best: Option<(usize, TriangleHit)> = None;
    let mut best_dist = f32::MAX;

    for triangle in 0..geometry.triangle_count() {
        let Some([a, b, c]) = geometry.triangle_positions(triangle) else {
            continue;
        };
        let v0 = local_to_world.transform_point3(a);
        let v1 = local_to_world.transform_point3(b);
        let v2 = local_to_world.transform_point3(c);

        let Some(hit) = intersect_triangle(ray, v0, v1, v2) else {
            continue;
        };
        let dist = (ray.origin - ray.at(hit.t)).length_squared();
        if dist < best_dist {
            best_dist = dist;
            best = Some((triangle, hit));
        }
    }
    best
}

/// Brute-force ray mode. `None` when no triangle accepts the ray or the mesh has no UVs.
pub fn resolve_ray(geometry: &MeshGeometry, local_to_world: &Affine3A, ray: &HitRay) -> Option<Vec2> {
    if !geometry.has_uvs() {
        return None;
    }
    let (triangle, hit) = nearest_triangle(geometry, local_to_world, ray)?;
    Some(resolve_barycentric(geometry, triangle, hit.barycentric))
}
