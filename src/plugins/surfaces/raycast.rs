//! Ray/triangle intersection (Möller–Trumbore).

use bevy::math::Affine3A;
use bevy::prelude::*;

/// Rejection threshold for near-parallel rays and hits at or behind the origin.
pub const RAY_EPSILON: f32 = 1e-6;

/// A short query ray. `direction` is normalized for world-space rays.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HitRay {
    pub origin: Vec3,
    pub direction: Vec3,
    pub max_distance: f32,
}

impl HitRay {
    pub fn new(origin: Vec3, direction: Vec3, max_distance: f32) -> Self {
        Self {
            origin,
            direction,
            max_distance,
        }
    }

    /// Ray starting `offset` outside the surface and pointing into it along `-normal`.
    /// Returns `None` for a zero-length normal.
    pub fn probe(point: Vec3, normal: Vec3, offset: f32, max_distance: f32) -> Option<Self> {
        let n = normal.try_normalize()?;
        Some(Self::new(point + n * offset, -n, max_distance))
    }

    #[inline]
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }

    /// Same ray expressed in another space (e.g. world → mesh-local).
    ///
    /// The direction is deliberately left unnormalized so the ray parameter `t`
    /// (and therefore `max_distance`) keeps meaning world units in both spaces.
    pub fn transformed(&self, m: &Affine3A) -> Option<Self> {
        let direction = m.transform_vector3(self.direction);
        if direction.length_squared() <= RAY_EPSILON * RAY_EPSILON {
            return None;
        }
        Some(Self::new(m.transform_point3(self.origin), direction, self.max_distance))
    }
}

/// An accepted triangle hit.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TriangleHit {
    /// Ray parameter of the hit point.
    pub t: f32,
    /// Weights of (v0, v1, v2); they sum to 1.
    pub barycentric: Vec3,
}

/// Möller–Trumbore. Double-sided; rejects parallel rays, hits outside the
/// triangle and hits at or behind the ray origin.
#[inline]
pub fn intersect_triangle(ray: &HitRay, v0: Vec3, v1: Vec3, v2: Vec3) -> Option<TriangleHit> {
    let e1 = v1 - v0;
    let e2 = v2 - v0;
    let p = ray.direction.cross(e2);
    let det = e1.dot(p);
    if det.abs() < RAY_EPSILON {
        return None;
    }
    let inv_det = 1.0 / det;

    let t_vec = ray.origin - v0;
    let u = t_vec.dot(p) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }

    let q = t_vec.cross(e1);
    let v = ray.direction.dot(q) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }

    let t = e2.dot(q) * inv_det;
    if t <= RAY_EPSILON || t > ray.max_distance {
        return None;
    }

    Some(TriangleHit {
        t,
        barycentric: Vec3::new(1.0 - u - v, u, v),
    })
}

#[inline]
pub fn interpolate_uv(uvs: [Vec2; 3], barycentric: Vec3) -> Vec2 {
    uvs[0] * barycentric.x + uvs[1] * barycentric.y + uvs[2] * barycentric.z
}
