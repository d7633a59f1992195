use std::sync::Arc;

use bevy::asset::RenderAssetUsages;
use bevy::mesh::{Indices, PrimitiveTopology};
use bevy::prelude::*;
use bevy::render::render_resource::{Extent3d, TextureDimension, TextureFormat};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::cpu::{self, MeshGeometryCache};
use super::geometry::{GeometryError, IndexWidth, MeshGeometry};
use super::gpu::device::{ComputeDevice, DeviceError};
use super::gpu::{self, CoordinateSpace, GpuMeshCache, UploadError};
use super::identity::{self, GrayscaleMap, ImpactSurface, SurfaceMapCache, SurfaceMaterial};
use super::raycast::{intersect_triangle, HitRay};
use super::*;
use crate::common::test_utils::run_system_once;
use crate::common::tunables::{HitResolverBackend, Tunables, VertexPrecision};

const EPS: f32 = 1e-4;

fn unit_triangle() -> MeshGeometry {
    MeshGeometry::new(
        vec![Vec3::ZERO, Vec3::X, Vec3::Y],
        Some(vec![Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0), Vec2::new(0.0, 1.0)]),
        vec![0, 1, 2],
    )
    .expect("valid triangle")
}

fn quad_geometry() -> MeshGeometry {
    MeshGeometry::new(
        vec![
            Vec3::new(-1.0, -1.0, 0.0),
            Vec3::new(1.0, -1.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(-1.0, 1.0, 0.0),
        ],
        Some(vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(0.0, 1.0),
        ]),
        vec![0, 1, 2, 0, 2, 3],
    )
    .expect("valid quad")
}

fn quad_mesh(uv_shift: f32) -> Mesh {
    let uvs: Vec<[f32; 2]> = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]
        .into_iter()
        .map(|[u, v]| [u * 0.5 + uv_shift, v * 0.5])
        .collect();
    Mesh::new(PrimitiveTopology::TriangleList, RenderAssetUsages::default())
        .with_inserted_attribute(
            Mesh::ATTRIBUTE_POSITION,
            vec![[-1.0, -1.0, 0.0], [1.0, -1.0, 0.0], [1.0, 1.0, 0.0], [-1.0, 1.0, 0.0]],
        )
        .with_inserted_attribute(Mesh::ATTRIBUTE_UV_0, uvs)
        .with_inserted_indices(Indices::U16(vec![0, 1, 2, 0, 2, 3]))
}

fn quad_transform() -> Affine3A {
    Affine3A::from_scale_rotation_translation(
        Vec3::splat(2.0),
        Quat::from_rotation_y(std::f32::consts::FRAC_PI_2),
        Vec3::new(5.0, 2.0, -3.0),
    )
}

fn inward_ray(point: Vec3, normal: Vec3) -> HitRay {
    HitRay::probe(point, normal, 0.01, 0.03).expect("non-zero normal")
}

// ---------------------------------------------------------------------------
// Ray/triangle
// ---------------------------------------------------------------------------

#[test]
fn ray_at_known_barycentric_point_returns_interpolated_uv() {
    let geometry = unit_triangle();
    // Weights (0.2, 0.3, 0.5) land on (0.3, 0.5).
    let ray = inward_ray(Vec3::new(0.3, 0.5, 0.0), Vec3::Z);

    let uv = cpu::resolve_ray(&geometry, &Affine3A::IDENTITY, &ray).expect("hit");
    assert!((uv - Vec2::new(0.3, 0.5)).length() < EPS, "uv = {uv}");

    let (_, hit) = cpu::nearest_triangle(&geometry, &Affine3A::IDENTITY, &ray).expect("hit");
    assert!((hit.barycentric - Vec3::new(0.2, 0.3, 0.5)).length() < EPS);
    assert!((hit.t - 0.01).abs() < EPS);
}

#[test]
fn rays_outside_the_triangle_miss() {
    let geometry = unit_triangle();
    // u + v > 1
    assert!(cpu::resolve_ray(&geometry, &Affine3A::IDENTITY, &inward_ray(Vec3::new(0.8, 0.8, 0.0), Vec3::Z)).is_none());
    // u < 0
    assert!(cpu::resolve_ray(&geometry, &Affine3A::IDENTITY, &inward_ray(Vec3::new(-0.1, 0.5, 0.0), Vec3::Z)).is_none());
}

#[test]
fn parallel_behind_and_out_of_reach_rays_are_rejected() {
    let [v0, v1, v2] = [Vec3::ZERO, Vec3::X, Vec3::Y];

    let parallel = HitRay::new(Vec3::new(0.2, 0.2, 0.5), Vec3::X, 10.0);
    assert!(intersect_triangle(&parallel, v0, v1, v2).is_none());

    let behind = HitRay::new(Vec3::new(0.2, 0.2, -0.5), Vec3::NEG_Z, 10.0);
    assert!(intersect_triangle(&behind, v0, v1, v2).is_none());

    let short = HitRay::new(Vec3::new(0.2, 0.2, 0.5), Vec3::NEG_Z, 0.4);
    assert!(intersect_triangle(&short, v0, v1, v2).is_none());
}

#[test]
fn zero_normal_gives_no_inward_ray() {
    assert!(HitRay::probe(Vec3::ONE, Vec3::ZERO, 0.01, 0.03).is_none());
}

#[test]
fn nearest_of_stacked_triangles_wins_regardless_of_order() {
    let positions = vec![
        Vec3::new(0.0, 0.0, -0.5),
        Vec3::new(1.0, 0.0, -0.5),
        Vec3::new(0.0, 1.0, -0.5),
        Vec3::ZERO,
        Vec3::X,
        Vec3::Y,
    ];
    let uvs = vec![Vec2::splat(0.9); 3].into_iter().chain(vec![Vec2::splat(0.1); 3]).collect();
    let geometry = MeshGeometry::new(positions, Some(uvs), vec![0, 1, 2, 3, 4, 5]).unwrap();

    let ray = HitRay::new(Vec3::new(0.25, 0.25, 1.0), Vec3::NEG_Z, 5.0);
    let (triangle, _) = cpu::nearest_triangle(&geometry, &Affine3A::IDENTITY, &ray).unwrap();
    assert_eq!(triangle, 1);
    let uv = cpu::resolve_ray(&geometry, &Affine3A::IDENTITY, &ray).unwrap();
    assert!((uv - Vec2::splat(0.1)).length() < EPS);
}

#[test]
fn barycentric_mode_interpolates_directly() {
    let geometry = quad_geometry();
    let uv = cpu::resolve_barycentric(&geometry, 1, Vec3::new(0.5, 0.25, 0.25));
    // 0.5*(0,0) + 0.25*(1,1) + 0.25*(0,1)
    assert!((uv - Vec2::new(0.25, 0.5)).length() < EPS);

    assert_eq!(cpu::resolve_barycentric(&geometry, 9, Vec3::X), Vec2::ZERO);
}

// ---------------------------------------------------------------------------
// Geometry extraction
// ---------------------------------------------------------------------------

#[test]
fn geometry_from_mesh_reads_attributes_and_index_width() {
    let geometry = MeshGeometry::from_mesh(&quad_mesh(0.0)).unwrap();
    assert_eq!(geometry.triangle_count(), 2);
    assert_eq!(geometry.index_width, IndexWidth::U16);
    assert!(geometry.has_uvs());

    let wide = quad_mesh(0.0).with_inserted_indices(Indices::U32(vec![0, 1, 2]));
    let geometry = MeshGeometry::from_mesh(&wide).unwrap();
    assert_eq!(geometry.index_width, IndexWidth::U32);
    assert_eq!(geometry.triangle_count(), 1);
}

#[test]
fn geometry_rejects_bad_meshes() {
    let lines = Mesh::new(PrimitiveTopology::LineList, RenderAssetUsages::default());
    assert_eq!(
        MeshGeometry::from_mesh(&lines),
        Err(GeometryError::UnsupportedTopology(PrimitiveTopology::LineList))
    );

    let empty = Mesh::new(PrimitiveTopology::TriangleList, RenderAssetUsages::default());
    assert_eq!(MeshGeometry::from_mesh(&empty), Err(GeometryError::MissingPositions));

    let dangling = quad_mesh(0.0).with_inserted_indices(Indices::U16(vec![0, 1, 9]));
    assert!(matches!(
        MeshGeometry::from_mesh(&dangling),
        Err(GeometryError::IndexOutOfRange { index: 9, .. })
    ));
}

#[test]
fn unindexed_mesh_uses_sequential_triangles() {
    let mut mesh = quad_mesh(0.0);
    mesh.remove_indices();
    let geometry = MeshGeometry::from_mesh(&mesh).unwrap();
    // Four vertices: one whole triangle, the rest is dropped.
    assert_eq!(geometry.triangle_count(), 1);
    assert_eq!(geometry.triangle(0), Some([0, 1, 2]));
}

// ---------------------------------------------------------------------------
// GPU path
// ---------------------------------------------------------------------------

fn random_case(rng: &mut ChaCha8Rng) -> (MeshGeometry, HitRay) {
    let vertex_count: usize = rng.gen_range(3..48);
    let triangle_count: usize = rng.gen_range(1..40);

    let positions: Vec<Vec3> = (0..vertex_count)
        .map(|_| Vec3::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)))
        .collect();
    let uvs: Vec<Vec2> = (0..vertex_count).map(|_| Vec2::new(rng.r#gen(), rng.r#gen())).collect();
    let indices: Vec<u32> = (0..triangle_count)
        .flat_map(|_| rand::seq::index::sample(rng, vertex_count, 3).into_iter().map(|i| i as u32))
        .collect();
    let geometry = MeshGeometry::new(positions, Some(uvs), indices).unwrap();

    // Aim most rays at a point inside a random triangle; the rest go anywhere.
    let origin = Vec3::new(rng.gen_range(-3.0..3.0), rng.gen_range(-3.0..3.0), rng.gen_range(-3.0..3.0));
    let direction = if rng.gen_bool(0.8) {
        let [a, b, c] = geometry.triangle_positions(rng.gen_range(0..triangle_count)).unwrap();
        let (u, v): (f32, f32) = (rng.gen_range(0.05..0.45), rng.gen_range(0.05..0.45));
        let target = a * (1.0 - u - v) + b * u + c * v;
        target - origin
    } else {
        Vec3::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0))
    };
    let direction = direction.try_normalize().unwrap_or(Vec3::Z);
    (geometry, HitRay::new(origin, direction, 10.0))
}

/// A standalone compute device, or `None` (and a note on stderr) on machines
/// without an adapter.
fn gpu_device() -> Option<ComputeDevice> {
    let device = ComputeDevice::request_standalone();
    if device.is_none() {
        eprintln!("skipping: no compute adapter");
    }
    device
}

#[test]
fn cpu_and_gpu_agree_on_randomized_meshes() {
    let Some(device) = gpu_device() else { return };
    let mut rng = ChaCha8Rng::seed_from_u64(0xba11);
    let mut hits = 0;

    for case in 0..200 {
        let (geometry, ray) = random_case(&mut rng);
        let cpu_uv = cpu::resolve_ray(&geometry, &Affine3A::IDENTITY, &ray);

        for space in [CoordinateSpace::Local, CoordinateSpace::World] {
            let entry = gpu::upload(&device, &geometry, space, &Affine3A::IDENTITY, VertexPrecision::Full).unwrap();
            let gpu_uv = entry.dispatch(&device, &Affine3A::IDENTITY, &ray).unwrap();
            entry.release(&device);

            let expected = cpu_uv.unwrap_or(Vec2::ZERO);
            assert!(
                (expected - gpu_uv).length() < 1e-4,
                "case {case} ({space:?}): cpu {expected} gpu {gpu_uv}"
            );
        }
        if cpu_uv.is_some() {
            hits += 1;
        }
    }

    assert!(hits >= 100, "only {hits} hits");
    assert_eq!(device.live_buffers(), 0);
    assert_eq!(device.dispatch_count(), 400);
}

#[test]
fn gpu_handles_transformed_mesh_in_both_spaces() {
    let Some(device) = gpu_device() else { return };
    let geometry = quad_geometry();
    let transform = quad_transform();

    let point = transform.transform_point3(Vec3::new(0.5, -0.5, 0.0));
    let normal = transform.transform_vector3(Vec3::Z).normalize();
    let ray = inward_ray(point, normal);
    let expected = Vec2::new(0.75, 0.25);

    let cpu_uv = cpu::resolve_ray(&geometry, &transform, &ray).unwrap();
    assert!((cpu_uv - expected).length() < EPS, "cpu {cpu_uv}");

    for space in [CoordinateSpace::Local, CoordinateSpace::World] {
        let entry = gpu::upload(&device, &geometry, space, &transform, VertexPrecision::Full).unwrap();
        let uv = entry.dispatch(&device, &transform, &ray).unwrap();
        assert!((uv - expected).length() < EPS, "{space:?}: {uv}");
    }
}

#[test]
fn gpu_miss_reads_back_zero() {
    let Some(device) = gpu_device() else { return };
    let entry = gpu::upload(&device, &quad_geometry(), CoordinateSpace::Local, &Affine3A::IDENTITY, VertexPrecision::Full)
        .unwrap();
    let away = HitRay::new(Vec3::new(0.2, 0.2, 1.0), Vec3::Z, 5.0);
    assert_eq!(entry.dispatch(&device, &Affine3A::IDENTITY, &away).unwrap(), Vec2::ZERO);
    assert_eq!(device.dispatch_count(), 1);
}

#[test]
fn half_precision_stays_close() {
    let Some(device) = gpu_device() else { return };
    let geometry = quad_geometry();
    let transform = quad_transform();
    let point = transform.transform_point3(Vec3::new(-0.3, 0.6, 0.0));
    let ray = inward_ray(point, transform.transform_vector3(Vec3::Z).normalize());
    let expected = Vec2::new(0.35, 0.8);

    for space in [CoordinateSpace::Local, CoordinateSpace::World] {
        let entry = gpu::upload(&device, &geometry, space, &transform, VertexPrecision::Half).unwrap();
        let uv = entry.dispatch(&device, &transform, &ray).unwrap();
        assert!((uv - expected).length() < 1e-2, "{space:?}: {uv}");
    }
}

/// Quad scaled by two and parked far from the origin; local (0.3, -0.2) is uv (0.65, 0.4).
fn far_quad() -> (Affine3A, HitRay) {
    let transform = Affine3A::from_scale_rotation_translation(
        Vec3::splat(2.0),
        Quat::IDENTITY,
        Vec3::new(1500.3, 0.0, -700.6),
    );
    let point = transform.transform_point3(Vec3::new(0.3, -0.2, 0.0));
    let ray = HitRay::new(point + Vec3::Z * 0.01, Vec3::NEG_Z, 10.0);
    (transform, ray)
}

fn decoded(geometry: &MeshGeometry, vertices: &[u8], layout: &gpu::layout::VertexLayout) -> MeshGeometry {
    let positions = (0..geometry.positions.len())
        .map(|i| layout.read_position(vertices, i).unwrap())
        .collect();
    MeshGeometry::new(positions, geometry.uvs.clone(), geometry.indices.clone()).unwrap()
}

#[test]
fn world_space_upload_keeps_full_precision_far_from_origin() {
    let geometry = quad_geometry();
    let (transform, ray) = far_quad();
    let expected = Vec2::new(0.65, 0.4);

    let cpu_uv = cpu::resolve_ray(&geometry, &transform, &ray).unwrap();
    assert!((cpu_uv - expected).length() < 1e-3, "cpu {cpu_uv}");

    // Half floats are 1.0 apart at x = 1500: the baked plane lands behind the ray origin.
    let world: Vec<Vec3> = geometry.positions.iter().map(|p| transform.transform_point3(*p)).collect();
    let (half_bytes, half_layout) = gpu::layout::pack_vertices(&world, geometry.uvs.as_deref(), VertexPrecision::Half);
    let rounded = MeshGeometry::new(
        (0..world.len()).map(|i| half_layout.read_position(&half_bytes, i).unwrap()).collect(),
        geometry.uvs.clone(),
        geometry.indices.clone(),
    )
    .unwrap();
    assert!(cpu::resolve_ray(&rounded, &Affine3A::IDENTITY, &ray).is_none());

    // A half-precision request is upgraded for world space only.
    let packed = gpu::pack(&geometry, CoordinateSpace::World, &transform, VertexPrecision::Half).unwrap();
    assert!(!packed.layout.position_half);
    let baked = decoded(&geometry, &packed.vertices, &packed.layout);
    let uv = cpu::resolve_ray(&baked, &Affine3A::IDENTITY, &ray).unwrap();
    assert!((uv - cpu_uv).length() < 1e-3, "baked {uv}");

    let local = gpu::pack(&geometry, CoordinateSpace::Local, &transform, VertexPrecision::Half).unwrap();
    assert!(local.layout.position_half);
}

#[test]
fn gpu_matches_cpu_far_from_origin() {
    let Some(device) = gpu_device() else { return };
    let geometry = quad_geometry();
    let (transform, ray) = far_quad();
    let cache = GpuMeshCache::default();
    let mut meshes = Assets::<Mesh>::default();
    let id = meshes.add(quad_mesh(0.0)).id();

    let cpu_uv = cpu::resolve_ray(&geometry, &transform, &ray).unwrap();
    for batched in [true, false] {
        let uv = gpu::resolve_ray(&device, &cache, id, &geometry, batched, &transform, &ray, VertexPrecision::Half);
        assert!((uv - cpu_uv).length() < 1e-2, "batched {batched}: gpu {uv} cpu {cpu_uv}");
    }
}

#[test]
fn gpu_without_an_adapter_resolves_zero() {
    let device = ComputeDevice::default();
    let cache = GpuMeshCache::default();
    let mut meshes = Assets::<Mesh>::default();
    let id = meshes.add(quad_mesh(0.0)).id();
    let geometry = quad_geometry();
    let ray = inward_ray(Vec3::new(0.5, -0.5, 0.0), Vec3::Z);

    let uv = gpu::resolve_ray(&device, &cache, id, &geometry, false, &Affine3A::IDENTITY, &ray, VertexPrecision::Full);
    assert_eq!(uv, Vec2::ZERO);
    assert_eq!(
        gpu::resolve_snapshot(&device, &geometry, &Affine3A::IDENTITY, &ray, VertexPrecision::Full),
        Vec2::ZERO
    );
    assert!(cache.is_empty());
    assert_eq!(device.dispatch_count(), 0);
    assert!(matches!(
        gpu::upload(&device, &geometry, CoordinateSpace::Local, &Affine3A::IDENTITY, VertexPrecision::Full),
        Err(UploadError::Device(DeviceError::NoAdapter))
    ));
}

#[test]
fn gpu_without_uvs_fails_soft() {
    let device = ComputeDevice::request_standalone().unwrap_or_default();
    let cache = GpuMeshCache::default();
    let mut meshes = Assets::<Mesh>::default();
    let id = meshes.add(quad_mesh(0.0)).id();

    let mut geometry = quad_geometry();
    geometry.uvs = None;

    assert!(matches!(
        gpu::upload(&device, &geometry, CoordinateSpace::Local, &Affine3A::IDENTITY, VertexPrecision::Full),
        Err(UploadError::MissingUvs)
    ));
    let ray = inward_ray(Vec3::new(0.5, 0.5, 0.0), Vec3::Z);
    let uv = gpu::resolve_ray(&device, &cache, id, &geometry, false, &Affine3A::IDENTITY, &ray, VertexPrecision::Full);
    assert_eq!(uv, Vec2::ZERO);
    assert!(cache.is_empty());
    assert_eq!(device.live_buffers(), 0);
    assert!(cpu::resolve_ray(&geometry, &Affine3A::IDENTITY, &ray).is_none());
}

#[test]
fn invalidated_buffers_abandon_one_query_then_rebuild() {
    let Some(device) = gpu_device() else { return };
    let cache = GpuMeshCache::default();
    let mut meshes = Assets::<Mesh>::default();
    let id = meshes.add(quad_mesh(0.0)).id();
    let geometry = quad_geometry();
    let ray = inward_ray(Vec3::new(0.5, -0.5, 0.0), Vec3::Z);
    let expected = Vec2::new(0.75, 0.25);

    let resolve = || gpu::resolve_ray(&device, &cache, id, &geometry, false, &Affine3A::IDENTITY, &ray, VertexPrecision::Full);

    assert!((resolve() - expected).length() < EPS);
    let entry = cache.get(id, CoordinateSpace::Local).unwrap();

    // External rebuild.
    assert!(device.invalidate(entry.vertex));
    assert!(!entry.is_valid(&device));

    assert_eq!(resolve(), Vec2::ZERO);
    assert!(cache.is_empty());

    assert!((resolve() - expected).length() < EPS);
    let rebuilt = cache.get(id, CoordinateSpace::Local).unwrap();
    assert_ne!(rebuilt.vertex, entry.vertex);
}

#[test]
fn batching_change_replaces_the_cache_entry() {
    let Some(device) = gpu_device() else { return };
    let cache = GpuMeshCache::default();
    let mut meshes = Assets::<Mesh>::default();
    let id = meshes.add(quad_mesh(0.0)).id();
    let geometry = quad_geometry();
    let transform = quad_transform();
    let ray = inward_ray(
        transform.transform_point3(Vec3::new(0.5, -0.5, 0.0)),
        transform.transform_vector3(Vec3::Z).normalize(),
    );

    for batched in [false, true, false] {
        let uv = gpu::resolve_ray(&device, &cache, id, &geometry, batched, &transform, &ray, VertexPrecision::Full);
        assert!((uv - Vec2::new(0.75, 0.25)).length() < EPS);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(id, CoordinateSpace::for_batched(batched)).is_some());
        assert_eq!(device.live_buffers(), 2);
    }

    cache.clear(&device);
    assert_eq!(device.live_buffers(), 0);
}

#[test]
fn concurrent_first_lookups_share_one_geometry() {
    let cache = MeshGeometryCache::default();
    let mut meshes = Assets::<Mesh>::default();
    let id = meshes.add(quad_mesh(0.0)).id();
    let mesh = meshes.get(id).unwrap();

    let built: Vec<Arc<MeshGeometry>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8).map(|_| scope.spawn(|| cache.get_or_build(id, mesh).unwrap())).collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(cache.len(), 1);
    assert!(built.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
}

// ---------------------------------------------------------------------------
// Surface identity
// ---------------------------------------------------------------------------

#[test]
fn luma_rounds_and_clamps_to_a_byte() {
    assert_eq!(identity::luma_to_surface_id(0.5), 128);
    assert_eq!(identity::luma_to_surface_id(-0.2), 0);
    assert_eq!(identity::luma_to_surface_id(1.7), 255);
    assert_eq!(identity::luma_to_surface_id(f32::NAN), 0);
    assert_eq!(GrayscaleMap::uniform(42).surface_id_at(Vec2::new(0.3, 0.9)), 42);
}

#[test]
fn bilinear_sampling_uses_texel_centres_and_wraps() {
    let map = GrayscaleMap::from_luma(2, 1, vec![0.0, 1.0]).unwrap();
    assert_eq!(map.surface_id_at(Vec2::new(0.25, 0.5)), 0);
    assert_eq!(map.surface_id_at(Vec2::new(0.75, 0.5)), 255);
    assert_eq!(map.surface_id_at(Vec2::new(0.5, 0.5)), 128);
    // Halfway between texel 0 and the wrapped texel 1.
    assert_eq!(map.surface_id_at(Vec2::new(0.0, 0.5)), 128);

    assert!(GrayscaleMap::from_luma(2, 2, vec![0.0; 3]).is_none());
}

fn image(width: u32, height: u32, format: TextureFormat, data: Vec<u8>) -> Image {
    Image::new(
        Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        TextureDimension::D2,
        data,
        format,
        RenderAssetUsages::default(),
    )
}

#[test]
fn image_maps_read_stored_levels_as_luma() {
    let r8 = GrayscaleMap::from_image(&image(2, 1, TextureFormat::R8Unorm, vec![40, 200])).unwrap();
    assert_eq!((r8.width(), r8.height()), (2, 1));
    assert_eq!(r8.surface_id_at(Vec2::new(0.25, 0.5)), 40);
    assert_eq!(r8.surface_id_at(Vec2::new(0.75, 0.5)), 200);

    // sRGB texels are taken as encoded; linearizing would turn 40 into 5.
    let gray = image(1, 1, TextureFormat::Rgba8UnormSrgb, vec![40, 40, 40, 255]);
    assert_eq!(GrayscaleMap::from_image(&gray).unwrap().surface_id_at(Vec2::ZERO), 40);

    let red = image(1, 1, TextureFormat::Rgba8UnormSrgb, vec![255, 0, 0, 255]);
    assert_eq!(GrayscaleMap::from_image(&red).unwrap().surface_id_at(Vec2::ZERO), 76);
    let green = image(1, 1, TextureFormat::Rgba8Unorm, vec![0, 255, 0, 255]);
    assert_eq!(GrayscaleMap::from_image(&green).unwrap().surface_id_at(Vec2::ZERO), 150);

    let mut unreadable = image(1, 1, TextureFormat::R8Unorm, vec![9]);
    unreadable.data = None;
    assert!(GrayscaleMap::from_image(&unreadable).is_none());
}

#[test]
fn map_cache_converts_once_and_forgets_on_invalidate() {
    let cache = SurfaceMapCache::default();
    let mut images = Assets::<Image>::default();
    let id = images.add(image(1, 1, TextureFormat::R8Unorm, vec![30])).id();
    let image = images.get(id).unwrap();

    let first = cache.get_or_convert(id, image).unwrap();
    let second = cache.get_or_convert(id, image).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(cache.len(), 1);

    assert!(cache.invalidate(id));
    assert!(cache.is_empty());
    assert!(!cache.invalidate(id));
}

#[test]
fn surface_id_discovery_order() {
    let material_map = |name: &str| match name {
        "surface_id_map" => Some(Arc::new(GrayscaleMap::uniform(20))),
        "custom" => Some(Arc::new(GrayscaleMap::uniform(30))),
        _ => None,
    };
    let uv = Vec2::splat(0.5);

    let explicit = ImpactSurface {
        map: Some(Arc::new(GrayscaleMap::uniform(10))),
        ..ImpactSurface::constant(99)
    };
    assert_eq!(identity::resolve_surface_id(Some(&explicit), material_map, uv), 10);

    let by_property = ImpactSurface {
        material_property: "custom".into(),
        ..ImpactSurface::constant(99)
    };
    assert_eq!(identity::resolve_surface_id(Some(&by_property), material_map, uv), 30);

    let missing_property = ImpactSurface {
        material_property: "nope".into(),
        ..ImpactSurface::constant(99)
    };
    assert_eq!(identity::resolve_surface_id(Some(&missing_property), material_map, uv), 99);
    assert_eq!(identity::resolve_surface_id(Some(&ImpactSurface::constant(99)), |_| None, uv), 99);

    assert_eq!(identity::resolve_surface_id(None, material_map, uv), 20);
    assert_eq!(identity::resolve_surface_id(None, |_| None, uv), 0);
}

// ---------------------------------------------------------------------------
// SurfaceHitQuery
// ---------------------------------------------------------------------------

/// Resources for `SurfaceHitQuery`. The GPU backend gets a standalone device;
/// `None` when the machine has no adapter.
fn surface_world(backend: HitResolverBackend) -> Option<World> {
    let device = match backend {
        HitResolverBackend::Cpu => ComputeDevice::default(),
        HitResolverBackend::Gpu => gpu_device()?,
    };
    let mut world = World::new();
    world.insert_resource(Assets::<Mesh>::default());
    world.insert_resource(Assets::<Image>::default());
    world.init_resource::<MeshGeometryCache>();
    world.init_resource::<SurfaceMapCache>();
    world.init_resource::<GpuMeshCache>();
    world.insert_resource(device);
    world.insert_resource(Tunables {
        hit_resolver: backend,
        ..default()
    });
    Some(world)
}

fn spawn_quad(world: &mut World, uv_shift: f32) -> (Entity, Handle<Mesh>) {
    let handle = world.resource_mut::<Assets<Mesh>>().add(quad_mesh(uv_shift));
    let map = GrayscaleMap::from_luma(2, 1, vec![0.0, 1.0]).unwrap();
    let entity = world
        .spawn((
            Mesh3d(handle.clone()),
            GlobalTransform::from(Transform::from_xyz(0.0, 0.0, -4.0)),
            ImpactSurface::with_map(map),
        ))
        .id();
    (entity, handle)
}

#[test]
fn hit_query_samples_uv_and_surface_with_both_backends() {
    for backend in [HitResolverBackend::Cpu, HitResolverBackend::Gpu] {
        let Some(mut world) = surface_world(backend) else { continue };
        let (entity, _) = spawn_quad(&mut world, 0.0);

        // Local (0.5, 0) → uv (0.375, 0.25) on the half-size UV rect.
        let report = HitReport::new(entity, Vec3::new(0.5, 0.0, -4.0), Vec3::Z);
        let sample = run_system_once(&mut world, move |hits: SurfaceHitQuery| hits.sample(&report));

        assert!((sample.uv - Vec2::new(0.375, 0.25)).length() < EPS, "{backend:?}: {}", sample.uv);
        assert_eq!(sample.point, report.point);
        // u = 0.375 → fx = 0.25 → luma 0.25
        assert_eq!(sample.surface_id, 64);
        assert_eq!(world.resource::<MeshGeometryCache>().len(), 1);
    }
}

#[test]
fn hit_query_prefers_reported_triangle() {
    // Barycentric mode never touches the device, so none is needed.
    let mut world = surface_world(HitResolverBackend::Cpu).unwrap();
    world.resource_mut::<Tunables>().hit_resolver = HitResolverBackend::Gpu;
    let (entity, _) = spawn_quad(&mut world, 0.0);

    let report = HitReport::new(entity, Vec3::new(9.0, 9.0, 9.0), Vec3::Z).with_feature(0, Vec3::new(0.0, 1.0, 0.0));
    let sample = run_system_once(&mut world, move |hits: SurfaceHitQuery| hits.sample(&report));
    assert!((sample.uv - Vec2::new(0.5, 0.0)).length() < EPS);
    assert_eq!(world.resource::<ComputeDevice>().dispatch_count(), 0);
}

#[test]
fn hit_query_degrades_to_zero() {
    let mut world = surface_world(HitResolverBackend::Cpu).unwrap();
    let (entity, _) = spawn_quad(&mut world, 0.0);
    let bare = world.spawn(Transform::default()).id();

    let zero_normal = HitReport::new(entity, Vec3::new(0.5, 0.0, -4.0), Vec3::ZERO);
    let no_mesh = HitReport::new(bare, Vec3::ZERO, Vec3::Y);
    let (a, b) = run_system_once(&mut world, move |hits: SurfaceHitQuery| {
        (hits.sample(&zero_normal), hits.sample(&no_mesh))
    });
    assert_eq!(a.uv, Vec2::ZERO);
    assert_eq!(b.uv, Vec2::ZERO);
    assert_eq!(b.surface_id, 0);
}

#[test]
fn skinned_pose_is_resampled_every_query() {
    for backend in [HitResolverBackend::Cpu, HitResolverBackend::Gpu] {
        let Some(mut world) = surface_world(backend) else { continue };
        let (entity, handle) = spawn_quad(&mut world, 0.0);
        world.entity_mut(entity).insert(SkinnedPose { mesh: handle.clone() });

        let report = HitReport::new(entity, Vec3::new(0.5, 0.0, -4.0), Vec3::Z);
        let first = run_system_once(&mut world, move |hits: SurfaceHitQuery| hits.sample(&report));
        assert!((first.uv - Vec2::new(0.375, 0.25)).length() < EPS);

        // Animation rewrites the pose in place.
        *world.resource_mut::<Assets<Mesh>>().get_mut(&handle).unwrap() = quad_mesh(0.25);
        let second = run_system_once(&mut world, move |hits: SurfaceHitQuery| hits.sample(&report));
        assert!((second.uv - Vec2::new(0.625, 0.25)).length() < EPS, "{backend:?}: {}", second.uv);

        assert!(world.resource::<MeshGeometryCache>().is_empty());
        assert!(world.resource::<GpuMeshCache>().is_empty());
        assert_eq!(world.resource::<ComputeDevice>().live_buffers(), 0);
    }
}

#[test]
fn hit_query_samples_material_images() {
    let mut world = surface_world(HitResolverBackend::Cpu).unwrap();
    let mesh = world.resource_mut::<Assets<Mesh>>().add(quad_mesh(0.0));
    let (default_map, custom_map) = {
        let mut images = world.resource_mut::<Assets<Image>>();
        (
            images.add(image(2, 1, TextureFormat::R8Unorm, vec![40, 200])),
            images.add(image(1, 1, TextureFormat::Rgba8UnormSrgb, vec![255, 0, 0, 255])),
        )
    };
    let material = SurfaceMaterial::default()
        .with_texture(identity::DEFAULT_MATERIAL_PROPERTY, default_map.clone())
        .with_texture("custom", custom_map);
    let transform = GlobalTransform::from(Transform::from_xyz(0.0, 0.0, -4.0));
    let plain = world.spawn((Mesh3d(mesh.clone()), transform, material.clone())).id();
    let custom = world
        .spawn((
            Mesh3d(mesh),
            transform,
            material,
            ImpactSurface {
                material_property: "custom".into(),
                ..ImpactSurface::constant(99)
            },
        ))
        .id();

    // uv (0.375, 0.25) sits a quarter of the way from 40 to 200.
    let reports = [
        HitReport::new(plain, Vec3::new(0.5, 0.0, -4.0), Vec3::Z),
        HitReport::new(custom, Vec3::new(0.5, 0.0, -4.0), Vec3::Z),
    ];
    let ids = run_system_once(&mut world, move |hits: SurfaceHitQuery| reports.map(|r| hits.sample(&r).surface_id));
    assert_eq!(ids, [80, 76]);
    assert_eq!(world.resource::<SurfaceMapCache>().len(), 2);

    // Editing the image takes effect once the cache entry is dropped.
    world
        .resource_mut::<Assets<Image>>()
        .insert(&default_map, image(1, 1, TextureFormat::R8Unorm, vec![10]))
        .unwrap();
    world.resource::<SurfaceMapCache>().invalidate(default_map.id());
    let id = run_system_once(&mut world, move |hits: SurfaceHitQuery| hits.sample(&reports[0]).surface_id);
    assert_eq!(id, 10);
}
