//! The UV hit kernel: uniform block, result slots and the compute pipelines.
//!
//! One invocation per triangle. Pass one claims the distance slot with an atomic
//! min, pass two breaks ties toward the lowest triangle index and a single
//! invocation then interpolates the winner's UVs into the UV slot.

use std::borrow::Cow;

use bevy::prelude::*;
use bytemuck::{Pod, Zeroable};

use super::layout::VertexLayout;
use crate::plugins::surfaces::geometry::IndexWidth;
use crate::plugins::surfaces::raycast::HitRay;

pub const WORKGROUP_SIZE: u32 = 64;

const SOURCE: &str = include_str!("hit_uv.wgsl");

/// Uniform block of the kernel; mirrors `Params` in `hit_uv.wgsl`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct KernelParams {
    pub ray_origin: [f32; 4],
    pub ray_direction: [f32; 4],
    pub max_distance: f32,
    pub stride: u32,
    pub position_offset: u32,
    pub position_half: u32,
    pub uv_offset: u32,
    pub uv_half: u32,
    pub triangle_count: u32,
    pub index_u16: u32,
}

impl KernelParams {
    pub const NO_UV: u32 = u32::MAX;

    pub fn new(ray: &HitRay, layout: &VertexLayout, triangle_count: u32, index_width: IndexWidth) -> Self {
        Self {
            ray_origin: ray.origin.extend(0.0).to_array(),
            ray_direction: ray.direction.extend(0.0).to_array(),
            max_distance: ray.max_distance,
            stride: layout.stride,
            position_offset: layout.position_offset,
            position_half: u32::from(layout.position_half),
            uv_offset: layout.uv_offset.unwrap_or(Self::NO_UV),
            uv_half: u32::from(layout.uv_half),
            triangle_count,
            index_u16: u32::from(index_width == IndexWidth::U16),
        }
    }

    pub fn workgroups(&self) -> u32 {
        self.triangle_count.div_ceil(WORKGROUP_SIZE)
    }
}

/// The single-element result buffers; mirrors `Slots` in `hit_uv.wgsl`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ResultSlots {
    pub distance: u32,
    pub triangle: u32,
    pub uv: [f32; 2],
}

impl ResultSlots {
    /// Written before every dispatch.
    pub const EMPTY: Self = Self {
        distance: f32::INFINITY.to_bits(),
        triangle: u32::MAX,
        uv: [0.0; 2],
    };

    pub const SIZE: u64 = size_of::<Self>() as u64;

    pub fn is_hit(&self) -> bool {
        self.triangle != u32::MAX
    }
}

/// Compiled pipelines plus the buffers every dispatch reuses.
///
/// The slot and readback buffers are shared, so dispatches must not overlap;
/// the owning device keeps this behind a mutex.
#[derive(Debug)]
pub struct UvKernel {
    pub layout: wgpu::BindGroupLayout,
    pub nearest_distance: wgpu::ComputePipeline,
    pub nearest_triangle: wgpu::ComputePipeline,
    pub resolve_uv: wgpu::ComputePipeline,
    pub params: wgpu::Buffer,
    pub slots: wgpu::Buffer,
    pub readback: wgpu::Buffer,
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

impl UvKernel {
    pub fn new(device: &wgpu::Device) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("hit_uv"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(SOURCE)),
        });

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("hit_uv_bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(size_of::<KernelParams>() as u64),
                    },
                    count: None,
                },
                storage_entry(1, true),
                storage_entry(2, true),
                storage_entry(3, false),
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("hit_uv_layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipeline = |entry_point: &str| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(entry_point),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point: Some(entry_point),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            })
        };

        Self {
            nearest_distance: pipeline("nearest_distance"),
            nearest_triangle: pipeline("nearest_triangle"),
            resolve_uv: pipeline("resolve_uv"),
            layout,
            params: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("hit_uv_params"),
                size: size_of::<KernelParams>() as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }),
            slots: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("hit_uv_slots"),
                size: ResultSlots::SIZE,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            }),
            readback: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("hit_uv_readback"),
                size: ResultSlots::SIZE,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }),
        }
    }

    /// Record the three passes for one ray against one mesh, then copy the slots out.
    pub fn record(&self, encoder: &mut wgpu::CommandEncoder, bind_group: &wgpu::BindGroup, params: &KernelParams) {
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("hit_uv_pass"),
                timestamp_writes: None,
            });
            let groups = params.workgroups();
            for (pipeline, count) in [
                (&self.nearest_distance, groups),
                (&self.nearest_triangle, groups),
                (&self.resolve_uv, 1),
            ] {
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, bind_group, &[]);
                pass.dispatch_workgroups(count, 1, 1);
            }
        }
        encoder.copy_buffer_to_buffer(&self.slots, 0, &self.readback, 0, ResultSlots::SIZE);
    }
}
