//! Raw vertex/index buffer layout shared by the uploader and the kernel.

use bevy::prelude::*;
use bytemuck::{Pod, Zeroable};
use half::f16;

use crate::common::tunables::VertexPrecision;
use crate::plugins::surfaces::geometry::IndexWidth;

/// Byte layout of one interleaved vertex record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexLayout {
    pub stride: u32,
    pub position_offset: u32,
    /// Positions stored as three IEEE half floats (plus one pad) instead of f32.
    pub position_half: bool,
    /// `None` when the mesh has no texture coordinates.
    pub uv_offset: Option<u32>,
    pub uv_half: bool,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct FullVertex {
    position: [f32; 3],
    uv: [f32; 2],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct HalfVertex {
    position: [f16; 4],
    uv: [f16; 2],
}

impl VertexLayout {
    pub fn new(precision: VertexPrecision, with_uv: bool) -> Self {
        match (precision, with_uv) {
            (VertexPrecision::Full, true) => Self {
                stride: size_of::<FullVertex>() as u32,
                position_offset: 0,
                position_half: false,
                uv_offset: Some(12),
                uv_half: false,
            },
            (VertexPrecision::Full, false) => Self {
                stride: 12,
                position_offset: 0,
                position_half: false,
                uv_offset: None,
                uv_half: false,
            },
            (VertexPrecision::Half, true) => Self {
                stride: size_of::<HalfVertex>() as u32,
                position_offset: 0,
                position_half: true,
                uv_offset: Some(8),
                uv_half: true,
            },
            (VertexPrecision::Half, false) => Self {
                stride: 8,
                position_offset: 0,
                position_half: true,
                uv_offset: None,
                uv_half: false,
            },
        }
    }

    #[inline]
    pub fn vertex_count(&self, bytes: &[u8]) -> usize {
        bytes.len() / self.stride as usize
    }

    /// Position of vertex `index`, or `None` if the record is out of bounds.
    #[inline]
    pub fn read_position(&self, bytes: &[u8], index: usize) -> Option<Vec3> {
        let base = index * self.stride as usize + self.position_offset as usize;
        if self.position_half {
            let [x, y, z]: [f16; 3] = read(bytes, base)?;
            Some(Vec3::new(x.to_f32(), y.to_f32(), z.to_f32()))
        } else {
            read::<[f32; 3]>(bytes, base).map(Vec3::from_array)
        }
    }

    #[inline]
    pub fn read_uv(&self, bytes: &[u8], index: usize) -> Option<Vec2> {
        let base = index * self.stride as usize + self.uv_offset? as usize;
        if self.uv_half {
            let [u, v]: [f16; 2] = read(bytes, base)?;
            Some(Vec2::new(u.to_f32(), v.to_f32()))
        } else {
            read::<[f32; 2]>(bytes, base).map(Vec2::from_array)
        }
    }
}

#[inline]
fn read<T: Pod>(bytes: &[u8], offset: usize) -> Option<T> {
    let slice = bytes.get(offset..offset + size_of::<T>())?;
    Some(bytemuck::pod_read_unaligned(slice))
}

/// Interleave positions (and UVs when present) into one raw vertex buffer.
pub fn pack_vertices(positions: &[Vec3], uvs: Option<&[Vec2]>, precision: VertexPrecision) -> (Vec<u8>, VertexLayout) {
    let layout = VertexLayout::new(precision, uvs.is_some());
    let mut bytes = Vec::with_capacity(positions.len() * layout.stride as usize);

    for (i, p) in positions.iter().enumerate() {
        let uv = uvs.map(|uvs| uvs[i]);
        match (precision, uv) {
            (VertexPrecision::Full, Some(uv)) => bytes.extend_from_slice(bytemuck::bytes_of(&FullVertex {
                position: p.to_array(),
                uv: uv.to_array(),
            })),
            (VertexPrecision::Full, None) => bytes.extend_from_slice(bytemuck::bytes_of(&p.to_array())),
            (VertexPrecision::Half, Some(uv)) => bytes.extend_from_slice(bytemuck::bytes_of(&HalfVertex {
                position: half3(*p),
                uv: [f16::from_f32(uv.x), f16::from_f32(uv.y)],
            })),
            (VertexPrecision::Half, None) => bytes.extend_from_slice(bytemuck::bytes_of(&half3(*p))),
        }
    }
    (bytes, layout)
}

#[inline]
fn half3(p: Vec3) -> [f16; 4] {
    [f16::from_f32(p.x), f16::from_f32(p.y), f16::from_f32(p.z), f16::ZERO]
}

/// Raw index buffer in the requested width.
pub fn pack_indices(indices: &[u32], width: IndexWidth) -> Vec<u8> {
    match width {
        IndexWidth::U16 => {
            let narrow: Vec<u16> = indices.iter().map(|&i| i as u16).collect();
            bytemuck::cast_slice(&narrow).to_vec()
        }
        IndexWidth::U32 => bytemuck::cast_slice(indices).to_vec(),
    }
}

#[inline]
pub fn read_index(bytes: &[u8], width: IndexWidth, slot: usize) -> Option<usize> {
    match width {
        IndexWidth::U16 => read::<u16>(bytes, slot * 2).map(usize::from),
        IndexWidth::U32 => read::<u32>(bytes, slot * 4).map(|i| i as usize),
    }
}
