//! Immutable per-mesh snapshot used by the hit resolvers.

use bevy::mesh::{Indices, PrimitiveTopology, VertexAttributeValues};
use bevy::prelude::*;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GeometryError {
    #[error("mesh topology {0:?} is not a triangle list")]
    UnsupportedTopology(PrimitiveTopology),
    #[error("mesh has no float3 position attribute")]
    MissingPositions,
    #[error("index {index} out of range for {vertex_count} vertices")]
    IndexOutOfRange { index: u32, vertex_count: usize },
    #[error("uv count {uvs} does not match vertex count {vertices}")]
    UvCountMismatch { uvs: usize, vertices: usize },
}

/// Width of the source index buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IndexWidth {
    U16,
    U32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MeshGeometry {
    pub positions: Vec<Vec3>,
    /// `None` when the mesh carries no texture coordinates.
    pub uvs: Option<Vec<Vec2>>,
    /// Triangle list, three indices per triangle.
    pub indices: Vec<u32>,
    pub index_width: IndexWidth,
}

impl MeshGeometry {
    pub fn new(positions: Vec<Vec3>, uvs: Option<Vec<Vec2>>, indices: Vec<u32>) -> Result<Self, GeometryError> {
        let index_width = if positions.len() <= usize::from(u16::MAX) + 1 {
            IndexWidth::U16
        } else {
            IndexWidth::U32
        };
        Self::validated(positions, uvs, indices, index_width)
    }

    fn validated(
        positions: Vec<Vec3>,
        uvs: Option<Vec<Vec2>>,
        mut indices: Vec<u32>,
        index_width: IndexWidth,
    ) -> Result<Self, GeometryError> {
        if let Some(uvs) = &uvs {
            if uvs.len() != positions.len() {
                return Err(GeometryError::UvCountMismatch {
                    uvs: uvs.len(),
                    vertices: positions.len(),
                });
            }
        }
        if let Some(&index) = indices.iter().find(|&&i| i as usize >= positions.len()) {
            return Err(GeometryError::IndexOutOfRange {
                index,
                vertex_count: positions.len(),
            });
        }
        // A dangling partial triangle is ignored.
        indices.truncate(indices.len() / 3 * 3);

        Ok(Self {
            positions,
            uvs,
            indices,
            index_width,
        })
    }

    /// Snapshot vertex positions, UV0 and triangle indices of a Bevy mesh.
    pub fn from_mesh(mesh: &Mesh) -> Result<Self, GeometryError> {
        let topology = mesh.primitive_topology();
        if topology != PrimitiveTopology::TriangleList {
            return Err(GeometryError::UnsupportedTopology(topology));
        }

        let positions: Vec<Vec3> = match mesh.attribute(Mesh::ATTRIBUTE_POSITION) {
            Some(VertexAttributeValues::Float32x3(values)) => {
                values.iter().map(|p| Vec3::from_array(*p)).collect()
            }
            _ => return Err(GeometryError::MissingPositions),
        };

        let uvs = match mesh.attribute(Mesh::ATTRIBUTE_UV_0) {
            Some(VertexAttributeValues::Float32x2(values)) => {
                Some(values.iter().map(|uv| Vec2::from_array(*uv)).collect())
            }
            _ => None,
        };

        let (indices, index_width) = match mesh.indices() {
            Some(Indices::U16(values)) => (values.iter().map(|&i| u32::from(i)).collect(), IndexWidth::U16),
            Some(Indices::U32(values)) => (values.clone(), IndexWidth::U32),
            None => {
                let count = positions.len() as u32;
                let width = if count <= u32::from(u16::MAX) + 1 {
                    IndexWidth::U16
                } else {
                    IndexWidth::U32
                };
                ((0..count).collect(), width)
            }
        };

        Self::validated(positions, uvs, indices, index_width)
    }

    #[inline]
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    #[inline]
    pub fn has_uvs(&self) -> bool {
        self.uvs.is_some()
    }

    #[inline]
    pub fn triangle(&self, triangle: usize) -> Option<[usize; 3]> {
        let base = triangle.checked_mul(3)?;
        let tri = self.indices.get(base..base + 3)?;
        Some([tri[0] as usize, tri[1] as usize, tri[2] as usize])
    }

    #[inline]
    pub fn triangle_positions(&self, triangle: usize) -> Option<[Vec3; 3]> {
        let [a, b, c] = self.triangle(triangle)?;
        Some([self.positions[a], self.positions[b], self.positions[c]])
    }

    #[inline]
    pub fn triangle_uvs(&self, triangle: usize) -> Option<[Vec2; 3]> {
        let uvs = self.uvs.as_ref()?;
        let [a, b, c] = self.triangle(triangle)?;
        Some([uvs[a], uvs[b], uvs[c]])
    }
}
