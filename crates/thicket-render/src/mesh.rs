//! Meshes drawn by instance sets.
//!
//! An [`InstanceMesh`] is a vertex/index buffer pair split into sub-meshes,
//! plus its local-space bounds (fed to placement and culling).

use std::sync::atomic::{AtomicU64, Ordering};

use glam::Vec3;
use thicket_core::math::Aabb;
use thicket_test_utils::{GpuBuffer, RenderContext};

/// Vertex layout of a mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    /// Position only (Vec3)
    Position,
    /// Position + Normal (Vec3 + Vec3)
    PositionNormal,
}

impl VertexFormat {
    /// Get the size of a single vertex in bytes.
    pub fn vertex_size(&self) -> u64 {
        match self {
            VertexFormat::Position => 12,
            VertexFormat::PositionNormal => 24,
        }
    }

    /// Get the WGPU vertex buffer layout for this format.
    pub fn buffer_layout(&self) -> wgpu::VertexBufferLayout<'static> {
        match self {
            VertexFormat::Position => wgpu::VertexBufferLayout {
                array_stride: 12,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &[wgpu::VertexAttribute {
                    format: wgpu::VertexFormat::Float32x3,
                    offset: 0,
                    shader_location: 0,
                }],
            },
            VertexFormat::PositionNormal => wgpu::VertexBufferLayout {
                array_stride: 24,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &[
                    wgpu::VertexAttribute {
                        format: wgpu::VertexFormat::Float32x3,
                        offset: 0,
                        shader_location: 0,
                    },
                    wgpu::VertexAttribute {
                        format: wgpu::VertexFormat::Float32x3,
                        offset: 12,
                        shader_location: 1,
                    },
                ],
            },
        }
    }
}

/// A contiguous index range of a mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubMesh {
    pub index_start: u32,
    pub index_count: u32,
    pub base_vertex: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId(u64);

impl MeshId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// GPU mesh with sub-mesh metadata.
#[derive(Debug)]
pub struct InstanceMesh {
    id: MeshId,
    label: String,
    vertex_buffer: GpuBuffer,
    index_buffer: GpuBuffer,
    index_format: wgpu::IndexFormat,
    vertex_format: VertexFormat,
    sub_meshes: Vec<SubMesh>,
    bounds: Aabb,
}

impl InstanceMesh {
    /// Wrap already uploaded buffers.
    pub fn from_parts(
        label: impl Into<String>,
        vertex_buffer: GpuBuffer,
        index_buffer: GpuBuffer,
        index_format: wgpu::IndexFormat,
        vertex_format: VertexFormat,
        sub_meshes: Vec<SubMesh>,
        bounds: Aabb,
    ) -> Self {
        Self {
            id: MeshId::next(),
            label: label.into(),
            vertex_buffer,
            index_buffer,
            index_format,
            vertex_format,
            sub_meshes,
            bounds,
        }
    }

    /// Upload interleaved position/normal vertices and 32-bit indices.
    ///
    /// Bounds are computed from the positions.
    pub fn upload(
        ctx: &dyn RenderContext,
        label: &str,
        positions: &[Vec3],
        normals: &[Vec3],
        indices: &[u32],
        sub_meshes: Vec<SubMesh>,
    ) -> Self {
        let mut vertices: Vec<f32> = Vec::with_capacity(positions.len() * 6);
        for (position, normal) in positions.iter().zip(normals.iter()) {
            vertices.extend_from_slice(&position.to_array());
            vertices.extend_from_slice(&normal.to_array());
        }

        let vertex_bytes: &[u8] = bytemuck::cast_slice(&vertices);
        let index_bytes: &[u8] = bytemuck::cast_slice(indices);

        let vertex_label = format!("{label} Vertices");
        let vertex_buffer = ctx.create_buffer(&wgpu::BufferDescriptor {
            label: Some(vertex_label.as_str()),
            size: vertex_bytes.len() as u64,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        ctx.write_buffer(&vertex_buffer, 0, vertex_bytes);

        let index_label = format!("{label} Indices");
        let index_buffer = ctx.create_buffer(&wgpu::BufferDescriptor {
            label: Some(index_label.as_str()),
            size: index_bytes.len() as u64,
            usage: wgpu::BufferUsages::INDEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        ctx.write_buffer(&index_buffer, 0, index_bytes);

        let bounds = match positions.split_first() {
            Some((first, rest)) => {
                let mut bounds = Aabb::new(*first, *first);
                for position in rest {
                    bounds.encapsulate(*position);
                }
                bounds
            }
            None => Aabb::new(Vec3::ZERO, Vec3::ZERO),
        };

        Self::from_parts(
            label,
            vertex_buffer,
            index_buffer,
            wgpu::IndexFormat::Uint32,
            VertexFormat::PositionNormal,
            sub_meshes,
            bounds,
        )
    }

    /// A cube of side `size` centered at the origin, as a single sub-mesh.
    pub fn cube(ctx: &dyn RenderContext, size: f32) -> Self {
        let half = size / 2.0;
        let mut positions = Vec::with_capacity(24);
        let mut normals = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);

        for axis in 0..3 {
            for sign in [1.0f32, -1.0] {
                let mut normal = Vec3::ZERO;
                normal[axis] = sign;
                // Two tangent axes spanning the face
                let u = Vec3::from_slice(&[
                    [0.0, 1.0, 0.0],
                    [0.0, 0.0, 1.0],
                    [1.0, 0.0, 0.0],
                ][axis]);
                let v = normal.cross(u);

                let base = positions.len() as u32;
                for (du, dv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
                    positions.push((normal + u * du + v * dv) * half);
                    normals.push(normal);
                }
                indices.extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
            }
        }

        let sub_mesh = SubMesh {
            index_start: 0,
            index_count: indices.len() as u32,
            base_vertex: 0,
        };

        Self::upload(ctx, "Cube", &positions, &normals, &indices, vec![sub_mesh])
    }

    pub fn id(&self) -> MeshId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn vertex_buffer(&self) -> &GpuBuffer {
        &self.vertex_buffer
    }

    pub fn index_buffer(&self) -> &GpuBuffer {
        &self.index_buffer
    }

    pub fn index_format(&self) -> wgpu::IndexFormat {
        self.index_format
    }

    pub fn vertex_format(&self) -> VertexFormat {
        self.vertex_format
    }

    pub fn sub_meshes(&self) -> &[SubMesh] {
        &self.sub_meshes
    }

    pub fn sub_mesh_count(&self) -> u32 {
        self.sub_meshes.len() as u32
    }

    pub fn sub_mesh(&self, index: u32) -> Option<&SubMesh> {
        self.sub_meshes.get(index as usize)
    }

    /// Local-space bounds.
    pub fn bounds(&self) -> Aabb {
        self.bounds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_sizes_match_layouts() {
        for format in [VertexFormat::Position, VertexFormat::PositionNormal] {
            assert_eq!(format.vertex_size(), format.buffer_layout().array_stride);
        }
    }

    #[cfg(feature = "mock")]
    #[test]
    fn test_cube() {
        use thicket_test_utils::MockRenderContext;

        let mock = MockRenderContext::new();
        let cube = InstanceMesh::cube(&mock, 2.0);

        assert_eq!(cube.sub_mesh_count(), 1);
        assert_eq!(cube.sub_mesh(0).map(|s| s.index_count), Some(36));
        assert_eq!(cube.bounds(), Aabb::cube(2.0));
        assert_eq!(cube.vertex_buffer().size(), 24 * 24);
        assert_eq!(cube.index_buffer().size(), 36 * 4);
        assert_eq!(mock.count_buffer_creates(), 2);
    }

    #[cfg(feature = "mock")]
    #[test]
    fn test_mesh_ids_are_unique() {
        use thicket_test_utils::MockRenderContext;

        let mock = MockRenderContext::new();
        let a = InstanceMesh::cube(&mock, 1.0);
        let b = InstanceMesh::cube(&mock, 1.0);
        assert_ne!(a.id(), b.id());
    }
}
