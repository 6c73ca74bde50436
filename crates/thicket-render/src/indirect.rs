//! Indirect draw arguments for GPU-driven rendering.
//!
//! The instance count of an [`IndirectArgsBuffer`] is patched on the GPU by the
//! culling pass, so the host never reads back visibility results.

use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;
use thicket_test_utils::{GpuBuffer, RenderContext};

use crate::commands::CommandList;
use crate::mesh::SubMesh;

/// Indirect draw command for indexed geometry.
///
/// This matches the layout expected by `wgpu::RenderPass::draw_indexed_indirect`.
///
/// # Fields
///
/// * `index_count` - Number of indices to draw
/// * `instance_count` - Number of instances to draw
/// * `first_index` - Index of the first index to draw
/// * `base_vertex` - Value added to each index before indexing into the vertex buffer
/// * `first_instance` - Instance ID of the first instance, always 0 here
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DrawIndexedIndirect {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub base_vertex: i32,
    pub first_instance: u32,
}

// SAFETY: DrawIndexedIndirect is a repr(C) struct of 4-byte fields with no padding
unsafe impl Pod for DrawIndexedIndirect {}
unsafe impl Zeroable for DrawIndexedIndirect {}

const_assert_eq!(std::mem::size_of::<DrawIndexedIndirect>(), 20);

/// Byte offset of `instance_count` inside the record.
pub const INSTANCE_COUNT_OFFSET: u64 = 4;

impl DrawIndexedIndirect {
    /// Create a new indexed indirect draw command.
    pub const fn new(
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    ) -> Self {
        Self {
            index_count,
            instance_count,
            first_index,
            base_vertex,
            first_instance,
        }
    }

    /// Arguments drawing `instance_count` instances of a sub-mesh.
    pub const fn for_sub_mesh(sub_mesh: &SubMesh, instance_count: u32) -> Self {
        Self::new(
            sub_mesh.index_count,
            instance_count,
            sub_mesh.index_start,
            sub_mesh.base_vertex,
            0,
        )
    }

    /// Size of the command in bytes.
    pub const fn size() -> u64 {
        std::mem::size_of::<Self>() as u64
    }

    /// A record with no indices draws nothing and is treated as unset.
    pub fn is_valid(&self) -> bool {
        self.index_count > 0
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes = bytes.get(..Self::size() as usize)?;
        Some(bytemuck::pod_read_unaligned(bytes))
    }
}

/// The single-record indirect argument buffer owned by one instance set.
///
/// Only the host writes the whole record (when the mesh, sub-mesh or capacity
/// changes). Per frame, only `instance_count` is overwritten, GPU-side.
#[derive(Debug)]
pub struct IndirectArgsBuffer {
    buffer: GpuBuffer,
    args: DrawIndexedIndirect,
}

impl IndirectArgsBuffer {
    pub const USAGE: wgpu::BufferUsages = wgpu::BufferUsages::INDIRECT
        .union(wgpu::BufferUsages::COPY_DST)
        .union(wgpu::BufferUsages::STORAGE);

    pub fn new(ctx: &dyn RenderContext, label: &str) -> Self {
        let buffer = ctx.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: DrawIndexedIndirect::size(),
            usage: Self::USAGE,
            mapped_at_creation: false,
        });

        Self {
            buffer,
            args: DrawIndexedIndirect::default(),
        }
    }

    /// Upload a complete record.
    pub fn write(&mut self, ctx: &dyn RenderContext, args: DrawIndexedIndirect) {
        ctx.write_buffer(&self.buffer, 0, bytemuck::bytes_of(&args));
        self.args = args;
    }

    /// The record as last written by the host.
    pub fn args(&self) -> DrawIndexedIndirect {
        self.args
    }

    pub fn buffer(&self) -> &GpuBuffer {
        &self.buffer
    }

    /// Whether the host-side record describes a drawable range.
    pub fn is_valid(&self) -> bool {
        self.args.is_valid()
    }

    /// Destroy the buffer once `commands` has run up to this point.
    pub fn retire(self, commands: &mut CommandList) {
        commands.retire_buffer(self.buffer);
    }
}
