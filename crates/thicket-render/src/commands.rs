//! Backend-neutral command recording.
//!
//! Every pass of the instancing pipeline records [`GpuCommand`]s into a
//! [`CommandList`] instead of encoding directly. The list is flushed later by
//! an executor: [`WgpuExecutor`](crate::executor::WgpuExecutor) encodes it into
//! a wgpu command encoder (immediately submitted or deferred to the caller's
//! encoder), while the CPU reference executor replays it in tests.

use std::sync::Arc;

use thicket_test_utils::{GpuBuffer, GpuTexture};

use crate::culling::CullingUniforms;
use crate::generator::PlacementUniforms;
use crate::material::InstancedMaterial;
use crate::mesh::InstanceMesh;

/// Threads per workgroup of the per-instance kernels.
pub const INSTANCE_WORKGROUP_SIZE: u32 = 8;

/// Threads per workgroup side of the 2D Hi-Z kernels.
pub const HI_Z_WORKGROUP_SIZE: u32 = 8;

/// Number of workgroups needed to cover `items` threads.
pub const fn workgroup_count(items: u32, workgroup_size: u32) -> u32 {
    items.div_ceil(workgroup_size)
}

/// Uniforms bound to an instanced material's draw.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DrawUniforms {
    /// View-projection of the camera being rendered
    pub view_projection: [[f32; 4]; 4],
    pub local_to_world: [[f32; 4]; 4],
    pub world_to_local: [[f32; 4]; 4],
    /// Non-zero while Hi-Z culling is globally enabled
    pub hi_z_enabled: u32,
    pub _padding: [u32; 3],
}

static_assertions::const_assert_eq!(std::mem::size_of::<DrawUniforms>(), 208);

/// One indirect draw of an instance set.
#[derive(Debug, Clone)]
pub struct IndirectDraw {
    pub label: String,
    pub material: Arc<InstancedMaterial>,
    pub mesh: Arc<InstanceMesh>,
    pub uniforms: DrawUniforms,
    pub positions: GpuBuffer,
    pub visible: GpuBuffer,
    pub args: GpuBuffer,
}

#[derive(Debug, Clone)]
pub enum GpuCommand {
    PushDebugGroup(String),
    PopDebugGroup,
    /// Fill `positions` with one transform per instance.
    GeneratePositions {
        uniforms: PlacementUniforms,
        positions: GpuBuffer,
        workgroups: u32,
    },
    /// Zero a whole buffer.
    ClearBuffer { buffer: GpuBuffer },
    /// Append the indices of visible instances to `visible`, counting them in `counter`.
    CullInstances {
        uniforms: CullingUniforms,
        positions: GpuBuffer,
        visible: GpuBuffer,
        counter: GpuBuffer,
        hi_z: Option<GpuTexture>,
        workgroups: u32,
    },
    CopyBuffer {
        source: GpuBuffer,
        source_offset: u64,
        destination: GpuBuffer,
        destination_offset: u64,
        size: u64,
    },
    /// Resample the depth buffer into level 0 of the pyramid.
    CopyDepthToHiZ {
        depth: GpuTexture,
        target: GpuTexture,
        size: u32,
    },
    /// Max-reduce 2x2 blocks of `source` (mip 0) into `target` of side `size`.
    ReduceHiZ {
        source: GpuTexture,
        target: GpuTexture,
        size: u32,
    },
    CopyTextureToMip {
        source: GpuTexture,
        target: GpuTexture,
        mip_level: u32,
        size: u32,
    },
    DrawIndexedIndirect(IndirectDraw),
    /// Free a buffer once every earlier command has executed.
    DestroyBuffer(GpuBuffer),
    /// Free a texture once every earlier command has executed.
    DestroyTexture(GpuTexture),
}

impl GpuCommand {
    /// Short name used in logs and debug markers.
    pub fn name(&self) -> &'static str {
        match self {
            GpuCommand::PushDebugGroup(_) => "push_debug_group",
            GpuCommand::PopDebugGroup => "pop_debug_group",
            GpuCommand::GeneratePositions { .. } => "generate_positions",
            GpuCommand::ClearBuffer { .. } => "clear_buffer",
            GpuCommand::CullInstances { .. } => "cull_instances",
            GpuCommand::CopyBuffer { .. } => "copy_buffer",
            GpuCommand::CopyDepthToHiZ { .. } => "copy_depth_to_hi_z",
            GpuCommand::ReduceHiZ { .. } => "reduce_hi_z",
            GpuCommand::CopyTextureToMip { .. } => "copy_texture_to_mip",
            GpuCommand::DrawIndexedIndirect(_) => "draw_indexed_indirect",
            GpuCommand::DestroyBuffer(_) => "destroy_buffer",
            GpuCommand::DestroyTexture(_) => "destroy_texture",
        }
    }
}

/// An ordered list of recorded commands.
///
/// Commands execute in recording order on a single stream, which is what
/// orders counter reset, culling, count copy and draw. Resources retired
/// while recording are destroyed at their place in the stream, after every
/// command recorded before them.
#[derive(Debug, Default, Clone)]
pub struct CommandList {
    commands: Vec<GpuCommand>,
}

impl CommandList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: GpuCommand) {
        self.commands.push(command);
    }

    pub fn push_debug_group(&mut self, label: impl Into<String>) {
        self.commands.push(GpuCommand::PushDebugGroup(label.into()));
    }

    pub fn pop_debug_group(&mut self) {
        self.commands.push(GpuCommand::PopDebugGroup);
    }

    /// Destroy `buffer` after everything recorded so far.
    pub fn retire_buffer(&mut self, buffer: GpuBuffer) {
        self.commands.push(GpuCommand::DestroyBuffer(buffer));
    }

    /// Destroy `texture` after everything recorded so far.
    pub fn retire_texture(&mut self, texture: GpuTexture) {
        self.commands.push(GpuCommand::DestroyTexture(texture));
    }

    pub fn commands(&self) -> &[GpuCommand] {
        &self.commands
    }

    pub fn iter(&self) -> std::slice::Iter<'_, GpuCommand> {
        self.commands.iter()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Number of commands matching a predicate.
    pub fn count(&self, predicate: impl Fn(&GpuCommand) -> bool) -> usize {
        self.commands.iter().filter(|command| predicate(command)).count()
    }

    pub fn append(&mut self, other: &mut CommandList) {
        self.commands.append(&mut other.commands);
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }

    /// Take all recorded commands, leaving the list empty.
    pub fn take(&mut self) -> CommandList {
        std::mem::take(self)
    }
}

impl<'a> IntoIterator for &'a CommandList {
    type Item = &'a GpuCommand;
    type IntoIter = std::slice::Iter<'a, GpuCommand>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workgroup_count_rounds_up() {
        assert_eq!(workgroup_count(0, 8), 0);
        assert_eq!(workgroup_count(1, 8), 1);
        assert_eq!(workgroup_count(8, 8), 1);
        assert_eq!(workgroup_count(9, 8), 2);
        assert_eq!(workgroup_count(20000, 8), 2500);
        assert_eq!(workgroup_count(1001, INSTANCE_WORKGROUP_SIZE), 126);
    }

    #[test]
    fn test_command_list_order_and_take() {
        let mut list = CommandList::new();
        list.push_debug_group("Pass");
        list.pop_debug_group();

        assert_eq!(list.len(), 2);
        assert_eq!(list.commands()[0].name(), "push_debug_group");
        assert_eq!(
            list.count(|c| matches!(c, GpuCommand::PopDebugGroup)),
            1
        );

        let taken = list.take();
        assert!(list.is_empty());
        assert_eq!(taken.len(), 2);
    }
}
