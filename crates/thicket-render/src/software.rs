//! CPU reference executor for mock resources.
//!
//! Replays a [`CommandList`] against a [`MockRenderContext`] with the same
//! placement, culling and Hi-Z math the kernels run, storing results in the
//! mock buffers. Texture contents live in the executor, one `Vec<f32>` per
//! mip level. Draws are recorded instead of rasterized.

use ahash::AHashMap;
use glam::Mat4;
use thicket_test_utils::{GpuBuffer, GpuTexture, MockRenderContext, RenderContext};
use tracing::{trace, warn};

use crate::commands::{CommandList, GpuCommand, INSTANCE_WORKGROUP_SIZE};
use crate::culling::{HiZLookup, is_instance_visible};
use crate::generator::{TRANSFORM_STRIDE, place_instance};
use crate::hiz::{DepthPyramid, reduce_level, resample_depth};
use crate::indirect::DrawIndexedIndirect;
use crate::material::MaterialId;
use crate::mesh::MeshId;

/// One replayed indirect draw.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    pub label: String,
    pub material: MaterialId,
    pub mesh: MeshId,
    /// Arguments as read from the args buffer at draw time
    pub args: DrawIndexedIndirect,
    /// The first `args.instance_count` entries of the visible buffer
    pub visible: Vec<u32>,
    /// Debug groups open when the draw executed, outermost first
    pub debug_path: Vec<String>,
}

#[derive(Debug, Default)]
pub struct SoftwareExecutor {
    mips: AHashMap<usize, Vec<Vec<f32>>>,
    draws: Vec<DrawRecord>,
    debug_stack: Vec<String>,
    debug_groups: Vec<String>,
    dispatches: usize,
}

impl SoftwareExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provide the contents of a mock depth texture, row-major.
    pub fn upload_depth(&mut self, texture: &GpuTexture, depth: Vec<f32>) {
        if let Some(id) = texture.mock_id() {
            self.mips.insert(id, vec![depth]);
        }
    }

    /// Contents of one mip level of a mock texture.
    pub fn texture_level(&self, texture: &GpuTexture, mip_level: u32) -> Option<&[f32]> {
        let id = texture.mock_id()?;
        self.mips
            .get(&id)?
            .get(mip_level as usize)
            .map(Vec::as_slice)
    }

    /// Draws replayed so far.
    pub fn draws(&self) -> &[DrawRecord] {
        &self.draws
    }

    pub fn take_draws(&mut self) -> Vec<DrawRecord> {
        std::mem::take(&mut self.draws)
    }

    /// Every debug group pushed so far, in order.
    pub fn debug_groups(&self) -> &[String] {
        &self.debug_groups
    }

    /// Whether every pushed debug group was popped.
    pub fn debug_groups_balanced(&self) -> bool {
        self.debug_stack.is_empty()
    }

    pub fn dispatch_count(&self) -> usize {
        self.dispatches
    }

    /// Replay `commands` in order.
    pub fn flush(&mut self, mock: &MockRenderContext, commands: &CommandList) {
        for command in commands {
            trace!(command = command.name(), "Replaying command");
            match command {
                GpuCommand::PushDebugGroup(label) => {
                    self.debug_stack.push(label.clone());
                    self.debug_groups.push(label.clone());
                }
                GpuCommand::PopDebugGroup => {
                    if self.debug_stack.pop().is_none() {
                        warn!("Debug group popped without a matching push");
                    }
                }
                GpuCommand::GeneratePositions {
                    uniforms,
                    positions,
                    workgroups,
                } => {
                    self.dispatches += 1;
                    let threads = workgroups.saturating_mul(INSTANCE_WORKGROUP_SIZE);
                    let count = uniforms.instance_count.min(threads);
                    let mut bytes = Vec::with_capacity((count as u64 * TRANSFORM_STRIDE) as usize);
                    for index in 0..count {
                        let transform = place_instance(uniforms, index);
                        bytes.extend_from_slice(bytemuck::bytes_of(&transform.to_cols_array()));
                    }
                    mock.store_device_write(positions, 0, &bytes);
                }
                GpuCommand::ClearBuffer { buffer } => {
                    mock.store_device_write(buffer, 0, &vec![0; buffer.size() as usize]);
                }
                GpuCommand::CullInstances {
                    uniforms,
                    positions,
                    visible,
                    counter,
                    hi_z,
                    workgroups,
                } => {
                    self.dispatches += 1;
                    let pyramid = hi_z.as_ref().map(|texture| self.pyramid(texture));
                    let lookup = pyramid.as_ref().map(|p| p as &dyn HiZLookup);

                    let transforms = read_transforms(mock, positions);
                    let mut count = read_u32(mock, counter, 0);
                    let mut survivors = Vec::new();

                    let threads = workgroups.saturating_mul(INSTANCE_WORKGROUP_SIZE);
                    for index in 0..uniforms.instance_count.min(threads) {
                        let transform = transforms
                            .get(index as usize)
                            .copied()
                            .unwrap_or(Mat4::ZERO);
                        if is_instance_visible(uniforms, &transform, lookup) {
                            survivors.push((count, index));
                            count += 1;
                        }
                    }

                    for (slot, index) in survivors {
                        mock.store_device_write(visible, slot as u64 * 4, &index.to_ne_bytes());
                    }
                    mock.store_device_write(counter, 0, &count.to_ne_bytes());
                }
                GpuCommand::CopyBuffer {
                    source,
                    source_offset,
                    destination,
                    destination_offset,
                    size,
                } => {
                    let data = mock.buffer_data(source).unwrap_or_default();
                    let start = (*source_offset as usize).min(data.len());
                    let end = (start + *size as usize).min(data.len());
                    mock.store_device_write(destination, *destination_offset, &data[start..end]);
                }
                GpuCommand::CopyDepthToHiZ {
                    depth,
                    target,
                    size,
                } => {
                    self.dispatches += 1;
                    let source = self.texture_level(depth, 0).unwrap_or_default();
                    let level = resample_depth(source, depth.width(), depth.height(), *size);
                    self.store_level(target, 0, level);
                }
                GpuCommand::ReduceHiZ {
                    source,
                    target,
                    size,
                } => {
                    self.dispatches += 1;
                    let previous = self.texture_level(source, 0).unwrap_or_default();
                    let level = reduce_level(previous, source.width(), *size);
                    self.store_level(target, 0, level);
                }
                GpuCommand::CopyTextureToMip {
                    source,
                    target,
                    mip_level,
                    size,
                } => {
                    let texels = (*size as usize) * (*size as usize);
                    let mut level = self
                        .texture_level(source, 0)
                        .map(<[f32]>::to_vec)
                        .unwrap_or_default();
                    level.resize(texels, 1.0);
                    self.store_level(target, *mip_level, level);
                }
                GpuCommand::DrawIndexedIndirect(draw) => {
                    let args = mock
                        .buffer_data(&draw.args)
                        .and_then(|bytes| DrawIndexedIndirect::from_bytes(&bytes))
                        .unwrap_or_default();
                    let visible = (0..args.instance_count)
                        .map(|slot| read_u32(mock, &draw.visible, slot as u64 * 4))
                        .collect();
                    self.draws.push(DrawRecord {
                        label: draw.label.clone(),
                        material: draw.material.id(),
                        mesh: draw.mesh.id(),
                        args,
                        visible,
                        debug_path: self.debug_stack.clone(),
                    });
                }
                GpuCommand::DestroyBuffer(buffer) => mock.destroy_buffer(buffer),
                GpuCommand::DestroyTexture(texture) => {
                    if let Some(id) = texture.mock_id() {
                        self.mips.remove(&id);
                    }
                    mock.destroy_texture(texture);
                }
            }
        }
    }

    fn store_level(&mut self, texture: &GpuTexture, mip_level: u32, texels: Vec<f32>) {
        let Some(id) = texture.mock_id() else {
            return;
        };
        let levels = self.mips.entry(id).or_default();
        let index = mip_level as usize;
        if levels.len() <= index {
            levels.resize(index + 1, Vec::new());
        }
        levels[index] = texels;
    }

    fn pyramid(&self, texture: &GpuTexture) -> DepthPyramid {
        let levels = texture
            .mock_id()
            .and_then(|id| self.mips.get(&id))
            .cloned()
            .unwrap_or_default();
        DepthPyramid::from_levels(texture.width(), levels)
    }
}

fn read_u32(mock: &MockRenderContext, buffer: &GpuBuffer, offset: u64) -> u32 {
    let start = offset as usize;
    mock.buffer_data(buffer)
        .and_then(|bytes| bytes.get(start..start + 4).map(bytemuck::pod_read_unaligned))
        .unwrap_or(0)
}

fn read_transforms(mock: &MockRenderContext, buffer: &GpuBuffer) -> Vec<Mat4> {
    let bytes = mock.buffer_data(buffer).unwrap_or_default();
    bytes
        .chunks_exact(TRANSFORM_STRIDE as usize)
        .map(|chunk| Mat4::from_cols_array(&bytemuck::pod_read_unaligned::<[f32; 16]>(chunk)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::workgroup_count;
    use crate::generator::PlacementParams;
    use thicket_core::math::Aabb;

    fn storage(mock: &MockRenderContext, size: u64) -> GpuBuffer {
        mock.create_buffer(&wgpu::BufferDescriptor {
            label: Some("storage"),
            size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    #[test]
    fn test_generate_positions_matches_cpu_placement() {
        let mock = MockRenderContext::new();
        let positions = storage(&mock, 16 * TRANSFORM_STRIDE);
        let uniforms = PlacementParams::new(Aabb::cube(10.0))
            .with_seed(3)
            .uniforms(&Aabb::cube(1.0), 16);

        let mut commands = CommandList::new();
        commands.push(GpuCommand::GeneratePositions {
            uniforms,
            positions: positions.clone(),
            workgroups: workgroup_count(16, INSTANCE_WORKGROUP_SIZE),
        });

        let mut executor = SoftwareExecutor::new();
        executor.flush(&mock, &commands);

        let transforms = read_transforms(&mock, &positions);
        assert_eq!(transforms.len(), 16);
        assert_eq!(transforms[5], place_instance(&uniforms, 5));
        assert_eq!(executor.dispatch_count(), 1);
    }

    #[test]
    fn test_copy_buffer_and_clear() {
        let mock = MockRenderContext::new();
        let source = storage(&mock, 8);
        let destination = storage(&mock, 8);
        mock.write_buffer(&source, 0, &[1, 2, 3, 4, 5, 6, 7, 8]);

        let mut commands = CommandList::new();
        commands.push(GpuCommand::CopyBuffer {
            source: source.clone(),
            source_offset: 4,
            destination: destination.clone(),
            destination_offset: 0,
            size: 4,
        });
        commands.push(GpuCommand::ClearBuffer {
            buffer: source.clone(),
        });
        SoftwareExecutor::new().flush(&mock, &commands);

        assert_eq!(mock.buffer_data(&destination).unwrap(), vec![5, 6, 7, 8, 0, 0, 0, 0]);
        assert_eq!(mock.buffer_data(&source).unwrap(), vec![0; 8]);
    }

    #[test]
    fn test_debug_groups_tracked() {
        let mock = MockRenderContext::new();
        let mut commands = CommandList::new();
        commands.push_debug_group("Outer");
        commands.push_debug_group("Inner");
        commands.pop_debug_group();

        let mut executor = SoftwareExecutor::new();
        executor.flush(&mock, &commands);
        assert_eq!(executor.debug_groups(), ["Outer", "Inner"]);
        assert!(!executor.debug_groups_balanced());
    }

    #[test]
    fn test_retired_buffer_destroyed_after_earlier_commands() {
        let mock = MockRenderContext::new();
        let positions = storage(&mock, 8 * TRANSFORM_STRIDE);
        let uniforms = PlacementParams::new(Aabb::cube(4.0)).uniforms(&Aabb::cube(1.0), 8);

        let mut commands = CommandList::new();
        commands.push(GpuCommand::GeneratePositions {
            uniforms,
            positions: positions.clone(),
            workgroups: 1,
        });
        commands.retire_buffer(positions.clone());
        assert_eq!(mock.buffer_destroy_count(&positions), 0);

        SoftwareExecutor::new().flush(&mock, &commands);
        assert_eq!(mock.buffer_destroy_count(&positions), 1);
        assert_eq!(mock.writes_after_destroy(), 0);
    }
}
