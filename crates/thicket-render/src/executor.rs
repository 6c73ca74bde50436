//! Encodes recorded [`CommandList`]s with wgpu.
//!
//! The executor owns every pipeline of the instancing pipeline: the four
//! compute kernels and one render pipeline per (material, vertex format,
//! target formats) combination. Uniforms are streamed through a
//! [`RingBuffer`]; call [`WgpuExecutor::end_frame`] once per frame, after
//! submitting every deferred encoder.
//!
//! Retired buffers and textures are destroyed only after the work that uses
//! them has been submitted: right after the submit in
//! [`SubmitMode::Immediate`], and in `end_frame` for deferred flushes.

use std::sync::Arc;

use ahash::AHashMap;
use thicket_core::profiling::{profile_function, profile_scope};
use thicket_test_utils::{GpuBuffer, GpuTexture};
use tracing::{debug, trace, warn};
use wgpu::util::DeviceExt;

use crate::buffer_pool::{RingBuffer, RingBufferAllocation};
use crate::commands::{
    CommandList, GpuCommand, HI_Z_WORKGROUP_SIZE, IndirectDraw, workgroup_count,
};
use crate::context::GraphicsContext;
use crate::hiz::HI_Z_FORMAT;
use crate::material::{MaterialId, ShaderId};
use crate::mesh::VertexFormat;

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("{command} references a mock {kind}; use the software executor for mock resources")]
    MockResource {
        command: &'static str,
        kind: &'static str,
    },
    #[error("{0} draws recorded but no draw target was supplied")]
    MissingDrawTarget(usize),
}

/// How an encoded list reaches the queue.
pub enum SubmitMode<'a> {
    /// Encode into a private encoder and submit it right away.
    Immediate,
    /// Encode into the caller's encoder; the caller submits.
    Deferred(&'a mut wgpu::CommandEncoder),
}

/// Attachments indirect draws render into.
///
/// Color and depth are loaded, never cleared: instance sets draw on top of
/// whatever the host already rendered this frame.
#[derive(Debug, Clone, Copy)]
pub struct DrawTarget<'a> {
    pub color: &'a wgpu::TextureView,
    pub color_format: wgpu::TextureFormat,
    pub depth: Option<(&'a wgpu::TextureView, wgpu::TextureFormat)>,
}

/// Work encoded by one [`WgpuExecutor::flush`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub dispatches: u32,
    pub copies: u32,
    pub render_passes: u32,
    pub draws: u32,
    /// Resources retired by this list
    pub retired: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct HiZCopyUniforms {
    source_size: [u32; 2],
    target_size: u32,
    _padding: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct HiZReduceUniforms {
    source_size: u32,
    target_size: u32,
    _padding: [u32; 2],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct DrawPipelineKey {
    material: MaterialId,
    vertex_format: VertexFormat,
    color_format: wgpu::TextureFormat,
    depth_format: Option<wgpu::TextureFormat>,
}

struct KernelPipeline {
    layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
}

/// A uniform block bound for one command.
enum UniformSlice {
    Ring(RingBufferAllocation),
    Owned(wgpu::Buffer),
}

impl UniformSlice {
    fn as_binding(&self) -> wgpu::BindingResource<'_> {
        match self {
            UniformSlice::Ring(allocation) => allocation.as_binding(),
            UniformSlice::Owned(buffer) => buffer.as_entire_binding(),
        }
    }
}

/// A resource whose destruction waits for submission.
enum Retired {
    Buffer(wgpu::Buffer),
    Texture(wgpu::Texture),
}

impl Retired {
    fn destroy(self) {
        match self {
            Retired::Buffer(buffer) => buffer.destroy(),
            Retired::Texture(texture) => texture.destroy(),
        }
    }
}

struct PreparedDraw {
    pipeline: wgpu::RenderPipeline,
    bind_group: wgpu::BindGroup,
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_format: wgpu::IndexFormat,
    args: wgpu::Buffer,
}

pub struct WgpuExecutor {
    context: Arc<GraphicsContext>,
    positions: KernelPipeline,
    cull: KernelPipeline,
    hi_z_copy: KernelPipeline,
    hi_z_reduce: KernelPipeline,
    draw_layout: wgpu::BindGroupLayout,
    draw_pipeline_layout: wgpu::PipelineLayout,
    shader_modules: AHashMap<ShaderId, wgpu::ShaderModule>,
    draw_pipelines: AHashMap<DrawPipelineKey, wgpu::RenderPipeline>,
    /// Bound in place of the pyramid when a cull dispatch has none
    dummy_hi_z: wgpu::TextureView,
    uniforms: RingBuffer,
    uniform_alignment: u64,
    /// Retired by deferred flushes, destroyed in `end_frame`
    retired: Vec<Retired>,
}

impl WgpuExecutor {
    pub fn new(context: Arc<GraphicsContext>, uniform_arena_size: u64) -> Self {
        profile_function!();
        let device = context.device();

        let positions = create_kernel(
            device,
            "Instance Position",
            include_str!("shaders/instance_position.wgsl"),
            &[uniform_entry(0, wgpu::ShaderStages::COMPUTE), storage_entry(1, false, wgpu::ShaderStages::COMPUTE)],
        );

        let cull = create_kernel(
            device,
            "Instance Cull",
            include_str!("shaders/instance_cull.wgsl"),
            &[
                uniform_entry(0, wgpu::ShaderStages::COMPUTE),
                storage_entry(1, true, wgpu::ShaderStages::COMPUTE),
                storage_entry(2, false, wgpu::ShaderStages::COMPUTE),
                storage_entry(3, false, wgpu::ShaderStages::COMPUTE),
                float_texture_entry(4),
            ],
        );

        let hi_z_copy = create_kernel(
            device,
            "Hi-Z Copy",
            include_str!("shaders/hiz_copy.wgsl"),
            &[
                uniform_entry(0, wgpu::ShaderStages::COMPUTE),
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Depth,
                    },
                    count: None,
                },
                storage_texture_entry(2),
            ],
        );

        let hi_z_reduce = create_kernel(
            device,
            "Hi-Z Reduce",
            include_str!("shaders/hiz_reduce.wgsl"),
            &[
                uniform_entry(0, wgpu::ShaderStages::COMPUTE),
                float_texture_entry(1),
                storage_texture_entry(2),
            ],
        );

        let draw_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Indirect Draw Bind Group Layout"),
            entries: &[
                uniform_entry(0, wgpu::ShaderStages::VERTEX_FRAGMENT),
                storage_entry(1, true, wgpu::ShaderStages::VERTEX),
                storage_entry(2, true, wgpu::ShaderStages::VERTEX),
            ],
        });
        let draw_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Indirect Draw Pipeline Layout"),
            bind_group_layouts: &[&draw_layout],
            push_constant_ranges: &[],
        });

        let dummy_hi_z = device
            .create_texture(&wgpu::TextureDescriptor {
                label: Some("Hi-Z Placeholder"),
                size: wgpu::Extent3d {
                    width: 1,
                    height: 1,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: HI_Z_FORMAT,
                usage: wgpu::TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            })
            .create_view(&wgpu::TextureViewDescriptor::default());

        let uniforms = RingBuffer::new(&context, uniform_arena_size, wgpu::BufferUsages::UNIFORM);
        let uniform_alignment = context.min_uniform_buffer_offset_alignment() as u64;

        Self {
            positions,
            cull,
            hi_z_copy,
            hi_z_reduce,
            draw_layout,
            draw_pipeline_layout,
            shader_modules: AHashMap::new(),
            draw_pipelines: AHashMap::new(),
            dummy_hi_z,
            uniforms,
            uniform_alignment,
            retired: Vec::new(),
            context,
        }
    }

    pub fn context(&self) -> &Arc<GraphicsContext> {
        &self.context
    }

    /// Number of cached render pipelines.
    pub fn draw_pipeline_count(&self) -> usize {
        self.draw_pipelines.len()
    }

    /// Encode `commands` in order.
    ///
    /// `target` is required when the list contains draws. Consecutive draws
    /// share one render pass.
    pub fn flush(
        &mut self,
        commands: &CommandList,
        mode: SubmitMode<'_>,
        target: Option<&DrawTarget<'_>>,
    ) -> Result<FlushStats, ExecutorError> {
        profile_function!();

        let mut retired = Vec::new();
        match mode {
            SubmitMode::Deferred(encoder) => {
                let stats = self.encode(encoder, commands, target, &mut retired)?;
                self.retired.append(&mut retired);
                Ok(stats)
            }
            SubmitMode::Immediate => {
                let mut encoder =
                    self.context
                        .device()
                        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                            label: Some("Indirect Instancing Encoder"),
                        });
                let stats = self.encode(&mut encoder, commands, target, &mut retired)?;
                self.context.queue().submit(std::iter::once(encoder.finish()));
                retired.into_iter().for_each(Retired::destroy);
                Ok(stats)
            }
        }
    }

    /// Destroy resources retired by deferred flushes and move the uniform
    /// ring to the next frame's region.
    ///
    /// The encoders of every deferred flush must have been submitted.
    pub fn end_frame(&mut self) {
        if !self.retired.is_empty() {
            debug!(count = self.retired.len(), "Destroying retired resources");
        }
        self.retired.drain(..).for_each(Retired::destroy);
        self.uniforms.next_frame();
    }

    /// Resources waiting for `end_frame`.
    pub fn pending_retired_count(&self) -> usize {
        self.retired.len()
    }

    /// Drop cached render pipelines, e.g. after materials were destroyed.
    pub fn clear_pipeline_cache(&mut self) {
        self.draw_pipelines.clear();
        self.shader_modules.clear();
    }

    fn encode(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        commands: &CommandList,
        target: Option<&DrawTarget<'_>>,
        retired: &mut Vec<Retired>,
    ) -> Result<FlushStats, ExecutorError> {
        let mut stats = FlushStats::default();
        let list = commands.commands();

        let mut index = 0;
        while index < list.len() {
            let command = &list[index];
            match command {
                GpuCommand::PushDebugGroup(label) => encoder.push_debug_group(label),
                GpuCommand::PopDebugGroup => encoder.pop_debug_group(),
                GpuCommand::GeneratePositions {
                    uniforms,
                    positions,
                    workgroups,
                } => {
                    let name = command.name();
                    let slice = self.upload_uniform(bytemuck::bytes_of(uniforms));
                    let bind_group =
                        self.context
                            .device()
                            .create_bind_group(&wgpu::BindGroupDescriptor {
                                label: Some("Instance Position Bind Group"),
                                layout: &self.positions.layout,
                                entries: &[
                                    wgpu::BindGroupEntry {
                                        binding: 0,
                                        resource: slice.as_binding(),
                                    },
                                    wgpu::BindGroupEntry {
                                        binding: 1,
                                        resource: real_buffer(positions, name)?.as_entire_binding(),
                                    },
                                ],
                            });
                    dispatch(encoder, &self.positions.pipeline, &bind_group, name, (*workgroups, 1));
                    stats.dispatches += 1;
                }
                GpuCommand::ClearBuffer { buffer } => {
                    encoder.clear_buffer(real_buffer(buffer, command.name())?, 0, None);
                    stats.copies += 1;
                }
                GpuCommand::CullInstances {
                    uniforms,
                    positions,
                    visible,
                    counter,
                    hi_z,
                    workgroups,
                } => {
                    let name = command.name();
                    let slice = self.upload_uniform(bytemuck::bytes_of(uniforms));
                    let hi_z_view = match hi_z {
                        Some(texture) => real_texture(texture, name)?
                            .create_view(&wgpu::TextureViewDescriptor::default()),
                        None => self.dummy_hi_z.clone(),
                    };
                    let bind_group =
                        self.context
                            .device()
                            .create_bind_group(&wgpu::BindGroupDescriptor {
                                label: Some("Instance Cull Bind Group"),
                                layout: &self.cull.layout,
                                entries: &[
                                    wgpu::BindGroupEntry {
                                        binding: 0,
                                        resource: slice.as_binding(),
                                    },
                                    wgpu::BindGroupEntry {
                                        binding: 1,
                                        resource: real_buffer(positions, name)?.as_entire_binding(),
                                    },
                                    wgpu::BindGroupEntry {
                                        binding: 2,
                                        resource: real_buffer(visible, name)?.as_entire_binding(),
                                    },
                                    wgpu::BindGroupEntry {
                                        binding: 3,
                                        resource: real_buffer(counter, name)?.as_entire_binding(),
                                    },
                                    wgpu::BindGroupEntry {
                                        binding: 4,
                                        resource: wgpu::BindingResource::TextureView(&hi_z_view),
                                    },
                                ],
                            });
                    dispatch(encoder, &self.cull.pipeline, &bind_group, name, (*workgroups, 1));
                    stats.dispatches += 1;
                }
                GpuCommand::CopyBuffer {
                    source,
                    source_offset,
                    destination,
                    destination_offset,
                    size,
                } => {
                    let name = command.name();
                    encoder.copy_buffer_to_buffer(
                        real_buffer(source, name)?,
                        *source_offset,
                        real_buffer(destination, name)?,
                        *destination_offset,
                        *size,
                    );
                    stats.copies += 1;
                }
                GpuCommand::CopyDepthToHiZ {
                    depth,
                    target: pyramid,
                    size,
                } => {
                    let name = command.name();
                    let depth_texture = real_texture(depth, name)?;
                    let slice = self.upload_uniform(bytemuck::bytes_of(&HiZCopyUniforms {
                        source_size: [depth_texture.width(), depth_texture.height()],
                        target_size: *size,
                        _padding: 0,
                    }));
                    let depth_view = depth_texture.create_view(&wgpu::TextureViewDescriptor {
                        label: Some("Hi-Z Depth Source"),
                        aspect: wgpu::TextureAspect::DepthOnly,
                        ..Default::default()
                    });
                    let target_view = mip_view(real_texture(pyramid, name)?, 0);
                    let bind_group = self.hi_z_bind_group(
                        &self.hi_z_copy.layout,
                        &slice,
                        &depth_view,
                        &target_view,
                    );
                    let groups = workgroup_count(*size, HI_Z_WORKGROUP_SIZE);
                    dispatch(encoder, &self.hi_z_copy.pipeline, &bind_group, name, (groups, groups));
                    stats.dispatches += 1;
                }
                GpuCommand::ReduceHiZ {
                    source,
                    target: scratch,
                    size,
                } => {
                    let name = command.name();
                    let source_texture = real_texture(source, name)?;
                    let slice = self.upload_uniform(bytemuck::bytes_of(&HiZReduceUniforms {
                        source_size: source_texture.width(),
                        target_size: *size,
                        _padding: [0; 2],
                    }));
                    let source_view = mip_view(source_texture, 0);
                    let target_view = mip_view(real_texture(scratch, name)?, 0);
                    let bind_group = self.hi_z_bind_group(
                        &self.hi_z_reduce.layout,
                        &slice,
                        &source_view,
                        &target_view,
                    );
                    let groups = workgroup_count(*size, HI_Z_WORKGROUP_SIZE);
                    dispatch(encoder, &self.hi_z_reduce.pipeline, &bind_group, name, (groups, groups));
                    stats.dispatches += 1;
                }
                GpuCommand::CopyTextureToMip {
                    source,
                    target: pyramid,
                    mip_level,
                    size,
                } => {
                    let name = command.name();
                    encoder.copy_texture_to_texture(
                        wgpu::TexelCopyTextureInfo {
                            texture: real_texture(source, name)?,
                            mip_level: 0,
                            origin: wgpu::Origin3d::ZERO,
                            aspect: wgpu::TextureAspect::All,
                        },
                        wgpu::TexelCopyTextureInfo {
                            texture: real_texture(pyramid, name)?,
                            mip_level: *mip_level,
                            origin: wgpu::Origin3d::ZERO,
                            aspect: wgpu::TextureAspect::All,
                        },
                        wgpu::Extent3d {
                            width: *size,
                            height: *size,
                            depth_or_array_layers: 1,
                        },
                    );
                    stats.copies += 1;
                }
                GpuCommand::DestroyBuffer(buffer) => {
                    retired.push(Retired::Buffer(real_buffer(buffer, command.name())?.clone()));
                    stats.retired += 1;
                }
                GpuCommand::DestroyTexture(texture) => {
                    retired.push(Retired::Texture(real_texture(texture, command.name())?.clone()));
                    stats.retired += 1;
                }
                GpuCommand::DrawIndexedIndirect(_) => {
                    let run_end = list[index..]
                        .iter()
                        .position(|c| !matches!(c, GpuCommand::DrawIndexedIndirect(_)))
                        .map_or(list.len(), |offset| index + offset);
                    let draws: Vec<&IndirectDraw> = list[index..run_end]
                        .iter()
                        .filter_map(|c| match c {
                            GpuCommand::DrawIndexedIndirect(draw) => Some(draw),
                            _ => None,
                        })
                        .collect();

                    let target = target.ok_or(ExecutorError::MissingDrawTarget(draws.len()))?;
                    self.encode_draws(encoder, &draws, target)?;
                    stats.render_passes += 1;
                    stats.draws += draws.len() as u32;
                    index = run_end;
                    continue;
                }
            }
            index += 1;
        }

        trace!(?stats, "Encoded command list");
        Ok(stats)
    }

    fn encode_draws(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        draws: &[&IndirectDraw],
        target: &DrawTarget<'_>,
    ) -> Result<(), ExecutorError> {
        profile_scope!("encode_draws");

        let mut prepared = Vec::with_capacity(draws.len());
        for draw in draws {
            if draw.material.is_destroyed() {
                warn!(draw = %draw.label, "Skipping draw with a destroyed material");
                continue;
            }
            let name = "draw_indexed_indirect";
            let pipeline = self.draw_pipeline(draw, target);
            let slice = self.upload_uniform(bytemuck::bytes_of(&draw.uniforms));
            let bind_group = self
                .context
                .device()
                .create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some(draw.label.as_str()),
                    layout: &self.draw_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: slice.as_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: real_buffer(&draw.positions, name)?.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: real_buffer(&draw.visible, name)?.as_entire_binding(),
                        },
                    ],
                });
            prepared.push(PreparedDraw {
                pipeline,
                bind_group,
                vertex_buffer: real_buffer(draw.mesh.vertex_buffer(), name)?.clone(),
                index_buffer: real_buffer(draw.mesh.index_buffer(), name)?.clone(),
                index_format: draw.mesh.index_format(),
                args: real_buffer(&draw.args, name)?.clone(),
            });
        }

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Indirect Instancing Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target.color,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: target.depth.map(|(view, _)| {
                wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }
            }),
            occlusion_query_set: None,
            timestamp_writes: None,
        });

        for draw in &prepared {
            pass.set_pipeline(&draw.pipeline);
            pass.set_bind_group(0, &draw.bind_group, &[]);
            pass.set_vertex_buffer(0, draw.vertex_buffer.slice(..));
            pass.set_index_buffer(draw.index_buffer.slice(..), draw.index_format);
            pass.draw_indexed_indirect(&draw.args, 0);
        }
        Ok(())
    }

    fn draw_pipeline(&mut self, draw: &IndirectDraw, target: &DrawTarget<'_>) -> wgpu::RenderPipeline {
        let key = DrawPipelineKey {
            material: draw.material.id(),
            vertex_format: draw.mesh.vertex_format(),
            color_format: target.color_format,
            depth_format: target.depth.map(|(_, format)| format),
        };
        if let Some(pipeline) = self.draw_pipelines.get(&key) {
            return pipeline.clone();
        }

        let device = self.context.device();
        let shader = draw.material.shader();
        let module = self
            .shader_modules
            .entry(shader.id())
            .or_insert_with(|| {
                debug!(shader = shader.label(), "Compiling instanced material shader");
                device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(shader.label()),
                    source: wgpu::ShaderSource::Wgsl(shader.source().to_owned().into()),
                })
            })
            .clone();

        let state = draw.material.pipeline_state();
        let vertex_layout = key.vertex_format.buffer_layout();
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(draw.material.label()),
            layout: Some(&self.draw_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &module,
                entry_point: Some("vs_main"),
                buffers: &[vertex_layout],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &module,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: key.color_format,
                    blend: state.blend,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                front_face: state.front_face,
                cull_mode: state.cull_mode,
                ..Default::default()
            },
            depth_stencil: key.depth_format.map(|format| wgpu::DepthStencilState {
                format,
                depth_write_enabled: state.depth_write,
                depth_compare: if state.depth_test {
                    wgpu::CompareFunction::LessEqual
                } else {
                    wgpu::CompareFunction::Always
                },
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        debug!(material = draw.material.label(), "Created indirect draw pipeline");
        self.draw_pipelines.insert(key, pipeline.clone());
        pipeline
    }

    fn upload_uniform(&mut self, data: &[u8]) -> UniformSlice {
        match self.uniforms.allocate(data.len() as u64, self.uniform_alignment) {
            Some(allocation) => {
                allocation.write(self.context.queue(), data);
                UniformSlice::Ring(allocation)
            }
            None => {
                warn!(
                    size = data.len(),
                    "Uniform ring exhausted for this frame, allocating a one-off buffer"
                );
                UniformSlice::Owned(self.context.device().create_buffer_init(
                    &wgpu::util::BufferInitDescriptor {
                        label: Some("Overflow Uniforms"),
                        contents: data,
                        usage: wgpu::BufferUsages::UNIFORM,
                    },
                ))
            }
        }
    }

    fn hi_z_bind_group(
        &self,
        layout: &wgpu::BindGroupLayout,
        uniforms: &UniformSlice,
        source: &wgpu::TextureView,
        target: &wgpu::TextureView,
    ) -> wgpu::BindGroup {
        self.context
            .device()
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Hi-Z Bind Group"),
                layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: uniforms.as_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(source),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::TextureView(target),
                    },
                ],
            })
    }
}

fn real_buffer<'a>(buffer: &'a GpuBuffer, command: &'static str) -> Result<&'a wgpu::Buffer, ExecutorError> {
    buffer.try_as_wgpu().ok_or(ExecutorError::MockResource {
        command,
        kind: "buffer",
    })
}

fn real_texture<'a>(texture: &'a GpuTexture, command: &'static str) -> Result<&'a wgpu::Texture, ExecutorError> {
    texture.try_as_wgpu().ok_or(ExecutorError::MockResource {
        command,
        kind: "texture",
    })
}

fn mip_view(texture: &wgpu::Texture, mip_level: u32) -> wgpu::TextureView {
    texture.create_view(&wgpu::TextureViewDescriptor {
        base_mip_level: mip_level,
        mip_level_count: Some(1),
        ..Default::default()
    })
}

fn dispatch(
    encoder: &mut wgpu::CommandEncoder,
    pipeline: &wgpu::ComputePipeline,
    bind_group: &wgpu::BindGroup,
    label: &str,
    (x, y): (u32, u32),
) {
    if x == 0 || y == 0 {
        return;
    }
    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
        label: Some(label),
        timestamp_writes: None,
    });
    pass.set_pipeline(pipeline);
    pass.set_bind_group(0, bind_group, &[]);
    pass.dispatch_workgroups(x, y, 1);
}

fn create_kernel(
    device: &wgpu::Device,
    label: &str,
    source: &'static str,
    entries: &[wgpu::BindGroupLayoutEntry],
) -> KernelPipeline {
    let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries,
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[&layout],
        push_constant_ranges: &[],
    });
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(&pipeline_layout),
        module: &module,
        entry_point: Some("cs_main"),
        compilation_options: wgpu::PipelineCompilationOptions::default(),
        cache: None,
    });
    KernelPipeline { layout, pipeline }
}

fn uniform_entry(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn storage_entry(binding: u32, read_only: bool, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn float_texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Texture {
            multisampled: false,
            view_dimension: wgpu::TextureViewDimension::D2,
            // R32Float is not filterable without an extra feature
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
        },
        count: None,
    }
}

fn storage_texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::StorageTexture {
            access: wgpu::StorageTextureAccess::WriteOnly,
            format: HI_Z_FORMAT,
            view_dimension: wgpu::TextureViewDimension::D2,
        },
        count: None,
    }
}
