//! Thicket Render
//!
//! GPU-driven procedural instancing with Hi-Z occlusion culling.
//!
//! Each [`RenderableInstanceSet`] scatters up to 20 000 copies of a mesh
//! inside a volume, culls them on the GPU against the camera frustum and an
//! optional depth pyramid, and draws the survivors with a single indirect
//! draw whose instance count never round-trips through the host.
//!
//! Passes are recorded into a [`CommandList`] and flushed by an executor:
//! [`WgpuExecutor`] for real devices, `SoftwareExecutor` (feature `mock`)
//! for [`MockRenderContext`](thicket_test_utils::MockRenderContext) tests.
//!
//! ```ignore
//! use std::sync::Arc;
//! use thicket_render::*;
//!
//! let ctx = GraphicsContext::new_owned_sync()?;
//! let mut executor = WgpuExecutor::new(ctx.clone(), 64 * 1024);
//! let mut pipeline = IndirectDrawPipeline::default();
//!
//! let set = share(RenderableInstanceSet::new(
//!     InstanceSetDescriptor::new("Grass")
//!         .with_mesh(mesh)
//!         .with_material(MaterialSource::FromShader(ShaderAsset::unlit()))
//!         .with_instance_count(5000)
//!         .with_draw_by_self(false),
//! ));
//!
//! let mut commands = CommandList::new();
//! pipeline.enable_set(ctx.as_ref(), &set, &mut commands);
//!
//! // Per frame
//! pipeline.prepare(frame_index);
//! pipeline.before_opaque(ctx.as_ref(), &view, &depth, &mut commands);
//! pipeline.before_transparent(ctx.as_ref(), &view, &mut commands);
//! executor.flush(&commands.take(), SubmitMode::Deferred(&mut encoder), Some(&target))?;
//! executor.end_frame();
//! ```

pub mod buffer_pool;
pub mod camera;
pub mod commands;
mod context;
mod context_impl;
pub mod culling;
pub mod depth;
pub mod executor;
pub mod features;
pub mod frame;
pub mod generator;
pub mod hiz;
pub mod indirect;
pub mod instance_set;
pub mod material;
pub mod mesh;
pub mod pipeline;
pub mod registry;
#[cfg(feature = "mock")]
pub mod software;

pub use buffer_pool::{RingBuffer, RingBufferAllocation, RingCursor};
pub use camera::{Camera, CameraKind, CullingView, ProjectionMode};
pub use commands::{CommandList, DrawUniforms, GpuCommand, IndirectDraw};
pub use context::{GraphicsContext, GraphicsContextDescriptor, GraphicsError};
pub use culling::{CullingFlags, CullingSettings, CullingUniforms};
pub use depth::{DEFAULT_DEPTH_FORMAT, DepthTexture};
pub use executor::{DrawTarget, ExecutorError, FlushStats, SubmitMode, WgpuExecutor};
pub use features::GpuFeatures;
pub use frame::{FrameGlobals, HiZState};
pub use generator::{
    BoundsStrategy, FixedBounds, PlacementParams, PositionStrategy, VolumeBounds, VolumePlacement,
};
pub use hiz::{DepthPyramid, HiZPyramidBuilder, HiZSettings};
pub use indirect::{DrawIndexedIndirect, IndirectArgsBuffer};
pub use instance_set::{
    DrawOutcome, InstanceSetDescriptor, InstanceSetId, InstanceSetState, RenderableInstanceSet,
    SkipReason,
};
pub use material::{InstancedMaterial, MaterialSource, PipelineState, ShaderAsset};
pub use mesh::{InstanceMesh, SubMesh, VertexFormat};
pub use pipeline::{FrameReport, IndirectDrawPipeline, PipelineConfig};
pub use registry::{RendererRegistry, SharedInstanceSet, share};
#[cfg(feature = "mock")]
pub use software::{DrawRecord, SoftwareExecutor};

pub use thicket_core::geometry::Size;
pub use thicket_core::math::Aabb;
