//! Frame orchestration of the instancing pipeline.
//!
//! The host renderer drives [`IndirectDrawPipeline`] through three hooks per
//! frame:
//!
//! - [`prepare`](IndirectDrawPipeline::prepare) at frame start,
//! - [`before_opaque`](IndirectDrawPipeline::before_opaque), which builds the Hi-Z pyramid once,
//! - [`before_transparent`](IndirectDrawPipeline::before_transparent), which culls and draws
//!   every registered set that is not self-scheduled.
//!
//! Everything is recorded into the caller's [`CommandList`], including the
//! destruction of resources retired by resizes and releases. Those run after
//! every command recorded before them, so a set may be disabled at any point
//! of a frame.

use std::sync::Arc;

use thicket_core::profiling::profile_function;
use thicket_test_utils::RenderContext;
use tracing::{debug, info};

use crate::camera::CullingView;
use crate::commands::CommandList;
use crate::depth::DepthTexture;
use crate::frame::FrameGlobals;
use crate::hiz::{HiZPyramidBuilder, HiZSettings};
use crate::instance_set::{DrawOutcome, InstanceSetId, SkipReason};
use crate::registry::{RendererRegistry, SharedInstanceSet};

/// Pipeline-wide configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineConfig {
    /// Global Hi-Z toggle; sets requesting Hi-Z fall back to frustum culling when off
    pub hi_z_culling: bool,
    pub hi_z: HiZSettings,
    /// Bytes of uniform data the executor may stream per frame
    pub uniform_arena_size: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            hi_z_culling: true,
            hi_z: HiZSettings::default(),
            uniform_arena_size: 64 * 1024,
        }
    }
}

impl PipelineConfig {
    pub fn with_hi_z_culling(mut self, enabled: bool) -> Self {
        self.hi_z_culling = enabled;
        self
    }

    pub fn with_hi_z_settings(mut self, settings: HiZSettings) -> Self {
        self.hi_z = settings;
        self
    }

    pub fn with_uniform_arena_size(mut self, size: u64) -> Self {
        self.uniform_arena_size = size;
        self
    }
}

/// What the shared pass did this frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameReport {
    pub drawn: usize,
    /// Upper bound of instances submitted to culling
    pub dispatched_instances: u64,
    pub skipped: Vec<(InstanceSetId, SkipReason)>,
    /// Sets left to draw themselves
    pub self_scheduled: usize,
}

/// Owns the registry and the Hi-Z pyramid and records per-frame passes.
#[derive(Debug)]
pub struct IndirectDrawPipeline {
    config: PipelineConfig,
    registry: Arc<RendererRegistry>,
    hi_z: HiZPyramidBuilder,
    globals: FrameGlobals,
}

impl IndirectDrawPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            hi_z: HiZPyramidBuilder::new(config.hi_z),
            registry: RendererRegistry::new(),
            globals: FrameGlobals::default(),
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<RendererRegistry> {
        &self.registry
    }

    pub fn globals(&self) -> &FrameGlobals {
        &self.globals
    }

    pub fn hi_z_builder(&self) -> &HiZPyramidBuilder {
        &self.hi_z
    }

    pub fn set_hi_z_culling(&mut self, enabled: bool) {
        self.config.hi_z_culling = enabled;
    }

    /// Enable a set and add it to the shared pass.
    pub fn enable_set(
        &self,
        ctx: &dyn RenderContext,
        set: &SharedInstanceSet,
        commands: &mut CommandList,
    ) {
        set.lock().enable(ctx, commands);
        self.registry.register(set);
    }

    /// Release a set and remove it from the shared pass. Safe to repeat.
    ///
    /// Its buffers are destroyed when `commands` is flushed.
    pub fn disable_set(&self, set: &SharedInstanceSet, commands: &mut CommandList) {
        set.lock().release(commands);
        self.registry.unregister(set);
    }

    /// Start a frame: publish the Hi-Z toggle and drop last frame's pyramid state.
    pub fn prepare(&mut self, frame_index: u64) {
        profile_function!();
        self.globals.frame_index = frame_index;
        self.globals.hi_z_enabled = self.config.hi_z_culling;
        self.globals.hi_z = None;
    }

    /// Build the Hi-Z pyramid from `depth` if any registered set wants it.
    ///
    /// Returns whether a pyramid was recorded.
    pub fn before_opaque(
        &mut self,
        ctx: &dyn RenderContext,
        view: &CullingView,
        depth: &DepthTexture,
        commands: &mut CommandList,
    ) -> bool {
        profile_function!();

        if !self.config.hi_z_culling {
            return false;
        }
        if !self.registry.any(|set| set.culling().hi_z) {
            debug!("No instance set requests Hi-Z culling");
            return false;
        }
        self.hi_z
            .build(ctx, depth, view.kind, &mut self.globals, commands)
    }

    /// Cull and draw every registered set that is not self-scheduled.
    pub fn before_transparent(
        &mut self,
        ctx: &dyn RenderContext,
        view: &CullingView,
        commands: &mut CommandList,
    ) -> FrameReport {
        profile_function!();

        let mut report = FrameReport::default();
        if self.registry.is_empty() {
            return report;
        }

        commands.push_debug_group("Draw Indirect Render");
        let globals = &self.globals;
        self.registry.for_each(|set| {
            if set.draw_by_self() {
                report.self_scheduled += 1;
                return;
            }
            match set.render(ctx, view, globals, commands) {
                DrawOutcome::Drawn { instance_count } => {
                    report.drawn += 1;
                    report.dispatched_instances += instance_count as u64;
                }
                DrawOutcome::Skipped(reason) => report.skipped.push((set.id(), reason)),
            }
        });
        commands.pop_debug_group();

        report
    }

    /// Cull and draw a self-scheduled set with this frame's globals.
    pub fn draw_self(
        &self,
        ctx: &dyn RenderContext,
        set: &SharedInstanceSet,
        view: &CullingView,
        commands: &mut CommandList,
    ) -> DrawOutcome {
        set.lock().draw_self(ctx, view, &self.globals, commands)
    }

    /// Release every registered set and the Hi-Z pyramid.
    pub fn release(&mut self, commands: &mut CommandList) {
        info!(sets = self.registry.len(), "Releasing indirect draw pipeline");
        self.registry.for_each(|set| set.release(commands));
        self.registry.clear();
        self.hi_z.release(commands);
        self.globals.hi_z = None;
    }
}

impl Default for IndirectDrawPipeline {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_publishes_toggle() {
        let mut pipeline = IndirectDrawPipeline::new(PipelineConfig::default().with_hi_z_culling(false));
        pipeline.prepare(7);
        assert!(!pipeline.globals().hi_z_enabled);
        assert_eq!(pipeline.globals().frame_index, 7);

        pipeline.set_hi_z_culling(true);
        pipeline.prepare(8);
        assert!(pipeline.globals().hi_z_enabled);
        assert!(pipeline.globals().hi_z.is_none());
    }

    #[test]
    fn test_config_defaults() {
        let config = PipelineConfig::default();
        assert!(config.hi_z_culling);
        assert_eq!(config.hi_z.max_size, 1024);
        assert_eq!(config.hi_z.min_level_size, 8);
    }
}
