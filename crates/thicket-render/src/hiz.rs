//! Hierarchical depth (Hi-Z) pyramid.
//!
//! Level 0 is the frame's depth buffer resampled into a square power-of-two
//! texture; every further level keeps the farthest depth of a 2x2 block of
//! the level above. Culling samples the level whose texels are about as
//! large as an instance's screen footprint.
//!
//! Levels past 0 are produced in scratch textures and copied into the
//! pyramid's mips. Scratch textures come from a [`ScratchPool`] and are
//! returned as soon as the next level has been reduced from them.

use ahash::AHashMap;
use thicket_core::profiling::profile_function;
use thicket_test_utils::{GpuTexture, RenderContext};
use tracing::{debug, info};

use crate::camera::CameraKind;
use crate::commands::{CommandList, GpuCommand};
use crate::culling::HiZLookup;
use crate::depth::DepthTexture;
use crate::frame::{FrameGlobals, HiZState};

/// Format of the pyramid and its scratch levels.
pub const HI_Z_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Float;

/// Sizing of the pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HiZSettings {
    /// Largest side of level 0
    pub max_size: u32,
    /// Reduction stops once a level is this small
    pub min_level_size: u32,
}

impl Default for HiZSettings {
    fn default() -> Self {
        Self {
            max_size: 1024,
            min_level_size: 8,
        }
    }
}

/// Side of level 0 for a `width` x `height` depth buffer.
pub fn pyramid_base_size(width: u32, height: u32, max_size: u32) -> u32 {
    width
        .max(height)
        .max(1)
        .next_power_of_two()
        .min(max_size.max(1))
}

/// Sides of the levels after level 0.
pub fn mip_chain_sizes(base_size: u32, min_level_size: u32) -> Vec<u32> {
    let mut sizes = Vec::new();
    let mut size = base_size;
    while size > min_level_size {
        size = (size / 2).max(1);
        sizes.push(size);
        if size == 1 {
            break;
        }
    }
    sizes
}

/// Pooled scratch textures for intermediate levels, keyed by side length.
#[derive(Debug, Default)]
pub struct ScratchPool {
    free: AHashMap<u32, Vec<GpuTexture>>,
    labels: Vec<String>,
    created: usize,
    in_use: usize,
    peak_in_use: usize,
}

impl ScratchPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached debug label for the scratch texture of `level`.
    fn label(&mut self, level: usize) -> &str {
        while self.labels.len() <= level {
            let next = self.labels.len();
            self.labels.push(format!("Hi-Z Scratch {next}"));
        }
        &self.labels[level]
    }

    /// Take a `size` x `size` scratch texture, creating one if none is free.
    pub fn acquire(&mut self, ctx: &dyn RenderContext, level: usize, size: u32) -> GpuTexture {
        self.in_use += 1;
        self.peak_in_use = self.peak_in_use.max(self.in_use);

        if let Some(texture) = self.free.get_mut(&size).and_then(Vec::pop) {
            return texture;
        }

        self.created += 1;
        let label = self.label(level).to_owned();
        ctx.create_texture(&wgpu::TextureDescriptor {
            label: Some(&label),
            size: wgpu::Extent3d {
                width: size,
                height: size,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: HI_Z_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        })
    }

    /// Hand a scratch texture back for reuse.
    pub fn recycle(&mut self, texture: GpuTexture) {
        self.in_use = self.in_use.saturating_sub(1);
        self.free.entry(texture.width()).or_default().push(texture);
    }

    /// Retire every pooled texture into `commands` and forget the cached labels.
    pub fn release(&mut self, commands: &mut CommandList) {
        for texture in self.free.drain().flat_map(|(_, textures)| textures) {
            commands.retire_texture(texture);
        }
        self.labels.clear();
        self.created = 0;
        self.in_use = 0;
    }

    pub fn in_use(&self) -> usize {
        self.in_use
    }

    /// Most scratch textures held at once since creation.
    pub fn peak_in_use(&self) -> usize {
        self.peak_in_use
    }

    pub fn pooled_count(&self) -> usize {
        self.free.values().map(Vec::len).sum()
    }

    pub fn created_count(&self) -> usize {
        self.created
    }

    pub fn cached_label_count(&self) -> usize {
        self.labels.len()
    }
}

/// Builds the Hi-Z pyramid of the primary camera once per frame.
#[derive(Debug, Default)]
pub struct HiZPyramidBuilder {
    settings: HiZSettings,
    pyramid: Option<GpuTexture>,
    size: u32,
    mip_level_count: u32,
    scratch: ScratchPool,
}

impl HiZPyramidBuilder {
    pub fn new(settings: HiZSettings) -> Self {
        Self {
            settings,
            ..Default::default()
        }
    }

    pub fn settings(&self) -> HiZSettings {
        self.settings
    }

    /// Record the build of this frame's pyramid from `depth`.
    ///
    /// Does nothing for cameras other than [`CameraKind::Game`]. On success
    /// the pyramid is published to `globals` and `true` is returned.
    pub fn build(
        &mut self,
        ctx: &dyn RenderContext,
        depth: &DepthTexture,
        camera_kind: CameraKind,
        globals: &mut FrameGlobals,
        commands: &mut CommandList,
    ) -> bool {
        profile_function!();

        if !camera_kind.is_primary() {
            debug!(?camera_kind, "Skipping Hi-Z build for non-primary camera");
            return false;
        }

        let size = pyramid_base_size(depth.width(), depth.height(), self.settings.max_size);
        let chain = mip_chain_sizes(size, self.settings.min_level_size);
        let pyramid = self.ensure_pyramid(ctx, size, chain.len() as u32 + 1, commands);

        commands.push_debug_group("Hi-Z Pyramid");
        commands.push(GpuCommand::CopyDepthToHiZ {
            depth: depth.texture().clone(),
            target: pyramid.clone(),
            size,
        });

        let mut previous: Option<GpuTexture> = None;
        for (index, &level_size) in chain.iter().enumerate() {
            let scratch = self.scratch.acquire(ctx, index, level_size);
            let source = previous.clone().unwrap_or_else(|| pyramid.clone());

            commands.push(GpuCommand::ReduceHiZ {
                source,
                target: scratch.clone(),
                size: level_size,
            });
            commands.push(GpuCommand::CopyTextureToMip {
                source: scratch.clone(),
                target: pyramid.clone(),
                mip_level: index as u32 + 1,
                size: level_size,
            });

            if let Some(consumed) = previous.replace(scratch) {
                self.scratch.recycle(consumed);
            }
        }
        if let Some(last) = previous {
            self.scratch.recycle(last);
        }
        commands.pop_debug_group();

        globals.hi_z = Some(HiZState {
            texture: pyramid,
            size,
            mip_level_count: self.mip_level_count,
        });
        true
    }

    fn ensure_pyramid(
        &mut self,
        ctx: &dyn RenderContext,
        size: u32,
        mip_level_count: u32,
        commands: &mut CommandList,
    ) -> GpuTexture {
        if let Some(pyramid) = &self.pyramid
            && self.size == size
            && self.mip_level_count == mip_level_count
        {
            return pyramid.clone();
        }

        if let Some(old) = self.pyramid.take() {
            commands.retire_texture(old);
        }

        info!(size, mip_level_count, "Allocating Hi-Z pyramid");
        let pyramid = ctx.create_texture(&wgpu::TextureDescriptor {
            label: Some("Hi-Z Pyramid"),
            size: wgpu::Extent3d {
                width: size,
                height: size,
                depth_or_array_layers: 1,
            },
            mip_level_count,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: HI_Z_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        self.pyramid = Some(pyramid.clone());
        self.size = size;
        self.mip_level_count = mip_level_count;
        pyramid
    }

    pub fn pyramid(&self) -> Option<&GpuTexture> {
        self.pyramid.as_ref()
    }

    /// Side of level 0 of the current pyramid, zero before the first build.
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn mip_level_count(&self) -> u32 {
        self.mip_level_count
    }

    pub fn scratch(&self) -> &ScratchPool {
        &self.scratch
    }

    /// Retire the pyramid and every scratch texture into `commands`.
    pub fn release(&mut self, commands: &mut CommandList) {
        if let Some(pyramid) = self.pyramid.take() {
            info!("Releasing Hi-Z pyramid");
            commands.retire_texture(pyramid);
        }
        self.scratch.release(commands);
        self.size = 0;
        self.mip_level_count = 0;
    }
}

/// Source texel range `[start, end]` covered by pyramid texel `index`.
fn footprint(index: u32, source: u32, target: u32) -> (u32, u32) {
    let (index, source, target) = (index as u64, source as u64, target as u64);
    let start = index * source / target;
    let end = ((index + 1) * source).div_ceil(target).saturating_sub(1);
    let last = source.saturating_sub(1);
    (start.min(last) as u32, end.max(start).min(last) as u32)
}

/// Resample a `width` x `height` depth image into level 0 of side `size`.
///
/// Every texel keeps the farthest depth of the source pixels it covers.
pub fn resample_depth(depth: &[f32], width: u32, height: u32, size: u32) -> Vec<f32> {
    let mut level = vec![0.0; (size * size) as usize];
    if width == 0 || height == 0 {
        return level;
    }

    for y in 0..size {
        let (y0, y1) = footprint(y, height, size);
        for x in 0..size {
            let (x0, x1) = footprint(x, width, size);
            let mut farthest = 0.0f32;
            for sy in y0..=y1 {
                for sx in x0..=x1 {
                    let sample = depth.get((sy * width + sx) as usize).copied().unwrap_or(1.0);
                    farthest = farthest.max(sample);
                }
            }
            level[(y * size + x) as usize] = farthest;
        }
    }
    level
}

/// Max-reduce 2x2 blocks of a `previous_size` level into a level of side `size`.
pub fn reduce_level(previous: &[f32], previous_size: u32, size: u32) -> Vec<f32> {
    let last = previous_size.saturating_sub(1);
    let load = |x: u32, y: u32| {
        let (x, y) = (x.min(last), y.min(last));
        previous
            .get((y * previous_size + x) as usize)
            .copied()
            .unwrap_or(1.0)
    };

    let mut level = vec![0.0; (size * size) as usize];
    for y in 0..size {
        for x in 0..size {
            let (sx, sy) = (x * 2, y * 2);
            level[(y * size + x) as usize] = load(sx, sy)
                .max(load(sx + 1, sy))
                .max(load(sx, sy + 1))
                .max(load(sx + 1, sy + 1));
        }
    }
    level
}

/// A Hi-Z pyramid held on the CPU.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthPyramid {
    levels: Vec<Vec<f32>>,
    size: u32,
}

impl DepthPyramid {
    /// Build the full pyramid of a depth image.
    pub fn from_depth(depth: &[f32], width: u32, height: u32, settings: HiZSettings) -> Self {
        let size = pyramid_base_size(width, height, settings.max_size);
        let mut levels = vec![resample_depth(depth, width, height, size)];
        let mut previous_size = size;
        for level_size in mip_chain_sizes(size, settings.min_level_size) {
            let next = levels
                .last()
                .map(|previous| reduce_level(previous, previous_size, level_size))
                .unwrap_or_default();
            levels.push(next);
            previous_size = level_size;
        }
        Self { levels, size }
    }

    /// Wrap levels computed elsewhere. Level `k` must have side `size >> k`.
    pub fn from_levels(size: u32, levels: Vec<Vec<f32>>) -> Self {
        Self { levels, size }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn level_count(&self) -> u32 {
        self.levels.len() as u32
    }

    pub fn level(&self, level: u32) -> Option<&[f32]> {
        self.levels.get(level as usize).map(Vec::as_slice)
    }
}

impl HiZLookup for DepthPyramid {
    fn load(&self, level: u32, x: u32, y: u32) -> f32 {
        let side = (self.size >> level).max(1);
        self.level(level)
            .and_then(|texels| texels.get((y.min(side - 1) * side + x.min(side - 1)) as usize))
            .copied()
            // Missing data never occludes
            .unwrap_or(1.0)
    }
}
