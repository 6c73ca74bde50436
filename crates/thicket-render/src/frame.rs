//! State shared by every pass of one frame.

use thicket_test_utils::GpuTexture;

/// The Hi-Z pyramid as published by the builder for the current frame.
#[derive(Debug, Clone)]
pub struct HiZState {
    pub texture: GpuTexture,
    /// Side length of level 0
    pub size: u32,
    /// Total levels, level 0 included
    pub mip_level_count: u32,
}

/// Frame-wide values read by culling and by instanced shaders.
///
/// Only the pipeline writes this; sets receive it by reference.
#[derive(Debug, Clone, Default)]
pub struct FrameGlobals {
    /// Global Hi-Z toggle, mirrored into every draw's uniforms
    pub hi_z_enabled: bool,
    pub hi_z: Option<HiZState>,
    pub frame_index: u64,
}

impl FrameGlobals {
    /// The pyramid to cull against, if occlusion culling is globally on and one was built.
    pub fn active_hi_z(&self) -> Option<&HiZState> {
        if self.hi_z_enabled {
            self.hi_z.as_ref()
        } else {
            None
        }
    }
}
