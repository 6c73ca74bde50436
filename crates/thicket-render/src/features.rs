//! GPU feature detection and management.
//!
//! This module provides a type-safe wrapper around wgpu features with support for
//! required vs requested features.

use bitflags::bitflags;

bitflags! {
    /// GPU features that can be requested or required.
    ///
    /// Use `GpuFeatures::to_wgpu()` to convert to `wgpu::Features`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct GpuFeatures: u32 {
        /// Allows a non-zero `first_instance` in indirect draw calls.
        const INDIRECT_FIRST_INSTANCE = 1 << 0;

        /// Allows `multi_draw_indexed_indirect_count`, so several instance sets
        /// could share one draw-count buffer.
        const MULTI_DRAW_INDIRECT_COUNT = 1 << 1;

        /// Timestamp queries around the culling and pyramid passes.
        const TIMESTAMP_QUERY = 1 << 2;
    }
}

impl GpuFeatures {
    /// Convert to wgpu::Features.
    pub fn to_wgpu(self) -> wgpu::Features {
        let mut features = wgpu::Features::empty();

        if self.contains(GpuFeatures::INDIRECT_FIRST_INSTANCE) {
            features |= wgpu::Features::INDIRECT_FIRST_INSTANCE;
        }
        if self.contains(GpuFeatures::MULTI_DRAW_INDIRECT_COUNT) {
            features |= wgpu::Features::MULTI_DRAW_INDIRECT_COUNT;
        }
        if self.contains(GpuFeatures::TIMESTAMP_QUERY) {
            features |= wgpu::Features::TIMESTAMP_QUERY;
        }

        features
    }

    /// Convert from wgpu::Features to GpuFeatures.
    ///
    /// Only features that have a corresponding GpuFeatures flag are included.
    pub fn from_wgpu(features: wgpu::Features) -> Self {
        let mut gpu_features = GpuFeatures::empty();

        if features.contains(wgpu::Features::INDIRECT_FIRST_INSTANCE) {
            gpu_features |= GpuFeatures::INDIRECT_FIRST_INSTANCE;
        }
        if features.contains(wgpu::Features::MULTI_DRAW_INDIRECT_COUNT) {
            gpu_features |= GpuFeatures::MULTI_DRAW_INDIRECT_COUNT;
        }
        if features.contains(wgpu::Features::TIMESTAMP_QUERY) {
            gpu_features |= GpuFeatures::TIMESTAMP_QUERY;
        }

        gpu_features
    }

    /// Check if all the specified features are supported by the adapter.
    pub fn check_support(self, adapter: &wgpu::Adapter) -> FeatureSupportResult {
        self.check_against(GpuFeatures::from_wgpu(adapter.features()))
    }

    /// Check these features against an already known supported set.
    pub fn check_against(self, supported: GpuFeatures) -> FeatureSupportResult {
        let missing = self - (self & supported);

        if missing.is_empty() {
            FeatureSupportResult::Supported
        } else {
            FeatureSupportResult::Missing(missing)
        }
    }
}

impl Default for GpuFeatures {
    fn default() -> Self {
        GpuFeatures::empty()
    }
}

/// Result of checking feature support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureSupportResult {
    /// All requested features are supported.
    Supported,
    /// Some features are missing.
    Missing(GpuFeatures),
}

impl FeatureSupportResult {
    /// Returns true if all features are supported.
    pub fn is_supported(&self) -> bool {
        matches!(self, FeatureSupportResult::Supported)
    }

    /// Returns the missing features, if any.
    pub fn missing(&self) -> Option<GpuFeatures> {
        match self {
            FeatureSupportResult::Supported => None,
            FeatureSupportResult::Missing(features) => Some(*features),
        }
    }
}
