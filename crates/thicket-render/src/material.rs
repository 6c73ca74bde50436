//! Materials for instanced indirect draws.
//!
//! A material pairs a WGSL shader with fixed pipeline state. The shader's vertex
//! stage reads the compacted visible-index buffer and the transform buffer:
//!
//! ```wgsl
//! @group(0) @binding(0) var<uniform> draw: DrawUniforms;
//! @group(0) @binding(1) var<storage, read> positions: array<mat4x4<f32>>;
//! @group(0) @binding(2) var<storage, read> visible_ids: array<u32>;
//! ```
//!
//! and must export `vs_main` and `fs_main`.

use std::borrow::Cow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialId(u64);

fn next_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// WGSL source for an instanced material.
#[derive(Debug)]
pub struct ShaderAsset {
    id: ShaderId,
    label: String,
    source: Cow<'static, str>,
}

impl ShaderAsset {
    pub fn new(label: impl Into<String>, source: impl Into<Cow<'static, str>>) -> Arc<Self> {
        Arc::new(Self {
            id: ShaderId(next_id()),
            label: label.into(),
            source: source.into(),
        })
    }

    /// The built-in unlit shader.
    pub fn unlit() -> Arc<Self> {
        Self::new("Instanced Unlit", include_str!("shaders/instanced_unlit.wgsl"))
    }

    pub fn id(&self) -> ShaderId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

/// Pipeline state configuration for a material.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineState {
    /// Cull mode (default: Some(Back))
    pub cull_mode: Option<wgpu::Face>,
    /// Front face winding (default: Ccw)
    pub front_face: wgpu::FrontFace,
    /// Depth test enabled (default: true)
    pub depth_test: bool,
    /// Depth write enabled (default: true)
    pub depth_write: bool,
    /// Blend mode (default: None - opaque)
    pub blend: Option<wgpu::BlendState>,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            cull_mode: Some(wgpu::Face::Back),
            front_face: wgpu::FrontFace::Ccw,
            depth_test: true,
            depth_write: true,
            blend: None,
        }
    }
}

/// A material an instance set draws with.
#[derive(Debug)]
pub struct InstancedMaterial {
    id: MaterialId,
    label: String,
    shader: Arc<ShaderAsset>,
    pipeline_state: PipelineState,
    destroyed: AtomicBool,
}

impl InstancedMaterial {
    pub fn new(label: impl Into<String>, shader: Arc<ShaderAsset>) -> Arc<Self> {
        Self::with_state(label, shader, PipelineState::default())
    }

    pub fn with_state(
        label: impl Into<String>,
        shader: Arc<ShaderAsset>,
        pipeline_state: PipelineState,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: MaterialId(next_id()),
            label: label.into(),
            shader,
            pipeline_state,
            destroyed: AtomicBool::new(false),
        })
    }

    /// Instantiate a material from a shader, named after it.
    pub fn from_shader(shader: Arc<ShaderAsset>) -> Arc<Self> {
        let label = format!("{} (instanced)", shader.label());
        Self::new(label, shader)
    }

    pub fn id(&self) -> MaterialId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn shader(&self) -> &Arc<ShaderAsset> {
        &self.shader
    }

    pub fn pipeline_state(&self) -> &PipelineState {
        &self.pipeline_state
    }

    /// Mark the material as destroyed. Draws using it are skipped from now on.
    pub fn destroy(&self) {
        self.destroyed.store(true, Ordering::Release);
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}

/// Where an instance set gets its material from.
#[derive(Debug, Clone)]
pub enum MaterialSource {
    /// An externally owned material; never destroyed by the set.
    Shared(Arc<InstancedMaterial>),
    /// A shader the set instantiates (and owns) a material for.
    FromShader(Arc<ShaderAsset>),
}

impl MaterialSource {
    pub fn shader(&self) -> &Arc<ShaderAsset> {
        match self {
            MaterialSource::Shared(material) => material.shader(),
            MaterialSource::FromShader(shader) => shader,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_shader_names_material() {
        let shader = ShaderAsset::new("Grass", "// wgsl");
        let material = InstancedMaterial::from_shader(shader.clone());
        assert_eq!(material.label(), "Grass (instanced)");
        assert_eq!(material.shader().id(), shader.id());
    }

    #[test]
    fn test_destroy() {
        let material = InstancedMaterial::new("Rocks", ShaderAsset::unlit());
        assert!(!material.is_destroyed());
        material.destroy();
        assert!(material.is_destroyed());
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(ShaderAsset::unlit().id(), ShaderAsset::unlit().id());
    }

    #[test]
    fn test_source_shader() {
        let shader = ShaderAsset::unlit();
        let shared = MaterialSource::Shared(InstancedMaterial::from_shader(shader.clone()));
        assert_eq!(shared.shader().id(), shader.id());
        assert_eq!(MaterialSource::FromShader(shader.clone()).shader().id(), shader.id());
    }
}
