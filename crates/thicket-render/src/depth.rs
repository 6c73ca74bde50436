//! Depth texture abstraction.
//!
//! The depth buffer is the Hi-Z pyramid's source, so it is created with
//! `TEXTURE_BINDING` in addition to `RENDER_ATTACHMENT`.

use thicket_core::geometry::Size;
use thicket_test_utils::{GpuTexture, RenderContext};

/// Default depth format used for depth textures.
pub const DEFAULT_DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// A depth texture that can be sampled by compute passes.
///
/// # Example
///
/// ```ignore
/// let mut depth = DepthTexture::new(&ctx, 800, 600, DEFAULT_DEPTH_FORMAT);
///
/// // Later, if window resizes:
/// if depth.needs_resize(new_width, new_height) {
///     depth.resize(&ctx, new_width, new_height);
/// }
/// ```
#[derive(Debug)]
pub struct DepthTexture {
    texture: GpuTexture,
    size: Size<u32>,
    format: wgpu::TextureFormat,
}

impl DepthTexture {
    pub fn new(ctx: &dyn RenderContext, width: u32, height: u32, format: wgpu::TextureFormat) -> Self {
        Self {
            texture: create_depth_texture(ctx, width, height, format),
            size: Size::new(width, height),
            format,
        }
    }

    /// Wrap an existing depth texture.
    pub fn from_texture(texture: GpuTexture) -> Self {
        Self {
            size: Size::new(texture.width(), texture.height()),
            format: texture.format(),
            texture,
        }
    }

    /// Resize the depth texture if dimensions have changed.
    ///
    /// The old texture is destroyed; render passes using it must have been
    /// submitted already.
    pub fn resize(&mut self, ctx: &dyn RenderContext, width: u32, height: u32) {
        if !self.needs_resize(width, height) {
            return;
        }

        ctx.destroy_texture(&self.texture);
        self.texture = create_depth_texture(ctx, width, height, self.format);
        self.size = Size::new(width, height);
    }

    pub fn texture(&self) -> &GpuTexture {
        &self.texture
    }

    pub fn size(&self) -> Size<u32> {
        self.size
    }

    pub fn width(&self) -> u32 {
        self.size.width
    }

    pub fn height(&self) -> u32 {
        self.size.height
    }

    pub fn needs_resize(&self, width: u32, height: u32) -> bool {
        self.size != Size::new(width, height)
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.format
    }
}

fn create_depth_texture(
    ctx: &dyn RenderContext,
    width: u32,
    height: u32,
    format: wgpu::TextureFormat,
) -> GpuTexture {
    ctx.create_texture(&wgpu::TextureDescriptor {
        label: Some("Depth Texture"),
        size: wgpu::Extent3d {
            width: width.max(1),
            height: height.max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
        view_formats: &[],
    })
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use thicket_test_utils::MockRenderContext;

    #[test]
    fn test_resize_replaces_texture() {
        let mock = MockRenderContext::new();
        let mut depth = DepthTexture::new(&mock, 800, 600, DEFAULT_DEPTH_FORMAT);
        let old = depth.texture().clone();

        depth.resize(&mock, 800, 600);
        assert_eq!(mock.count_texture_creates(), 1);

        depth.resize(&mock, 1920, 1080);
        assert_eq!(mock.texture_destroy_count(&old), 1);
        assert_eq!(depth.size(), Size::new(1920, 1080));
        assert_eq!(depth.texture().width(), 1920);
        assert_eq!(mock.live_texture_count(), 1);
    }
}
