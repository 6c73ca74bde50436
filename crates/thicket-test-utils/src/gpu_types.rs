//! GPU resource wrappers that can be real or mock.
//!
//! These types wrap WGPU resources and allow for both real GPU operations
//! and mock implementations for testing.

use wgpu;

/// Wrapper around GPU buffer that can be real or mock.
///
/// # Design Pattern: Opaque Wrapper
///
/// This type hides whether it contains a real `wgpu::Buffer` or a mock.
/// Users hold owned `GpuBuffer`, which is cheap to clone (Arc inside).
#[derive(Clone, Debug)]
pub struct GpuBuffer {
    inner: GpuBufferInner,
}

#[derive(Clone, Debug)]
enum GpuBufferInner {
    Real(wgpu::Buffer),
    #[cfg(feature = "mock")]
    Mock { id: usize, size: u64 },
}

impl GpuBuffer {
    /// Create from real WGPU buffer
    pub fn from_wgpu(buffer: wgpu::Buffer) -> Self {
        Self {
            inner: GpuBufferInner::Real(buffer),
        }
    }

    /// Create mock buffer (for testing)
    #[cfg(feature = "mock")]
    pub fn mock(id: usize, size: u64) -> Self {
        Self {
            inner: GpuBufferInner::Mock { id, size },
        }
    }

    /// Get the underlying wgpu::Buffer (if real)
    ///
    /// # Panics
    /// Panics if this is a mock buffer (test code should never call this)
    pub fn as_wgpu(&self) -> &wgpu::Buffer {
        match self.try_as_wgpu() {
            Some(buffer) => buffer,
            None => {
                panic!("Attempted to get wgpu::Buffer from mock buffer - this is a test-only buffer")
            }
        }
    }

    /// Get the underlying wgpu::Buffer, or `None` for mocks.
    pub fn try_as_wgpu(&self) -> Option<&wgpu::Buffer> {
        match &self.inner {
            GpuBufferInner::Real(buffer) => Some(buffer),
            #[cfg(feature = "mock")]
            GpuBufferInner::Mock { .. } => None,
        }
    }

    /// Size of the buffer in bytes.
    pub fn size(&self) -> u64 {
        match &self.inner {
            GpuBufferInner::Real(buffer) => buffer.size(),
            #[cfg(feature = "mock")]
            GpuBufferInner::Mock { size, .. } => *size,
        }
    }

    /// Check if this is a mock (useful in tests)
    #[cfg(feature = "mock")]
    pub fn is_mock(&self) -> bool {
        matches!(self.inner, GpuBufferInner::Mock { .. })
    }

    /// Get mock ID (for test assertions)
    #[cfg(feature = "mock")]
    pub fn mock_id(&self) -> Option<usize> {
        match &self.inner {
            GpuBufferInner::Mock { id, .. } => Some(*id),
            _ => None,
        }
    }
}

/// Wrapper around GPU texture that can be real or mock.
#[derive(Clone, Debug)]
pub struct GpuTexture {
    inner: GpuTextureInner,
}

#[derive(Clone, Debug)]
enum GpuTextureInner {
    Real(wgpu::Texture),
    #[cfg(feature = "mock")]
    Mock {
        id: usize,
        width: u32,
        height: u32,
        mip_level_count: u32,
        format: wgpu::TextureFormat,
    },
}

impl GpuTexture {
    /// Create from real WGPU texture
    pub fn from_wgpu(texture: wgpu::Texture) -> Self {
        Self {
            inner: GpuTextureInner::Real(texture),
        }
    }

    /// Create mock texture (for testing)
    #[cfg(feature = "mock")]
    pub fn mock(
        id: usize,
        width: u32,
        height: u32,
        mip_level_count: u32,
        format: wgpu::TextureFormat,
    ) -> Self {
        Self {
            inner: GpuTextureInner::Mock {
                id,
                width,
                height,
                mip_level_count,
                format,
            },
        }
    }

    /// Get the underlying wgpu::Texture (if real)
    ///
    /// # Panics
    /// Panics if this is a mock texture
    pub fn as_wgpu(&self) -> &wgpu::Texture {
        match self.try_as_wgpu() {
            Some(texture) => texture,
            None => panic!("Attempted to get wgpu::Texture from mock texture"),
        }
    }

    /// Get the underlying wgpu::Texture, or `None` for mocks.
    pub fn try_as_wgpu(&self) -> Option<&wgpu::Texture> {
        match &self.inner {
            GpuTextureInner::Real(texture) => Some(texture),
            #[cfg(feature = "mock")]
            GpuTextureInner::Mock { .. } => None,
        }
    }

    pub fn width(&self) -> u32 {
        match &self.inner {
            GpuTextureInner::Real(texture) => texture.width(),
            #[cfg(feature = "mock")]
            GpuTextureInner::Mock { width, .. } => *width,
        }
    }

    pub fn height(&self) -> u32 {
        match &self.inner {
            GpuTextureInner::Real(texture) => texture.height(),
            #[cfg(feature = "mock")]
            GpuTextureInner::Mock { height, .. } => *height,
        }
    }

    pub fn mip_level_count(&self) -> u32 {
        match &self.inner {
            GpuTextureInner::Real(texture) => texture.mip_level_count(),
            #[cfg(feature = "mock")]
            GpuTextureInner::Mock {
                mip_level_count, ..
            } => *mip_level_count,
        }
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        match &self.inner {
            GpuTextureInner::Real(texture) => texture.format(),
            #[cfg(feature = "mock")]
            GpuTextureInner::Mock { format, .. } => *format,
        }
    }

    /// Check if this is a mock
    #[cfg(feature = "mock")]
    pub fn is_mock(&self) -> bool {
        matches!(self.inner, GpuTextureInner::Mock { .. })
    }

    /// Get mock ID (for test assertions)
    #[cfg(feature = "mock")]
    pub fn mock_id(&self) -> Option<usize> {
        match &self.inner {
            GpuTextureInner::Mock { id, .. } => Some(*id),
            _ => None,
        }
    }
}
