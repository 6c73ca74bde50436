//! Trait abstracting GPU resource lifecycle for testing.
//!
//! The `RenderContext` trait covers the resource operations the instancing
//! pipeline performs directly: creating, writing and releasing buffers and
//! textures. Command encoding is recorded separately and flushed by an
//! executor, so it never goes through this trait.

use crate::gpu_types::*;
use wgpu::{BufferDescriptor, TextureDescriptor};

/// Trait abstracting GPU resource creation and release.
///
/// # Lifetime Considerations
///
/// This trait does NOT use lifetimes because:
/// 1. All returned types are owned (not borrowed from Device)
/// 2. GPU resources use reference counting internally
/// 3. Resources live until dropped or explicitly destroyed
///
/// This makes the trait object-safe and easy to mock.
///
/// # Example
///
/// ```rust,no_run
/// use thicket_test_utils::RenderContext;
/// use wgpu::{BufferDescriptor, BufferUsages};
///
/// fn upload(ctx: &dyn RenderContext) {
///     let desc = BufferDescriptor {
///         label: None,
///         size: 16,
///         usage: BufferUsages::STORAGE | BufferUsages::COPY_DST,
///         mapped_at_creation: false,
///     };
///     let buffer = ctx.create_buffer(&desc);
///     ctx.write_buffer(&buffer, 0, &[0u8; 16]);
///     ctx.destroy_buffer(&buffer);
/// }
/// ```
pub trait RenderContext: Send + Sync {
    // Buffer operations

    /// Create a GPU buffer.
    ///
    /// Returns an owned `GpuBuffer` which can be either real or mock.
    fn create_buffer(&self, desc: &BufferDescriptor) -> GpuBuffer;

    /// Write data to a buffer.
    ///
    /// For real buffers, this maps to `queue.write_buffer()`.
    /// For mock buffers, this records the operation and stores the bytes.
    fn write_buffer(&self, buffer: &GpuBuffer, offset: u64, data: &[u8]);

    /// Release a buffer's GPU memory immediately.
    ///
    /// The handle must not be used afterwards.
    fn destroy_buffer(&self, buffer: &GpuBuffer);

    // Texture operations

    /// Create a GPU texture.
    fn create_texture(&self, desc: &TextureDescriptor) -> GpuTexture;

    /// Release a texture's GPU memory immediately.
    fn destroy_texture(&self, texture: &GpuTexture);
}
