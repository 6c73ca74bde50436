//! Implementation of RenderContext trait for GraphicsContext.
//!
//! This allows GraphicsContext to be used polymorphically with the
//! RenderContext trait, enabling testing with MockRenderContext.

use crate::context::GraphicsContext;
use thicket_test_utils::{GpuBuffer, GpuTexture, RenderContext};
use wgpu::{BufferDescriptor, TextureDescriptor};

impl RenderContext for GraphicsContext {
    fn create_buffer(&self, desc: &BufferDescriptor) -> GpuBuffer {
        let buffer = self.device.create_buffer(desc);
        GpuBuffer::from_wgpu(buffer)
    }

    fn write_buffer(&self, buffer: &GpuBuffer, offset: u64, data: &[u8]) {
        if let Some(wgpu_buffer) = buffer.try_as_wgpu() {
            self.queue.write_buffer(wgpu_buffer, offset, data);
        }
    }

    fn destroy_buffer(&self, buffer: &GpuBuffer) {
        if let Some(wgpu_buffer) = buffer.try_as_wgpu() {
            wgpu_buffer.destroy();
        }
    }

    fn create_texture(&self, desc: &TextureDescriptor) -> GpuTexture {
        let texture = self.device.create_texture(desc);
        GpuTexture::from_wgpu(texture)
    }

    fn destroy_texture(&self, texture: &GpuTexture) {
        if let Some(wgpu_texture) = texture.try_as_wgpu() {
            wgpu_texture.destroy();
        }
    }
}
