//! Mock implementation of RenderContext for testing.
//!
//! This module provides a mock GPU context that records operations
//! without actually interacting with the GPU. Buffer contents are kept on
//! the CPU so tests (and CPU reference executors) can inspect them.

use crate::{gpu_types::*, render_context::RenderContext};
use parking_lot::Mutex;
use wgpu::*;

/// Records a GPU operation call for verification in tests.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderCall {
    CreateBuffer {
        buffer_id: usize,
        size: u64,
        usage: BufferUsages,
        label: Option<String>,
    },
    WriteBuffer {
        buffer_id: usize,
        offset: u64,
        size: usize,
    },
    DestroyBuffer {
        buffer_id: usize,
    },
    CreateTexture {
        texture_id: usize,
        width: u32,
        height: u32,
        mip_level_count: u32,
        format: TextureFormat,
        label: Option<String>,
    },
    DestroyTexture {
        texture_id: usize,
    },
}

/// Mock buffers stored in the context.
#[derive(Debug, Clone)]
struct MockBuffer {
    usage: BufferUsages,
    label: Option<String>,
    data: Vec<u8>,
    destroy_count: u32,
    writes_after_destroy: u32,
}

/// Mock textures stored in the context.
#[derive(Debug, Clone)]
struct MockTexture {
    label: Option<String>,
    destroy_count: u32,
}

/// Mock implementation of RenderContext for testing.
///
/// # Borrow Checking Pattern: Interior Mutability
///
/// Methods take `&self` but need to mutate internal state (record calls).
/// `parking_lot::Mutex` keeps the context `Send + Sync`, as the trait requires.
///
/// # Example
///
/// ```rust
/// use thicket_test_utils::{MockRenderContext, RenderContext};
/// use wgpu::*;
///
/// let mock = MockRenderContext::new();
///
/// let buffer = mock.create_buffer(&BufferDescriptor {
///     label: None,
///     size: 16,
///     usage: BufferUsages::STORAGE,
///     mapped_at_creation: false,
/// });
/// mock.write_buffer(&buffer, 4, &[1, 0, 0, 0]);
///
/// assert!(buffer.is_mock());
/// assert_eq!(mock.count_buffer_creates(), 1);
/// assert_eq!(mock.buffer_data(&buffer).unwrap()[4], 1);
/// ```
pub struct MockRenderContext {
    /// Recorded calls for verification
    calls: Mutex<Vec<RenderCall>>,

    /// Mock buffers, indexed by id
    buffers: Mutex<Vec<MockBuffer>>,

    /// Mock textures, indexed by id
    textures: Mutex<Vec<MockTexture>>,
}

impl MockRenderContext {
    /// Create a new mock render context.
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            buffers: Mutex::new(Vec::new()),
            textures: Mutex::new(Vec::new()),
        }
    }

    /// Get a copy of all recorded calls (for test assertions).
    pub fn calls(&self) -> Vec<RenderCall> {
        self.calls.lock().clone()
    }

    fn count_calls(&self, predicate: impl Fn(&RenderCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|call| predicate(call)).count()
    }

    /// Count buffer creates.
    pub fn count_buffer_creates(&self) -> usize {
        self.count_calls(|call| matches!(call, RenderCall::CreateBuffer { .. }))
    }

    /// Count buffer write operations.
    pub fn count_buffer_writes(&self) -> usize {
        self.count_calls(|call| matches!(call, RenderCall::WriteBuffer { .. }))
    }

    /// Count buffer destroys.
    pub fn count_buffer_destroys(&self) -> usize {
        self.count_calls(|call| matches!(call, RenderCall::DestroyBuffer { .. }))
    }

    /// Count texture creates.
    pub fn count_texture_creates(&self) -> usize {
        self.count_calls(|call| matches!(call, RenderCall::CreateTexture { .. }))
    }

    /// Count texture destroys.
    pub fn count_texture_destroys(&self) -> usize {
        self.count_calls(|call| matches!(call, RenderCall::DestroyTexture { .. }))
    }

    /// Number of buffers created and not yet destroyed.
    pub fn live_buffer_count(&self) -> usize {
        self.buffers
            .lock()
            .iter()
            .filter(|buffer| buffer.destroy_count == 0)
            .count()
    }

    /// Number of textures created and not yet destroyed.
    pub fn live_texture_count(&self) -> usize {
        self.textures
            .lock()
            .iter()
            .filter(|texture| texture.destroy_count == 0)
            .count()
    }

    /// How many times a buffer was destroyed (0 for live buffers).
    pub fn buffer_destroy_count(&self, buffer: &GpuBuffer) -> u32 {
        buffer
            .mock_id()
            .and_then(|id| self.buffers.lock().get(id).map(|b| b.destroy_count))
            .unwrap_or(0)
    }

    /// How many times a texture was destroyed (0 for live textures).
    pub fn texture_destroy_count(&self, texture: &GpuTexture) -> u32 {
        texture
            .mock_id()
            .and_then(|id| self.textures.lock().get(id).map(|t| t.destroy_count))
            .unwrap_or(0)
    }

    /// Total writes (host or emulated) that targeted an already destroyed buffer.
    pub fn writes_after_destroy(&self) -> u32 {
        self.buffers
            .lock()
            .iter()
            .map(|buffer| buffer.writes_after_destroy)
            .sum()
    }

    pub fn buffer_usage(&self, buffer: &GpuBuffer) -> Option<BufferUsages> {
        let id = buffer.mock_id()?;
        self.buffers.lock().get(id).map(|b| b.usage)
    }

    pub fn buffer_label(&self, buffer: &GpuBuffer) -> Option<String> {
        let id = buffer.mock_id()?;
        self.buffers.lock().get(id).and_then(|b| b.label.clone())
    }

    pub fn texture_label(&self, texture: &GpuTexture) -> Option<String> {
        let id = texture.mock_id()?;
        self.textures.lock().get(id).and_then(|t| t.label.clone())
    }

    /// Snapshot of a mock buffer's current contents.
    pub fn buffer_data(&self, buffer: &GpuBuffer) -> Option<Vec<u8>> {
        let id = buffer.mock_id()?;
        self.buffers.lock().get(id).map(|b| b.data.clone())
    }

    /// Store bytes the way device-side work would, without recording a call.
    ///
    /// Used by CPU reference executors to emulate dispatches and copies.
    pub fn store_device_write(&self, buffer: &GpuBuffer, offset: u64, data: &[u8]) {
        if let Some(id) = buffer.mock_id() {
            let mut buffers = self.buffers.lock();
            if let Some(mock) = buffers.get_mut(id) {
                store_bytes(mock, offset, data);
            }
        }
    }

    /// Clear recorded calls (useful between test steps).
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Get total number of recorded calls.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

fn store_bytes(mock: &mut MockBuffer, offset: u64, data: &[u8]) {
    if mock.destroy_count > 0 {
        mock.writes_after_destroy += 1;
    }
    let start = offset as usize;
    let end = (start + data.len()).min(mock.data.len());
    if start < end {
        mock.data[start..end].copy_from_slice(&data[..end - start]);
    }
}

impl Default for MockRenderContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderContext for MockRenderContext {
    fn create_buffer(&self, desc: &BufferDescriptor) -> GpuBuffer {
        let mut buffers = self.buffers.lock();
        let id = buffers.len();

        buffers.push(MockBuffer {
            usage: desc.usage,
            label: desc.label.map(|s| s.to_string()),
            data: vec![0; desc.size as usize],
            destroy_count: 0,
            writes_after_destroy: 0,
        });

        self.calls.lock().push(RenderCall::CreateBuffer {
            buffer_id: id,
            size: desc.size,
            usage: desc.usage,
            label: desc.label.map(|s| s.to_string()),
        });

        GpuBuffer::mock(id, desc.size)
    }

    fn write_buffer(&self, buffer: &GpuBuffer, offset: u64, data: &[u8]) {
        if let Some(buffer_id) = buffer.mock_id() {
            if let Some(mock) = self.buffers.lock().get_mut(buffer_id) {
                store_bytes(mock, offset, data);
            }
            self.calls.lock().push(RenderCall::WriteBuffer {
                buffer_id,
                offset,
                size: data.len(),
            });
        }
    }

    fn destroy_buffer(&self, buffer: &GpuBuffer) {
        if let Some(buffer_id) = buffer.mock_id() {
            if let Some(mock) = self.buffers.lock().get_mut(buffer_id) {
                mock.destroy_count += 1;
            }
            self.calls.lock().push(RenderCall::DestroyBuffer { buffer_id });
        }
    }

    fn create_texture(&self, desc: &TextureDescriptor) -> GpuTexture {
        let mut textures = self.textures.lock();
        let id = textures.len();

        textures.push(MockTexture {
            label: desc.label.map(|s| s.to_string()),
            destroy_count: 0,
        });

        self.calls.lock().push(RenderCall::CreateTexture {
            texture_id: id,
            width: desc.size.width,
            height: desc.size.height,
            mip_level_count: desc.mip_level_count,
            format: desc.format,
            label: desc.label.map(|s| s.to_string()),
        });

        GpuTexture::mock(
            id,
            desc.size.width,
            desc.size.height,
            desc.mip_level_count,
            desc.format,
        )
    }

    fn destroy_texture(&self, texture: &GpuTexture) {
        if let Some(texture_id) = texture.mock_id() {
            if let Some(mock) = self.textures.lock().get_mut(texture_id) {
                mock.destroy_count += 1;
            }
            self.calls.lock().push(RenderCall::DestroyTexture { texture_id });
        }
    }
}
