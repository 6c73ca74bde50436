//! Per-frame uniform arena.
//!
//! Uniform blocks of every recorded dispatch and draw are packed into one
//! ring buffer that cycles through [`RING_BUFFER_FRAMES`] regions, so the
//! host never overwrites data a frame still in flight is reading.
//!
//! ```ignore
//! let mut ring = RingBuffer::new(&ctx, 64 * 1024, wgpu::BufferUsages::UNIFORM);
//!
//! // Each dispatch
//! if let Some(allocation) = ring.allocate(256, 256) {
//!     allocation.write(ctx.queue(), &data);
//!     // Bind allocation.as_binding()
//! }
//!
//! // At frame end
//! ring.next_frame();
//! ```

use std::num::NonZeroU64;
use std::sync::Arc;

use thicket_core::profiling::profile_function;

use crate::GraphicsContext;

/// Number of frames to buffer (triple buffering).
pub const RING_BUFFER_FRAMES: u64 = 3;

/// Allocation bookkeeping of a ring buffer, independent of the GPU buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingCursor {
    frame_size: u64,
    offset: u64,
    frame: u64,
}

impl RingCursor {
    pub fn new(frame_size: u64) -> Self {
        Self {
            frame_size,
            offset: 0,
            frame: 0,
        }
    }

    /// Reserve `size` bytes at `alignment`, returning the offset.
    ///
    /// Returns `None` when the current frame's region is full.
    pub fn allocate(&mut self, size: u64, alignment: u64) -> Option<u64> {
        let alignment = alignment.max(1);
        let aligned_offset = self.offset.next_multiple_of(alignment);

        let frame_start = (self.frame % RING_BUFFER_FRAMES) * self.frame_size;
        let frame_end = frame_start + self.frame_size;

        if aligned_offset + size > frame_end {
            return None;
        }

        self.offset = aligned_offset + size;
        Some(aligned_offset)
    }

    pub fn next_frame(&mut self) {
        self.frame += 1;
        self.offset = (self.frame % RING_BUFFER_FRAMES) * self.frame_size;
    }

    pub fn reset(&mut self) {
        self.frame = 0;
        self.offset = 0;
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Remaining space in the current frame's region.
    pub fn remaining(&self) -> u64 {
        let frame_end = ((self.frame % RING_BUFFER_FRAMES) + 1) * self.frame_size;
        frame_end.saturating_sub(self.offset)
    }
}

/// A region allocated from a ring buffer.
pub struct RingBufferAllocation {
    buffer: Arc<wgpu::Buffer>,
    offset: u64,
    size: u64,
}

impl RingBufferAllocation {
    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Write data to this allocation. Excess bytes are dropped.
    pub fn write(&self, queue: &wgpu::Queue, data: &[u8]) {
        let len = (data.len() as u64).min(self.size) as usize;
        queue.write_buffer(&self.buffer, self.offset, &data[..len]);
    }

    /// Binding resource covering exactly this allocation.
    pub fn as_binding(&self) -> wgpu::BindingResource<'_> {
        wgpu::BindingResource::Buffer(wgpu::BufferBinding {
            buffer: &self.buffer,
            offset: self.offset,
            size: NonZeroU64::new(self.size),
        })
    }
}

/// A ring buffer for streaming per-frame uniform data.
pub struct RingBuffer {
    buffer: Arc<wgpu::Buffer>,
    cursor: RingCursor,
}

impl RingBuffer {
    /// Create a ring buffer holding `frame_size` bytes per buffered frame.
    pub fn new(context: &GraphicsContext, frame_size: u64, usage: wgpu::BufferUsages) -> Self {
        let buffer = context.device().create_buffer(&wgpu::BufferDescriptor {
            label: Some("Uniform Ring Buffer"),
            size: frame_size * RING_BUFFER_FRAMES,
            usage: usage | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Self {
            buffer: Arc::new(buffer),
            cursor: RingCursor::new(frame_size),
        }
    }

    /// Allocate a region from the current frame.
    ///
    /// Returns `None` if the frame's region is full.
    pub fn allocate(&mut self, size: u64, alignment: u64) -> Option<RingBufferAllocation> {
        profile_function!();
        let offset = self.cursor.allocate(size, alignment)?;
        Some(RingBufferAllocation {
            buffer: self.buffer.clone(),
            offset,
            size,
        })
    }

    /// Advance to the next frame's region.
    pub fn next_frame(&mut self) {
        self.cursor.next_frame();
    }

    pub fn reset(&mut self) {
        self.cursor.reset();
    }

    pub fn frame(&self) -> u64 {
        self.cursor.frame()
    }

    pub fn remaining(&self) -> u64 {
        self.cursor.remaining()
    }

    pub fn size(&self) -> u64 {
        self.buffer.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_cursor_allocation() {
        let mut cursor = RingCursor::new(1024);

        assert_eq!(cursor.allocate(128, 256), Some(0));
        // Second allocation is aligned past the first
        assert_eq!(cursor.allocate(128, 256), Some(256));
        assert_eq!(cursor.remaining(), 1024 - 384);
    }

    #[test]
    fn test_ring_cursor_full_frame() {
        let mut cursor = RingCursor::new(512);

        assert!(cursor.allocate(512, 256).is_some());
        assert_eq!(cursor.allocate(1, 256), None);
    }

    #[test]
    fn test_ring_cursor_frame_advance_wraps() {
        let mut cursor = RingCursor::new(1024);
        cursor.allocate(512, 256);

        cursor.next_frame();
        assert_eq!(cursor.frame(), 1);
        assert_eq!(cursor.allocate(512, 256), Some(1024));

        cursor.next_frame();
        cursor.next_frame();
        // Back to the first region
        assert_eq!(cursor.offset(), 0);
    }

    #[test]
    #[ignore] // Requires GPU
    fn test_ring_buffer_allocation() {
        let ctx = GraphicsContext::new_owned_sync().expect("Failed to create graphics context");
        let mut ring = RingBuffer::new(&ctx, 1024, wgpu::BufferUsages::UNIFORM);

        let alloc1 = ring.allocate(256, 256).expect("first allocation");
        assert_eq!(alloc1.offset(), 0);

        let alloc2 = ring.allocate(256, 256).expect("second allocation");
        assert_eq!(alloc2.offset(), 256);
        assert_eq!(ring.size(), 1024 * RING_BUFFER_FRAMES);
    }
}
