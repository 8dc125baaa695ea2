use std::sync::atomic::{AtomicU64, Ordering};

use bytes::BytesMut;
use tracing::debug;

use crate::capture::frame::{PreviewConfiguration, PREVIEW_FORMAT};

/// Buffers in flight per source: one being filled by the hardware, one
/// pending in the slot, one in delivery, one spare.
pub const FRAME_POOL_SIZE: usize = 4;

/// Allocation generations are process-wide so buffers from an old session
/// can never collide with a freshly allocated pool.
static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Identity of a pooled buffer: arena index plus allocation generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferTag {
    index: u8,
    generation: u64,
}

impl BufferTag {
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

/// An owned frame buffer cycling hardware -> pending slot -> delivery ->
/// hardware. Identity travels with the buffer, so recognizing one on its
/// way back needs no reverse lookup over the bytes.
pub struct PooledBuffer {
    tag: BufferTag,
    data: BytesMut,
}

impl PooledBuffer {
    pub fn tag(&self) -> BufferTag {
        self.tag
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data[..]
    }
}

/// Registry of the buffers belonging to the current preview session.
///
/// The arena itself is the set of [`PooledBuffer`]s handed out at
/// allocation time; the registry only tracks which tags are still
/// recognized. Clearing it strands any buffer a lagging hardware callback
/// still holds, which is exactly what teardown wants.
pub struct FramePool {
    generation: u64,
    buffer_len: usize,
    registered: [bool; FRAME_POOL_SIZE],
}

impl FramePool {
    /// Allocate the preview buffers for `config` together with the registry
    /// that recognizes them. Each buffer holds one NV21 image rounded up to
    /// whole bytes, plus one spare byte some drivers insist on.
    pub fn for_preview(config: &PreviewConfiguration) -> (Self, Vec<PooledBuffer>) {
        let buffer_len = preview_buffer_len(config.preview.width, config.preview.height);
        let generation = NEXT_GENERATION.fetch_add(1, Ordering::Relaxed);
        let buffers = (0..FRAME_POOL_SIZE)
            .map(|index| PooledBuffer {
                tag: BufferTag {
                    index: index as u8,
                    generation,
                },
                data: BytesMut::zeroed(buffer_len),
            })
            .collect();
        debug!(
            count = FRAME_POOL_SIZE,
            bytes = buffer_len,
            generation,
            "allocated preview buffers"
        );
        let pool = Self {
            generation,
            buffer_len,
            registered: [true; FRAME_POOL_SIZE],
        };
        (pool, buffers)
    }

    /// Whether `buffer` belongs to this pool's current registration set
    pub fn recognizes(&self, buffer: &PooledBuffer) -> bool {
        buffer.tag.generation == self.generation
            && self
                .registered
                .get(buffer.tag.index())
                .copied()
                .unwrap_or(false)
    }

    /// Drop every registration. Buffers still circulating become
    /// unrecognized and are skipped when they arrive.
    pub fn clear(&mut self) {
        self.registered = [false; FRAME_POOL_SIZE];
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer_len
    }
}

/// Bytes needed for one preview image: bits-per-pixel rounded up to whole
/// bytes, plus one.
pub(crate) fn preview_buffer_len(width: u32, height: u32) -> usize {
    let bits = width as u64 * height as u64 * PREVIEW_FORMAT.bits_per_pixel() as u64;
    bits.div_ceil(8) as usize + 1
}
