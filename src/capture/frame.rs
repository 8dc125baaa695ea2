use std::fmt;

use serde::{Deserialize, Serialize};

use crate::capture::pool::PooledBuffer;

/// Pixel formats the pipeline understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Nv21,
    Nv12,
    Yuyv,
}

impl PixelFormat {
    /// Bits per pixel of the packed image
    pub fn bits_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Nv21 | PixelFormat::Nv12 => 12,
            PixelFormat::Yuyv => 16,
        }
    }
}

/// Preview capture always runs in NV21: planar Y followed by interleaved VU
pub const PREVIEW_FORMAT: PixelFormat = PixelFormat::Nv21;

/// Which way a camera points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    Back,
    Front,
}

/// Pixel dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.width as f32 / self.height as f32
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Inclusive frame-rate range in fps x 1000, the units cameras advertise
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FpsRange {
    pub min: i32,
    pub max: i32,
}

impl FpsRange {
    pub fn new(min: i32, max: i32) -> Self {
        Self { min, max }
    }
}

/// Rotation of the surface the preview will be shown on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayRotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl DisplayRotation {
    pub fn degrees(self) -> u32 {
        match self {
            DisplayRotation::Deg0 => 0,
            DisplayRotation::Deg90 => 90,
            DisplayRotation::Deg180 => 180,
            DisplayRotation::Deg270 => 270,
        }
    }
}

/// Hardware-side parameters resolved against the device's advertised
/// capabilities. Computed once per start and immutable until the next one.
#[derive(Debug, Clone, PartialEq)]
pub struct PreviewConfiguration {
    pub preview: Size,
    /// Same-aspect-ratio picture size, when the hardware offers one
    pub picture: Option<Size>,
    pub fps: FpsRange,
    /// Clockwise rotation applied to captured pixels, degrees
    pub rotation_degrees: u32,
}

impl PreviewConfiguration {
    /// Quarter turns (0-3) tagged onto every frame of this session
    pub fn quarter_turns(&self) -> u8 {
        (self.rotation_degrees / 90) as u8
    }
}

/// One captured image on its way to the frame consumer.
///
/// Built by the capture worker immediately before delivery; the backing
/// pooled buffer goes back to the hardware once the consumer call returns,
/// so the pixel data is only borrowed for the duration of that call.
pub struct Frame {
    buffer: PooledBuffer,
    width: u32,
    height: u32,
    format: PixelFormat,
    id: u64,
    timestamp_ms: u64,
    rotation: u8,
}

impl Frame {
    pub(crate) fn new(
        buffer: PooledBuffer,
        width: u32,
        height: u32,
        format: PixelFormat,
        id: u64,
        timestamp_ms: u64,
        rotation: u8,
    ) -> Self {
        Self {
            buffer,
            width,
            height,
            format,
            id,
            timestamp_ms,
            rotation,
        }
    }

    /// Raw pixel data. May carry a byte of padding beyond the image.
    pub fn data(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Monotonically increasing id, starting at 1. Ids of frames that were
    /// overwritten before delivery are skipped, never reused.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Capture time as milliseconds since the pipeline started
    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    /// Clockwise quarter turns (0-3) to display the image upright
    pub fn rotation(&self) -> u8 {
        self.rotation
    }

    pub(crate) fn into_buffer(self) -> PooledBuffer {
        self.buffer
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("id", &self.id)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("timestamp_ms", &self.timestamp_ms)
            .field("rotation", &self.rotation)
            .finish_non_exhaustive()
    }
}
