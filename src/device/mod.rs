//! The seam between the pipeline and camera hardware.

pub mod synthetic;

use std::error::Error;
use std::sync::{Arc, Weak};

use crate::capture::frame::{Facing, FpsRange, Frame, PreviewConfiguration, Size};
use crate::capture::pool::PooledBuffer;
use crate::capture::slot::{FrameMailbox, SubmitOutcome};
use crate::error::CameraError;

/// Discrete option sets a camera advertises before configuration
#[derive(Debug, Clone, Default)]
pub struct DeviceCapabilities {
    pub preview_sizes: Vec<Size>,
    pub picture_sizes: Vec<Size>,
    /// In fps x 1000, matching the hardware's units
    pub fps_ranges: Vec<FpsRange>,
    /// Clockwise angle the sensor is mounted at, degrees
    pub sensor_orientation: u32,
}

/// Current and maximum zoom level of a device that supports zooming
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoomState {
    pub current: i32,
    pub max: i32,
}

/// Opens cameras by facing.
pub trait CameraBackend: Send + Sync {
    /// Open the first camera pointing in the requested direction.
    fn open(&self, facing: Facing) -> Result<Arc<dyn CameraDevice>, CameraError>;
}

/// An opened camera.
///
/// Lifecycle methods are called with the source's lifecycle lock held;
/// `enqueue_buffer` is also called from callback and worker contexts, so
/// implementations must treat it as a non-blocking queue push and must not
/// call back into the sink from it.
pub trait CameraDevice: Send + Sync {
    /// Option sets used by capability negotiation
    fn capabilities(&self) -> DeviceCapabilities;

    /// Apply a resolved configuration before the preview starts.
    fn configure(&self, config: &PreviewConfiguration) -> Result<(), CameraError>;

    /// Begin producing frames, pushing each filled buffer into `sink`.
    fn start_preview(&self, sink: FrameSink) -> Result<(), CameraError>;

    /// Hand a buffer (back) to the device's input queue. Buffers enqueued
    /// on a closed device are dropped.
    fn enqueue_buffer(&self, buffer: PooledBuffer);

    /// Stop producing frames and drop the sink.
    fn stop_preview(&self);

    /// Release the underlying device.
    fn close(&self);

    /// Zoom position, or `None` when the device cannot zoom
    fn zoom(&self) -> Option<ZoomState> {
        None
    }

    /// Apply an absolute zoom level within [`ZoomState`] bounds.
    fn set_zoom(&self, _level: i32) {}
}

/// Consumes delivered frames. The detection side's face toward the
/// pipeline.
///
/// `receive_frame` runs on the dedicated capture worker, never under the
/// pipeline lock, so it may take arbitrarily long without stalling
/// capture. Errors are logged and the stream moves on to the next frame.
pub trait FrameConsumer: Send + Sync {
    fn receive_frame(&self, frame: &Frame) -> Result<(), Box<dyn Error + Send + Sync>>;

    /// Invoked once when the owning source is released.
    fn release(&self) {}
}

/// Producer half of the frame hand-off, held by a previewing device.
///
/// The device reference is weak: a hardware callback may still be in
/// flight while the source is tearing the device down, and such late
/// submissions must not keep the hardware alive.
#[derive(Clone)]
pub struct FrameSink {
    mailbox: Arc<FrameMailbox>,
    device: Weak<dyn CameraDevice>,
}

impl FrameSink {
    pub(crate) fn new(mailbox: Arc<FrameMailbox>, device: Weak<dyn CameraDevice>) -> Self {
        Self { mailbox, device }
    }

    /// Record a freshly filled buffer as the pending frame. Never blocks
    /// on the consumer; an undelivered predecessor is recycled on the
    /// spot.
    pub fn submit(&self, buffer: PooledBuffer) -> SubmitOutcome {
        let device = self.device.upgrade();
        self.mailbox.submit(buffer, device.as_deref())
    }
}
