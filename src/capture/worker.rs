//! Dedicated consumer thread draining the pending-frame slot.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread::{Builder, JoinHandle};
use std::time::Instant;

use tracing::{debug, error, warn};

use crate::capture::frame::{Frame, PixelFormat};
use crate::capture::slot::FrameMailbox;
use crate::device::{CameraDevice, FrameConsumer};

/// Geometry and tagging applied to every frame of one preview session
#[derive(Debug, Clone, Copy)]
pub(crate) struct FrameShape {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub quarter_turns: u8,
}

/// The consumer loop: take the latest pending frame, hand it to the frame
/// consumer outside the pipeline lock, then return the buffer to the
/// device no matter how delivery went.
pub(crate) struct CaptureWorker {
    mailbox: Arc<FrameMailbox>,
    device: Weak<dyn CameraDevice>,
    consumer: Arc<dyn FrameConsumer>,
    shape: FrameShape,
}

impl CaptureWorker {
    pub fn new(
        mailbox: Arc<FrameMailbox>,
        device: Weak<dyn CameraDevice>,
        consumer: Arc<dyn FrameConsumer>,
        shape: FrameShape,
    ) -> Self {
        Self {
            mailbox,
            device,
            consumer,
            shape,
        }
    }

    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        Builder::new()
            .name("capture-worker".into())
            .spawn(move || self.run())
    }

    fn run(self) {
        debug!("capture worker running");
        while let Some(pending) = self.mailbox.next_frame() {
            let frame = Frame::new(
                pending.buffer,
                self.shape.width,
                self.shape.height,
                self.shape.format,
                pending.id,
                pending.timestamp_ms,
                self.shape.quarter_turns,
            );
            self.deliver(&frame);
            let buffer = frame.into_buffer();
            if let Some(device) = self.device.upgrade() {
                device.enqueue_buffer(buffer);
            }
        }
        debug!("capture worker exiting");
    }

    /// Delivery runs outside the lock so the hardware can submit the next
    /// frame while the consumer is still busy with this one. Consumer
    /// errors and panics are contained; the buffer is recycled either way.
    fn deliver(&self, frame: &Frame) {
        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.consumer.receive_frame(frame)));
        metrics::histogram!("frame_delivery_us").record(started.elapsed().as_micros() as f64);
        self.mailbox.mark_delivered();
        metrics::counter!("frames_delivered").increment(1);
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(frame_id = frame.id(), error = %e, "frame consumer failed");
                self.mailbox.mark_consumer_failure();
            }
            Err(_) => {
                error!(frame_id = frame.id(), "frame consumer panicked");
                self.mailbox.mark_consumer_failure();
            }
        }
    }
}
