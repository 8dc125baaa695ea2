//! Camera source lifecycle: open, negotiate, run, stop, release.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use tracing::{debug, info, warn};

use crate::capture::frame::{DisplayRotation, Facing, PreviewConfiguration, Size, PREVIEW_FORMAT};
use crate::capture::pool::{FramePool, FRAME_POOL_SIZE};
use crate::capture::slot::{FrameMailbox, StatsSnapshot};
use crate::capture::worker::{CaptureWorker, FrameShape};
use crate::device::{CameraBackend, CameraDevice, FrameConsumer, FrameSink};
use crate::error::CameraError;
use crate::select;
use crate::CaptureSettings;

/// Where a source is in its life
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Built, not yet started. A failed start does not leave this state.
    Configured,
    /// Hardware open, worker delivering frames
    Running,
    /// Hardware released and worker joined; starting again is allowed
    Stopped,
    /// Terminal: consumer released, no further starts
    Released,
}

struct SourceInner {
    lifecycle: Lifecycle,
    device: Option<Arc<dyn CameraDevice>>,
    worker: Option<JoinHandle<()>>,
    preview: Option<PreviewConfiguration>,
}

/// Owns the camera, the buffer pool, and the capture worker, feeding
/// preview frames to a [`FrameConsumer`] at the hardware's pace.
///
/// All lifecycle transitions are serialized by one lock, so concurrent
/// `start`/`stop`/`release` calls cannot interleave half-done states.
pub struct CameraSource {
    backend: Arc<dyn CameraBackend>,
    consumer: Arc<dyn FrameConsumer>,
    settings: CaptureSettings,
    mailbox: Arc<FrameMailbox>,
    inner: Mutex<SourceInner>,
}

impl CameraSource {
    /// Start building a source around a backend and a frame consumer.
    pub fn builder(
        backend: Arc<dyn CameraBackend>,
        consumer: Arc<dyn FrameConsumer>,
    ) -> CameraSourceBuilder {
        CameraSourceBuilder::new(backend, consumer)
    }

    fn lock_inner(&self) -> MutexGuard<'_, SourceInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the camera and start streaming preview frames to the
    /// consumer. A no-op when already running.
    ///
    /// On failure the device is closed and the mailbox disarmed before
    /// returning, so the source holds no hardware claim and may be
    /// started again.
    pub fn start(&self) -> Result<(), CameraError> {
        let mut inner = self.lock_inner();
        match inner.lifecycle {
            Lifecycle::Running => return Ok(()),
            Lifecycle::Released => {
                return Err(CameraError::InvalidState {
                    op: "start",
                    state: Lifecycle::Released,
                })
            }
            Lifecycle::Configured | Lifecycle::Stopped => {}
        }

        let device = self.backend.open(self.settings.facing)?;
        let config = match select::resolve(&device.capabilities(), &self.settings) {
            Ok(config) => config,
            Err(e) => {
                device.close();
                return Err(e);
            }
        };
        info!(
            preview = %config.preview,
            picture = ?config.picture,
            fps_min = config.fps.min,
            fps_max = config.fps.max,
            rotation = config.rotation_degrees,
            "camera configuration resolved"
        );
        if let Err(e) = device.configure(&config) {
            device.close();
            return Err(e);
        }

        let (pool, buffers) = FramePool::for_preview(&config);
        self.mailbox.arm(pool);

        let sink = FrameSink::new(Arc::clone(&self.mailbox), Arc::downgrade(&device));
        if let Err(e) = device.start_preview(sink) {
            self.disarm_and_close(&device);
            return Err(e);
        }
        // Prime the hardware input queue with the whole pool
        for buffer in buffers {
            device.enqueue_buffer(buffer);
        }

        let shape = FrameShape {
            width: config.preview.width,
            height: config.preview.height,
            format: PREVIEW_FORMAT,
            quarter_turns: config.quarter_turns(),
        };
        let worker = CaptureWorker::new(
            Arc::clone(&self.mailbox),
            Arc::downgrade(&device),
            Arc::clone(&self.consumer),
            shape,
        );
        let handle = match worker.spawn() {
            Ok(handle) => handle,
            Err(e) => {
                device.stop_preview();
                self.disarm_and_close(&device);
                return Err(CameraError::WorkerSpawn(e));
            }
        };

        info!(
            facing = ?self.settings.facing,
            buffers = FRAME_POOL_SIZE,
            "camera source started"
        );
        inner.device = Some(device);
        inner.worker = Some(handle);
        inner.preview = Some(config);
        inner.lifecycle = Lifecycle::Running;
        Ok(())
    }

    fn disarm_and_close(&self, device: &Arc<dyn CameraDevice>) {
        self.mailbox.deactivate();
        self.mailbox.clear_pool();
        device.close();
    }

    /// Stop the preview and release the hardware, keeping the source
    /// restartable. Safe to call in any state, any number of times.
    pub fn stop(&self) {
        let mut inner = self.lock_inner();
        self.stop_locked(&mut inner);
    }

    /// Worker join strictly precedes hardware teardown, so a frame
    /// mid-delivery always finishes before the device goes away. The
    /// registry is cleared last, stranding any buffer still outside.
    fn stop_locked(&self, inner: &mut SourceInner) {
        if inner.lifecycle != Lifecycle::Running {
            return;
        }
        self.mailbox.deactivate();
        if let Some(worker) = inner.worker.take() {
            if worker.join().is_err() {
                warn!("capture worker terminated by panic");
            }
        }
        if let Some(device) = inner.device.take() {
            device.stop_preview();
            device.close();
        }
        self.mailbox.clear_pool();
        inner.lifecycle = Lifecycle::Stopped;
        info!("camera source stopped");
    }

    /// Stop the preview and release both the camera and the underlying
    /// frame consumer. Terminal; also idempotent.
    pub fn release(&self) {
        let mut inner = self.lock_inner();
        if inner.lifecycle == Lifecycle::Released {
            return;
        }
        self.stop_locked(&mut inner);
        inner.lifecycle = Lifecycle::Released;
        self.consumer.release();
        info!("camera source released");
    }

    /// Nudge the zoom by `scale`: factors above 1 step toward the
    /// maximum in tenths of the range, factors below 1 scale the current
    /// level down. The result is clamped to what the device supports.
    pub fn do_zoom(&self, scale: f32) {
        let inner = self.lock_inner();
        if inner.lifecycle != Lifecycle::Running {
            debug!("zoom ignored: source is not running");
            return;
        }
        let Some(device) = inner.device.as_ref() else {
            return;
        };
        let Some(zoom) = device.zoom() else {
            warn!("zoom is not supported on this device");
            return;
        };
        let target = if scale > 1.0 {
            zoom.current as f32 + scale * (zoom.max / 10) as f32
        } else {
            zoom.current as f32 * scale
        };
        let level = (target.round() as i64).clamp(0, zoom.max as i64) as i32;
        debug!(from = zoom.current, to = level, max = zoom.max, "applying zoom");
        device.set_zoom(level);
    }

    /// Preview size in use, once a start has succeeded. Survives a stop,
    /// is recomputed by the next start.
    pub fn preview_size(&self) -> Option<Size> {
        self.lock_inner().preview.as_ref().map(|c| c.preview)
    }

    /// Which way the requested camera faces
    pub fn facing(&self) -> Facing {
        self.settings.facing
    }

    /// Current lifecycle state
    pub fn lifecycle(&self) -> Lifecycle {
        self.lock_inner().lifecycle
    }

    /// Cumulative pipeline counters
    pub fn stats(&self) -> StatsSnapshot {
        self.mailbox.stats()
    }
}

impl fmt::Debug for CameraSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraSource")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Builder used to configure and create an associated [`CameraSource`].
pub struct CameraSourceBuilder {
    backend: Arc<dyn CameraBackend>,
    consumer: Arc<dyn FrameConsumer>,
    settings: CaptureSettings,
}

impl CameraSourceBuilder {
    pub fn new(backend: Arc<dyn CameraBackend>, consumer: Arc<dyn FrameConsumer>) -> Self {
        Self {
            backend,
            consumer,
            settings: CaptureSettings::default(),
        }
    }

    /// Replace all requested parameters at once.
    pub fn settings(mut self, settings: CaptureSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Size the negotiated preview should stay close to
    pub fn requested_preview_size(mut self, width: u32, height: u32) -> Self {
        self.settings.width = width;
        self.settings.height = height;
        self
    }

    /// Frame rate the negotiated range should stay close to
    pub fn requested_fps(mut self, fps: f32) -> Self {
        self.settings.fps = fps;
        self
    }

    pub fn facing(mut self, facing: Facing) -> Self {
        self.settings.facing = facing;
        self
    }

    pub fn display_rotation(mut self, rotation: DisplayRotation) -> Self {
        self.settings.display_rotation = rotation;
        self
    }

    /// Validate the request and build the source. No hardware is touched
    /// until the first `start`.
    pub fn build(self) -> Result<CameraSource, CameraError> {
        self.settings.validate()?;
        Ok(CameraSource {
            backend: self.backend,
            consumer: self.consumer,
            settings: self.settings,
            mailbox: Arc::new(FrameMailbox::new()),
            inner: Mutex::new(SourceInner {
                lifecycle: Lifecycle::Configured,
                device: None,
                worker: None,
                preview: None,
            }),
        })
    }
}
