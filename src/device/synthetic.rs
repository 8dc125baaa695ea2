//! In-process camera backend generating NV21 test frames.
//!
//! Stands in for real capture hardware: it owns an input queue of pooled
//! buffers, fills one with a moving gradient at the configured cadence on
//! its own thread, and fires the frame sink the way a driver callback
//! would. Useful for demos and for exercising the pipeline on machines
//! without a camera.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::capture::frame::{Facing, FpsRange, PreviewConfiguration, Size};
use crate::capture::pool::PooledBuffer;
use crate::device::{CameraBackend, CameraDevice, DeviceCapabilities, FrameSink, ZoomState};
use crate::error::CameraError;

/// Description of one synthetic camera
#[derive(Debug, Clone)]
pub struct SyntheticSpec {
    pub facing: Facing,
    pub capabilities: DeviceCapabilities,
    /// Cadence of generated frames
    pub frame_interval: Duration,
    /// Maximum zoom level, if the camera should advertise zoom at all
    pub max_zoom: Option<i32>,
}

impl SyntheticSpec {
    /// A webcam-shaped device: 4:3 and 16:9 modes with matching picture
    /// sizes, 15-30 fps, landscape sensor, zoomable.
    pub fn webcam(facing: Facing) -> Self {
        Self {
            facing,
            capabilities: DeviceCapabilities {
                preview_sizes: vec![
                    Size::new(320, 240),
                    Size::new(640, 480),
                    Size::new(1280, 720),
                    Size::new(1920, 1080),
                ],
                picture_sizes: vec![
                    Size::new(640, 480),
                    Size::new(1920, 1080),
                    Size::new(2048, 1536),
                ],
                fps_ranges: vec![
                    FpsRange::new(15_000, 15_000),
                    FpsRange::new(15_000, 30_000),
                ],
                sensor_orientation: 0,
            },
            frame_interval: Duration::from_millis(33),
            max_zoom: Some(80),
        }
    }
}

/// Backend over a fixed set of synthetic cameras
pub struct SyntheticBackend {
    specs: Vec<SyntheticSpec>,
}

impl SyntheticBackend {
    pub fn new(specs: Vec<SyntheticSpec>) -> Self {
        Self { specs }
    }

    /// A single webcam-shaped camera with the given facing
    pub fn webcam(facing: Facing) -> Self {
        Self::new(vec![SyntheticSpec::webcam(facing)])
    }
}

impl CameraBackend for SyntheticBackend {
    fn open(&self, facing: Facing) -> Result<Arc<dyn CameraDevice>, CameraError> {
        let spec = self
            .specs
            .iter()
            .find(|spec| spec.facing == facing)
            .ok_or(CameraError::NoMatchingDevice(facing))?;
        info!(?facing, "opening synthetic camera");
        Ok(SyntheticCamera::open(spec.clone()))
    }
}

struct GeneratorState {
    thread: Option<JoinHandle<()>>,
    config: Option<PreviewConfiguration>,
    previewing: bool,
}

/// One opened synthetic camera
pub struct SyntheticCamera {
    spec: SyntheticSpec,
    /// The hardware input queue; buffers wait here until the generator
    /// needs one to fill
    queue_tx: flume::Sender<PooledBuffer>,
    queue_rx: flume::Receiver<PooledBuffer>,
    stop_flag: Arc<AtomicBool>,
    zoom_level: AtomicI32,
    closed: AtomicBool,
    state: Mutex<GeneratorState>,
}

impl SyntheticCamera {
    fn open(spec: SyntheticSpec) -> Arc<Self> {
        let (queue_tx, queue_rx) = flume::unbounded();
        Arc::new(Self {
            spec,
            queue_tx,
            queue_rx,
            stop_flag: Arc::new(AtomicBool::new(false)),
            zoom_level: AtomicI32::new(0),
            closed: AtomicBool::new(false),
            state: Mutex::new(GeneratorState {
                thread: None,
                config: None,
                previewing: false,
            }),
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, GeneratorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CameraDevice for SyntheticCamera {
    fn capabilities(&self) -> DeviceCapabilities {
        self.spec.capabilities.clone()
    }

    fn configure(&self, config: &PreviewConfiguration) -> Result<(), CameraError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CameraError::Backend("camera is closed".into()));
        }
        debug!(preview = %config.preview, "synthetic camera configured");
        self.lock_state().config = Some(config.clone());
        Ok(())
    }

    fn start_preview(&self, sink: FrameSink) -> Result<(), CameraError> {
        let mut state = self.lock_state();
        if state.previewing {
            return Err(CameraError::Backend("preview already started".into()));
        }
        let config = state
            .config
            .clone()
            .ok_or_else(|| CameraError::Backend("start_preview before configure".into()))?;
        self.stop_flag.store(false, Ordering::Release);
        let generator = Generator {
            sink,
            queue: self.queue_rx.clone(),
            stop: Arc::clone(&self.stop_flag),
            interval: self.spec.frame_interval,
            size: config.preview,
        };
        let thread = thread::Builder::new()
            .name("synthetic-camera".into())
            .spawn(move || generator.run())
            .map_err(|e| CameraError::Backend(format!("failed to spawn frame generator: {e}")))?;
        state.thread = Some(thread);
        state.previewing = true;
        Ok(())
    }

    fn enqueue_buffer(&self, buffer: PooledBuffer) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        // Unbounded, so this can never block a callback
        let _ = self.queue_tx.send(buffer);
    }

    fn stop_preview(&self) {
        let thread = {
            let mut state = self.lock_state();
            if !state.previewing {
                return;
            }
            state.previewing = false;
            self.stop_flag.store(true, Ordering::Release);
            state.thread.take()
        };
        if let Some(thread) = thread {
            if thread.join().is_err() {
                warn!("synthetic frame generator panicked");
            }
        }
        debug!("synthetic preview stopped");
    }

    fn close(&self) {
        self.stop_preview();
        self.closed.store(true, Ordering::Release);
        // Flush buffers parked in the input queue
        while self.queue_rx.try_recv().is_ok() {}
        debug!("synthetic camera closed");
    }

    fn zoom(&self) -> Option<ZoomState> {
        self.spec.max_zoom.map(|max| ZoomState {
            current: self.zoom_level.load(Ordering::Relaxed),
            max,
        })
    }

    fn set_zoom(&self, level: i32) {
        self.zoom_level.store(level, Ordering::Relaxed);
    }
}

/// The hardware side: paces frame production and fires the sink
struct Generator {
    sink: FrameSink,
    queue: flume::Receiver<PooledBuffer>,
    stop: Arc<AtomicBool>,
    interval: Duration,
    size: Size,
}

impl Generator {
    fn run(self) {
        debug!("synthetic frame generator running");
        let mut tick: u64 = 0;
        while !self.stop.load(Ordering::Acquire) {
            thread::sleep(self.interval);
            if self.stop.load(Ordering::Acquire) {
                break;
            }
            match self.queue.try_recv() {
                Ok(mut buffer) => {
                    fill_nv21(buffer.as_mut_slice(), self.size, tick);
                    tick = tick.wrapping_add(1);
                    self.sink.submit(buffer);
                }
                // Real sensors drop frames when no buffer is free
                Err(_) => trace!("no free preview buffer, hardware frame dropped"),
            }
        }
        debug!("synthetic frame generator exiting");
    }
}

/// Moving luma gradient with neutral chroma; enough structure for a
/// consumer to measure without pretending to be a scene.
fn fill_nv21(data: &mut [u8], size: Size, tick: u64) {
    let width = size.width as usize;
    let height = size.height as usize;
    let luma_len = width * height;
    let shift = (tick % 256) as usize;
    for row in 0..height {
        for col in 0..width {
            data[row * width + col] = ((col + row + shift) % 256) as u8;
        }
    }
    for byte in &mut data[luma_len..luma_len + luma_len / 2] {
        *byte = 128;
    }
}
