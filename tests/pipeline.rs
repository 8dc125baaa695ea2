//! End-to-end pipeline behavior through a hand-driven camera backend.
//!
//! The test plays the hardware: it pulls buffers from the device's input
//! queue and pushes them through the sink the way a driver callback
//! would, so every race in the hand-off is driven deterministically.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use obscura::device::{
    CameraBackend, CameraDevice, DeviceCapabilities, FrameConsumer, FrameSink, ZoomState,
};
use obscura::{
    CameraError, CameraSource, Facing, FpsRange, Frame, Lifecycle, PooledBuffer,
    PreviewConfiguration, Size, SubmitOutcome,
};

fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(2));
    }
}

fn basic_caps() -> DeviceCapabilities {
    DeviceCapabilities {
        preview_sizes: vec![Size::new(320, 240), Size::new(640, 480)],
        picture_sizes: vec![Size::new(640, 480)],
        fps_ranges: vec![FpsRange::new(15_000, 30_000)],
        sensor_orientation: 0,
    }
}

#[derive(Default)]
struct DeviceState {
    queue: Vec<PooledBuffer>,
    sink: Option<FrameSink>,
    zoom_level: i32,
    closed: bool,
    close_calls: u32,
    stop_preview_calls: u32,
}

struct ManualDevice {
    caps: DeviceCapabilities,
    max_zoom: Option<i32>,
    fail_configure: bool,
    state: Mutex<DeviceState>,
}

impl ManualDevice {
    fn queued(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    fn take_buffer(&self) -> PooledBuffer {
        self.state.lock().unwrap().queue.remove(0)
    }

    fn sink(&self) -> FrameSink {
        self.state
            .lock()
            .unwrap()
            .sink
            .clone()
            .expect("preview not started")
    }

    /// One hardware callback: fill nothing, just hand the oldest queued
    /// buffer to the pipeline.
    fn submit_next(&self) -> SubmitOutcome {
        let buffer = self.take_buffer();
        self.sink().submit(buffer)
    }

    fn zoom_level(&self) -> i32 {
        self.state.lock().unwrap().zoom_level
    }

    fn close_calls(&self) -> u32 {
        self.state.lock().unwrap().close_calls
    }

    fn stop_preview_calls(&self) -> u32 {
        self.state.lock().unwrap().stop_preview_calls
    }
}

impl CameraDevice for ManualDevice {
    fn capabilities(&self) -> DeviceCapabilities {
        self.caps.clone()
    }

    fn configure(&self, _config: &PreviewConfiguration) -> Result<(), CameraError> {
        if self.fail_configure {
            Err(CameraError::Backend("configure rejected".into()))
        } else {
            Ok(())
        }
    }

    fn start_preview(&self, sink: FrameSink) -> Result<(), CameraError> {
        self.state.lock().unwrap().sink = Some(sink);
        Ok(())
    }

    fn enqueue_buffer(&self, buffer: PooledBuffer) {
        let mut state = self.state.lock().unwrap();
        if !state.closed {
            state.queue.push(buffer);
        }
    }

    fn stop_preview(&self) {
        let mut state = self.state.lock().unwrap();
        state.stop_preview_calls += 1;
        state.sink = None;
    }

    fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.close_calls += 1;
        state.closed = true;
    }

    fn zoom(&self) -> Option<ZoomState> {
        self.max_zoom.map(|max| ZoomState {
            current: self.zoom_level(),
            max,
        })
    }

    fn set_zoom(&self, level: i32) {
        self.state.lock().unwrap().zoom_level = level;
    }
}

struct ManualBackend {
    caps: DeviceCapabilities,
    facing: Facing,
    max_zoom: Option<i32>,
    fail_configure: bool,
    device: Mutex<Option<Arc<ManualDevice>>>,
}

impl ManualBackend {
    fn with_defaults() -> Self {
        Self::with_caps(basic_caps())
    }

    fn with_caps(caps: DeviceCapabilities) -> Self {
        Self {
            caps,
            facing: Facing::Back,
            max_zoom: Some(10),
            fail_configure: false,
            device: Mutex::new(None),
        }
    }

    /// The most recently opened device
    fn device(&self) -> Arc<ManualDevice> {
        self.device
            .lock()
            .unwrap()
            .clone()
            .expect("device not opened")
    }
}

impl CameraBackend for ManualBackend {
    fn open(&self, facing: Facing) -> Result<Arc<dyn CameraDevice>, CameraError> {
        if facing != self.facing {
            return Err(CameraError::NoMatchingDevice(facing));
        }
        let device = Arc::new(ManualDevice {
            caps: self.caps.clone(),
            max_zoom: self.max_zoom,
            fail_configure: self.fail_configure,
            state: Mutex::new(DeviceState::default()),
        });
        *self.device.lock().unwrap() = Some(Arc::clone(&device));
        Ok(device)
    }
}

#[derive(Default)]
struct RecordingConsumer {
    delivered: Mutex<Vec<u64>>,
    timestamps: Mutex<Vec<u64>>,
    entered: AtomicU64,
    gate: Option<Mutex<Receiver<()>>>,
    fail_on: Option<u64>,
    panic_on: Option<u64>,
    released: AtomicBool,
}

impl RecordingConsumer {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A consumer that blocks inside each delivery until the test sends
    /// one permit.
    fn gated() -> (Arc<Self>, Sender<()>) {
        let (tx, rx) = mpsc::channel();
        let consumer = Arc::new(Self {
            gate: Some(Mutex::new(rx)),
            ..Default::default()
        });
        (consumer, tx)
    }

    fn failing_on(id: u64) -> Arc<Self> {
        Arc::new(Self {
            fail_on: Some(id),
            ..Default::default()
        })
    }

    fn panicking_on(id: u64) -> Arc<Self> {
        Arc::new(Self {
            panic_on: Some(id),
            ..Default::default()
        })
    }

    fn delivered(&self) -> Vec<u64> {
        self.delivered.lock().unwrap().clone()
    }

    fn entered(&self) -> u64 {
        self.entered.load(Ordering::SeqCst)
    }
}

impl FrameConsumer for RecordingConsumer {
    fn receive_frame(
        &self,
        frame: &Frame,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            let _ = gate.lock().unwrap().recv();
        }
        self.delivered.lock().unwrap().push(frame.id());
        self.timestamps.lock().unwrap().push(frame.timestamp_ms());
        if self.panic_on == Some(frame.id()) {
            panic!("synthetic consumer panic");
        }
        if self.fail_on == Some(frame.id()) {
            return Err("synthetic consumer failure".into());
        }
        Ok(())
    }

    fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

fn build_source(
    backend: &Arc<ManualBackend>,
    consumer: &Arc<RecordingConsumer>,
) -> CameraSource {
    CameraSource::builder(
        Arc::clone(backend) as Arc<dyn CameraBackend>,
        Arc::clone(consumer) as Arc<dyn FrameConsumer>,
    )
        .requested_preview_size(640, 480)
        .requested_fps(30.0)
        .build()
        .unwrap()
}

#[test]
fn delivers_frames_in_submission_order() {
    let backend = Arc::new(ManualBackend::with_defaults());
    let consumer = RecordingConsumer::new();
    let source = build_source(&backend, &consumer);

    source.start().unwrap();
    let device = backend.device();
    assert_eq!(device.queued(), 4, "pool should prime the hardware queue");

    for n in 1..=3u64 {
        assert_eq!(device.submit_next(), SubmitOutcome::Accepted);
        wait_until("delivery", || consumer.delivered().len() == n as usize);
    }
    assert_eq!(consumer.delivered(), vec![1, 2, 3]);

    let timestamps = consumer.timestamps.lock().unwrap().clone();
    assert!(
        timestamps.windows(2).all(|w| w[0] <= w[1]),
        "timestamps must not go backwards: {timestamps:?}"
    );

    source.stop();
    let stats = source.stats();
    assert_eq!(stats.submitted, 3);
    assert_eq!(stats.delivered, 3);
    assert_eq!(stats.replaced, 0);
}

#[test]
fn overwrite_recycles_undelivered_frame_and_keeps_accounting() {
    let backend = Arc::new(ManualBackend::with_defaults());
    let (consumer, permits) = RecordingConsumer::gated();
    let source = build_source(&backend, &consumer);

    source.start().unwrap();
    let device = backend.device();

    // Worker takes frame 1 and blocks inside the consumer
    assert_eq!(device.submit_next(), SubmitOutcome::Accepted);
    wait_until("worker entering delivery", || consumer.entered() == 1);

    // Frame 2 parks in the empty slot, frame 3 overwrites it
    assert_eq!(device.submit_next(), SubmitOutcome::Accepted);
    assert_eq!(device.submit_next(), SubmitOutcome::ReplacedPending);

    // 4 buffers total: 1 in delivery, 1 pending, 2 back in the queue
    // (including the one recycled from the overwrite)
    assert_eq!(device.queued(), 2);

    permits.send(()).unwrap();
    permits.send(()).unwrap();
    wait_until("both deliveries", || consumer.delivered().len() == 2);
    assert_eq!(consumer.delivered(), vec![1, 3]);
    wait_until("buffers recycled", || device.queued() == 4);

    source.stop();
    let stats = source.stats();
    assert_eq!(stats.submitted, 3);
    assert_eq!(stats.delivered, 2);
    assert_eq!(stats.replaced, 1);
}

#[test]
fn late_buffers_are_unrecognized_and_consume_no_ids() {
    let backend = Arc::new(ManualBackend::with_defaults());
    let consumer = RecordingConsumer::new();
    let source = build_source(&backend, &consumer);

    source.start().unwrap();
    let first_device = backend.device();
    first_device.submit_next();
    wait_until("first delivery", || consumer.delivered() == vec![1]);
    wait_until("buffer recycled", || first_device.queued() == 4);

    let stale_a = first_device.take_buffer();
    let stale_b = first_device.take_buffer();
    let old_sink = first_device.sink();
    source.stop();

    // After stop the registry is gone entirely
    assert_eq!(old_sink.submit(stale_a), SubmitOutcome::Unrecognized);

    source.start().unwrap();
    let second_device = backend.device();

    // A buffer from the previous session is not recognized by the new pool
    assert_eq!(
        second_device.sink().submit(stale_b),
        SubmitOutcome::Unrecognized
    );

    // Ids continue across restarts and skipped nothing for the strays
    second_device.submit_next();
    wait_until("post-restart delivery", || {
        consumer.delivered() == vec![1, 2]
    });
    assert_eq!(source.stats().unrecognized, 2);

    source.stop();
}

#[test]
fn stop_waits_for_in_flight_delivery() {
    let backend = Arc::new(ManualBackend::with_defaults());
    let (consumer, permits) = RecordingConsumer::gated();
    let source = Arc::new(build_source(&backend, &consumer));

    source.start().unwrap();
    let device = backend.device();

    // Worker takes frame 1 and blocks inside the consumer
    device.submit_next();
    wait_until("worker entering delivery", || consumer.entered() == 1);

    let stopper = {
        let source = Arc::clone(&source);
        thread::spawn(move || source.stop())
    };

    // Stop must not return while a delivery is still in the consumer
    thread::sleep(Duration::from_millis(150));
    assert!(
        !stopper.is_finished(),
        "stop returned with a delivery still in flight"
    );

    permits.send(()).unwrap();
    stopper.join().unwrap();
    assert_eq!(consumer.delivered(), vec![1]);
    assert_eq!(device.close_calls(), 1);
}

#[test]
fn stop_is_idempotent_and_restartable() {
    let backend = Arc::new(ManualBackend::with_defaults());
    let consumer = RecordingConsumer::new();
    let source = build_source(&backend, &consumer);

    // Stopping a source that never started is a no-op
    source.stop();
    assert_eq!(source.lifecycle(), Lifecycle::Configured);

    source.start().unwrap();
    let device = backend.device();
    source.stop();
    assert_eq!(device.stop_preview_calls(), 1);
    assert_eq!(device.close_calls(), 1);

    source.stop();
    assert_eq!(device.close_calls(), 1, "second stop must not touch hardware");
    assert_eq!(source.lifecycle(), Lifecycle::Stopped);

    source.start().unwrap();
    assert_eq!(source.lifecycle(), Lifecycle::Running);
    source.stop();
}

#[test]
fn release_is_terminal_and_idempotent() {
    let backend = Arc::new(ManualBackend::with_defaults());
    let consumer = RecordingConsumer::new();
    let source = build_source(&backend, &consumer);

    source.start().unwrap();
    source.release();
    assert!(consumer.released.load(Ordering::SeqCst));
    assert_eq!(source.lifecycle(), Lifecycle::Released);
    assert_eq!(backend.device().close_calls(), 1);

    // Second release changes nothing
    source.release();
    assert_eq!(backend.device().close_calls(), 1);

    assert!(matches!(
        source.start(),
        Err(CameraError::InvalidState { op: "start", .. })
    ));
}

#[test]
fn start_failures_leave_no_hardware_claim() {
    // No camera with the requested facing
    let backend = Arc::new(ManualBackend {
        facing: Facing::Front,
        ..ManualBackend::with_defaults()
    });
    let consumer = RecordingConsumer::new();
    let source = build_source(&backend, &consumer);
    assert!(matches!(
        source.start(),
        Err(CameraError::NoMatchingDevice(Facing::Back))
    ));
    assert_eq!(source.lifecycle(), Lifecycle::Configured);

    // No advertised preview sizes
    let backend = Arc::new(ManualBackend::with_caps(DeviceCapabilities {
        preview_sizes: vec![],
        ..basic_caps()
    }));
    let source = build_source(&backend, &consumer);
    assert!(matches!(
        source.start(),
        Err(CameraError::NoViableResolution)
    ));
    assert_eq!(backend.device().close_calls(), 1);
    assert_eq!(source.lifecycle(), Lifecycle::Configured);

    // No advertised frame-rate ranges
    let backend = Arc::new(ManualBackend::with_caps(DeviceCapabilities {
        fps_ranges: vec![],
        ..basic_caps()
    }));
    let source = build_source(&backend, &consumer);
    assert!(matches!(
        source.start(),
        Err(CameraError::NoViableFrameRate)
    ));
    assert_eq!(backend.device().close_calls(), 1);

    // Backend rejects configuration
    let backend = Arc::new(ManualBackend {
        fail_configure: true,
        ..ManualBackend::with_defaults()
    });
    let source = build_source(&backend, &consumer);
    assert!(matches!(source.start(), Err(CameraError::Backend(_))));
    assert_eq!(backend.device().close_calls(), 1);
    assert_eq!(source.lifecycle(), Lifecycle::Configured);
}

#[test]
fn zoom_steps_up_scales_down_and_clamps() {
    let backend = Arc::new(ManualBackend::with_defaults());
    let consumer = RecordingConsumer::new();
    let source = build_source(&backend, &consumer);

    // Ignored before start
    source.do_zoom(2.0);

    source.start().unwrap();
    let device = backend.device();
    device.set_zoom(5);

    // max 10: a factor above 1 steps by scale tenths of the range
    source.do_zoom(3.0);
    assert_eq!(device.zoom_level(), 8);

    source.do_zoom(9.0);
    assert_eq!(device.zoom_level(), 10, "zoom must clamp at the maximum");

    source.do_zoom(0.5);
    assert_eq!(device.zoom_level(), 5);

    source.stop();
}

#[test]
fn zoom_is_ignored_without_device_support() {
    let backend = Arc::new(ManualBackend {
        max_zoom: None,
        ..ManualBackend::with_defaults()
    });
    let consumer = RecordingConsumer::new();
    let source = build_source(&backend, &consumer);

    source.start().unwrap();
    source.do_zoom(4.0);
    assert_eq!(backend.device().zoom_level(), 0);
    source.stop();
}

#[test]
fn consumer_error_does_not_stall_the_pipeline() {
    let backend = Arc::new(ManualBackend::with_defaults());
    let consumer = RecordingConsumer::failing_on(1);
    let source = build_source(&backend, &consumer);

    source.start().unwrap();
    let device = backend.device();

    device.submit_next();
    wait_until("failed delivery", || consumer.delivered().len() == 1);
    wait_until("buffer recycled after failure", || device.queued() == 4);

    device.submit_next();
    wait_until("next delivery", || consumer.delivered().len() == 2);
    assert_eq!(consumer.delivered(), vec![1, 2]);

    source.stop();
    let stats = source.stats();
    assert_eq!(stats.consumer_failures, 1);
    assert_eq!(stats.delivered, 2);
}

#[test]
fn consumer_panic_does_not_stall_the_pipeline() {
    let backend = Arc::new(ManualBackend::with_defaults());
    let consumer = RecordingConsumer::panicking_on(1);
    let source = build_source(&backend, &consumer);

    source.start().unwrap();
    let device = backend.device();

    device.submit_next();
    wait_until("panicked delivery", || consumer.delivered().len() == 1);
    wait_until("buffer recycled after panic", || device.queued() == 4);

    device.submit_next();
    wait_until("next delivery", || consumer.delivered().len() == 2);

    source.stop();
    assert_eq!(source.stats().consumer_failures, 1);
}

#[test]
fn builder_rejects_invalid_requests() {
    let backend = Arc::new(ManualBackend::with_defaults());
    let consumer = RecordingConsumer::new();

    let err = CameraSource::builder(Arc::clone(&backend) as Arc<dyn CameraBackend>, consumer)
        .requested_fps(0.0)
        .build()
        .unwrap_err();
    assert!(matches!(err, CameraError::InvalidRequest(_)));

    let consumer = RecordingConsumer::new();
    let err = CameraSource::builder(backend, consumer)
        .requested_preview_size(0, 480)
        .build()
        .unwrap_err();
    assert!(matches!(err, CameraError::InvalidRequest(_)));
}
