//! Live capture loop.
//!
//! One loop iteration reads a frame, runs the detector when a model is
//! loaded, replaces the live detection snapshot, encodes the annotated frame
//! as JPEG and publishes it on the frame channel. The loop runs on a blocking
//! worker and exits when its stop flag or the shared cancel signal is set.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use leafscan_models::{CameraState, Detection, DetectionSnapshot};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::analysis::detect_and_annotate;
use crate::annotate::Annotator;
use crate::capture::{CaptureSettings, DeviceOpener};
use crate::channel::FrameChannel;
use crate::encoding::{encode_jpeg, DEFAULT_JPEG_QUALITY};
use crate::metrics;
use crate::model::ModelHandle;

/// Most recent live detections, replaced wholesale once per frame.
pub struct LiveDetections {
    current: RwLock<Arc<DetectionSnapshot>>,
}

impl Default for LiveDetections {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveDetections {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(DetectionSnapshot::empty())),
        }
    }

    pub fn replace(&self, detections: Vec<Detection>) {
        let snapshot = Arc::new(DetectionSnapshot::new(detections));
        match self.current.write() {
            Ok(mut guard) => *guard = snapshot,
            Err(poisoned) => *poisoned.into_inner() = snapshot,
        }
    }

    pub fn clear(&self) {
        self.replace(Vec::new());
    }

    /// A consistent view of the last completed frame.
    pub fn snapshot(&self) -> Arc<DetectionSnapshot> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }
}

/// Capture loop tuning.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub capture: CaptureSettings,
    pub confidence_threshold: f32,
    pub jpeg_quality: u8,
    /// Pause after each published frame
    pub frame_interval: Duration,
    /// Pause after a failed read
    pub read_retry_delay: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            capture: CaptureSettings::default(),
            confidence_threshold: 0.5,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            frame_interval: Duration::from_millis(30),
            read_retry_delay: Duration::from_millis(10),
        }
    }
}

/// State owned jointly by one capture loop and the controller that spawned it.
#[derive(Debug)]
pub struct LoopShared {
    state: AtomicU8,
    stop_requested: AtomicBool,
}

impl Default for LoopShared {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopShared {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(CameraState::Starting.to_u8()),
            stop_requested: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> CameraState {
        CameraState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Ask the loop to exit at the top of its next iteration.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        let _ = self.state.compare_exchange(
            CameraState::Running.to_u8(),
            CameraState::Stopping.to_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        let _ = self.state.compare_exchange(
            CameraState::Starting.to_u8(),
            CameraState::Stopping.to_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    fn mark_running(&self) -> bool {
        self.state
            .compare_exchange(
                CameraState::Starting.to_u8(),
                CameraState::Running.to_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    fn mark_stopped(&self) {
        self.state.store(CameraState::Stopped.to_u8(), Ordering::Release);
    }
}

/// Everything one capture loop needs.
pub struct CaptureLoop {
    pub config: LoopConfig,
    pub opener: Arc<dyn DeviceOpener>,
    pub model: Arc<ModelHandle>,
    pub annotator: Arc<Annotator>,
    pub channel: Arc<FrameChannel>,
    pub detections: Arc<LiveDetections>,
    pub shared: Arc<LoopShared>,
    pub cancel: watch::Receiver<bool>,
}

impl CaptureLoop {
    fn should_stop(&self) -> bool {
        self.shared.stop_requested() || *self.cancel.borrow()
    }

    /// Run until stopped. Blocking; call from a blocking worker.
    ///
    /// Returns without entering `running` when the device cannot be opened.
    pub fn run(self) {
        let shared = Arc::clone(&self.shared);
        scopeguard::defer! {
            shared.mark_stopped();
            metrics::set_camera_running(false);
        }

        let device = match self.opener.open(&self.config.capture) {
            Ok(device) => device,
            Err(e) => {
                error!(device = %self.config.capture.device, error = %e, "Failed to open camera");
                return;
            }
        };
        let mut device = scopeguard::guard(device, |mut device| {
            device.release();
            info!("Camera released");
        });

        if self.should_stop() || !self.shared.mark_running() {
            debug!("Stop requested before capture began");
            return;
        }
        metrics::set_camera_running(true);
        info!(device = %self.config.capture.device, "Capture loop running");

        let mut frames: u64 = 0;
        while !self.should_stop() {
            let frame = match device.read_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    metrics::record_read_failure();
                    std::thread::sleep(self.config.read_retry_delay);
                    continue;
                }
                Err(e) => {
                    debug!(error = %e, "Frame read failed");
                    metrics::record_read_failure();
                    std::thread::sleep(self.config.read_retry_delay);
                    continue;
                }
            };
            metrics::record_frame_captured();

            let (annotated, detections) = match self.model.current() {
                Some(detector) => {
                    let started = Instant::now();
                    let result = detect_and_annotate(
                        detector.as_ref(),
                        &self.annotator,
                        &frame,
                        self.config.confidence_threshold,
                    );
                    metrics::record_inference(
                        "live",
                        started.elapsed().as_secs_f64(),
                        result.is_ok(),
                    );
                    match result {
                        Ok(out) => out,
                        Err(e) => {
                            warn!(error = %e, "Live detection failed; passing frame through");
                            (frame, Vec::new())
                        }
                    }
                }
                None => (frame, Vec::new()),
            };

            // Inference can outlast a stop request; drop the frame if so.
            if self.should_stop() {
                break;
            }
            metrics::set_live_detections(detections.len());
            self.detections.replace(detections);

            match encode_jpeg(&annotated, self.config.jpeg_quality) {
                Ok(jpeg) if !self.should_stop() => {
                    let dropped = self.channel.publish(jpeg);
                    metrics::record_frame_published(dropped);
                }
                Ok(_) => break,
                Err(e) => warn!(error = %e, "Failed to encode frame"),
            }

            frames += 1;
            std::thread::sleep(self.config.frame_interval);
        }

        // A stop that gave up waiting has already drained; clear anything
        // published since then.
        let drained = self.channel.drain();
        self.detections.clear();
        metrics::set_live_detections(0);
        info!(frames, drained, "Capture loop exiting");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureDevice;
    use crate::detector::{Detector, RawDetection};
    use crate::error::{VisionError, VisionResult};
    use image::{Rgb, RgbImage};
    use leafscan_models::BoundingBox;
    use std::sync::atomic::AtomicUsize;

    struct BlackDevice {
        released: Arc<AtomicUsize>,
        fail_every: Option<usize>,
        reads: usize,
    }

    impl CaptureDevice for BlackDevice {
        fn read_frame(&mut self) -> VisionResult<Option<RgbImage>> {
            self.reads += 1;
            if let Some(n) = self.fail_every {
                if self.reads % n == 0 {
                    return Err(VisionError::frame_read("glitch"));
                }
            }
            Ok(Some(RgbImage::from_pixel(64, 48, Rgb([0, 0, 0]))))
        }

        fn release(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FakeOpener {
        released: Arc<AtomicUsize>,
        fail: bool,
        fail_every: Option<usize>,
    }

    impl DeviceOpener for FakeOpener {
        fn open(&self, _settings: &CaptureSettings) -> VisionResult<Box<dyn CaptureDevice>> {
            if self.fail {
                return Err(VisionError::device_unavailable("no camera"));
            }
            Ok(Box::new(BlackDevice {
                released: Arc::clone(&self.released),
                fail_every: self.fail_every,
                reads: 0,
            }))
        }
    }

    struct FixedDetector(Vec<RawDetection>);

    impl Detector for FixedDetector {
        fn detect(&self, _image: &RgbImage, _t: f32) -> VisionResult<Vec<RawDetection>> {
            Ok(self.0.clone())
        }

        fn class_name(&self, _class_id: usize) -> String {
            "Tomato_Early_blight".to_string()
        }
    }

    struct FailingDetector;

    impl Detector for FailingDetector {
        fn detect(&self, _image: &RgbImage, _t: f32) -> VisionResult<Vec<RawDetection>> {
            Err(VisionError::inference("boom"))
        }

        fn class_name(&self, class_id: usize) -> String {
            class_id.to_string()
        }
    }

    struct Fixture {
        channel: Arc<FrameChannel>,
        detections: Arc<LiveDetections>,
        shared: Arc<LoopShared>,
        released: Arc<AtomicUsize>,
        cancel: watch::Sender<bool>,
    }

    fn spawn_loop(
        opener_fail: bool,
        fail_every: Option<usize>,
        model: Arc<ModelHandle>,
    ) -> (Fixture, std::thread::JoinHandle<()>) {
        let released = Arc::new(AtomicUsize::new(0));
        let (cancel, cancel_rx) = watch::channel(false);
        let fixture = Fixture {
            channel: Arc::new(FrameChannel::new()),
            detections: Arc::new(LiveDetections::new()),
            shared: Arc::new(LoopShared::new()),
            released: Arc::clone(&released),
            cancel,
        };
        let capture = CaptureLoop {
            config: LoopConfig {
                frame_interval: Duration::from_millis(5),
                read_retry_delay: Duration::from_millis(1),
                ..LoopConfig::default()
            },
            opener: Arc::new(FakeOpener {
                released,
                fail: opener_fail,
                fail_every,
            }),
            model,
            annotator: Arc::new(Annotator::default()),
            channel: Arc::clone(&fixture.channel),
            detections: Arc::clone(&fixture.detections),
            shared: Arc::clone(&fixture.shared),
            cancel: cancel_rx,
        };
        let join = std::thread::spawn(move || capture.run());
        (fixture, join)
    }

    fn wait_for(mut pred: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !pred() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    fn unloaded_model() -> Arc<ModelHandle> {
        Arc::new(ModelHandle::new(Arc::new(crate::model::StaticModelSource::new(
            Arc::new(FailingDetector),
        ))))
    }

    #[test]
    fn test_open_failure_never_runs() {
        let (fx, join) = spawn_loop(true, None, unloaded_model());
        join.join().unwrap();
        assert_eq!(fx.shared.state(), CameraState::Stopped);
        assert!(fx.channel.is_empty());
        assert_eq!(fx.released.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_streams_raw_frames_without_model() {
        let (fx, join) = spawn_loop(false, None, unloaded_model());
        wait_for(|| fx.channel.len() == 2);
        assert_eq!(fx.shared.state(), CameraState::Running);
        assert_eq!(fx.detections.snapshot().count, 0);

        let frame = fx.channel.try_consume().unwrap();
        assert_eq!(&frame[..2], &[0xFF, 0xD8]);

        fx.shared.request_stop();
        join.join().unwrap();
        assert_eq!(fx.shared.state(), CameraState::Stopped);
        assert_eq!(fx.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_detections_replace_snapshot() {
        let raw = vec![RawDetection {
            class_id: 0,
            confidence: 0.87,
            bbox: BoundingBox::new(4, 4, 30, 30),
        }];
        let model = Arc::new(ModelHandle::loaded(Arc::new(FixedDetector(raw))));
        let (fx, join) = spawn_loop(false, None, model);

        wait_for(|| fx.detections.snapshot().count == 1);
        let snapshot = fx.detections.snapshot();
        assert_eq!(snapshot.detections[0].label, "Tomato_Early_blight");
        assert_eq!(snapshot.detections.len(), snapshot.count);

        fx.cancel.send_replace(true);
        join.join().unwrap();
        assert_eq!(fx.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failing_detector_passes_frames_through() {
        let model = Arc::new(ModelHandle::loaded(Arc::new(FailingDetector)));
        let (fx, join) = spawn_loop(false, Some(3), model);

        wait_for(|| fx.channel.len() == 2);
        assert_eq!(fx.detections.snapshot().count, 0);

        fx.shared.request_stop();
        join.join().unwrap();
        assert_eq!(fx.shared.state(), CameraState::Stopped);
    }

    struct SlowDetector;

    impl Detector for SlowDetector {
        fn detect(&self, _image: &RgbImage, _t: f32) -> VisionResult<Vec<RawDetection>> {
            std::thread::sleep(Duration::from_millis(200));
            Ok(vec![RawDetection {
                class_id: 0,
                confidence: 0.9,
                bbox: BoundingBox::new(4, 4, 30, 30),
            }])
        }

        fn class_name(&self, _class_id: usize) -> String {
            "Tomato_Leaf_Mold".to_string()
        }
    }

    #[test]
    fn test_stop_during_inference_publishes_nothing() {
        let model = Arc::new(ModelHandle::loaded(Arc::new(SlowDetector)));
        let (fx, join) = spawn_loop(false, None, model);

        wait_for(|| fx.channel.len() == 1);
        assert!(fx.channel.try_consume().is_some());
        fx.shared.request_stop();
        join.join().unwrap();

        assert!(fx.channel.is_empty());
        assert_eq!(fx.detections.snapshot().count, 0);
        assert_eq!(fx.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_live_detections_default_empty() {
        let store = LiveDetections::new();
        assert_eq!(store.snapshot().count, 0);
        store.replace(vec![Detection::new("X", 0.6, BoundingBox::new(0, 0, 1, 1))]);
        assert_eq!(store.snapshot().count, 1);
        store.clear();
        assert!(store.snapshot().detections.is_empty());
    }
}
