//! Camera lifecycle control.
//!
//! Start and stop requests are serialized by an async mutex so that at most
//! one capture loop exists at a time. Stopping signals the loop, waits a
//! bounded time for it to release the device, then drains the frame channel
//! so no consumer sees a frame captured before the stop. A loop that misses
//! the deadline stays registered as `stopping` until it exits, and no new
//! loop is started in the meantime.

use std::sync::Arc;
use std::time::Duration;

use leafscan_models::{CameraState, PipelineStatus};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::annotate::Annotator;
use crate::capture::DeviceOpener;
use crate::channel::FrameChannel;
use crate::model::ModelHandle;
use crate::pipeline::{CaptureLoop, LiveDetections, LoopConfig, LoopShared};

/// Result of a start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
    /// The previous loop still holds the device.
    StillStopping,
}

impl StartOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            StartOutcome::Started => "Camera started successfully",
            StartOutcome::AlreadyRunning => "Camera is already running",
            StartOutcome::StillStopping => "Camera is still stopping. Please try again.",
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, StartOutcome::StillStopping)
    }
}

/// Result of a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NotRunning,
}

impl StopOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            StopOutcome::Stopped => "Camera stopped",
            StopOutcome::NotRunning => "Camera is not running",
        }
    }
}

struct ActiveLoop {
    shared: Arc<LoopShared>,
    join: JoinHandle<()>,
}

/// Owns the capture loop and the state shared with HTTP handlers.
pub struct CameraController {
    config: LoopConfig,
    opener: Arc<dyn DeviceOpener>,
    model: Arc<ModelHandle>,
    annotator: Arc<Annotator>,
    channel: Arc<FrameChannel>,
    detections: Arc<LiveDetections>,
    active: Mutex<Option<ActiveLoop>>,
    cancel: watch::Sender<bool>,
    stop_timeout: Duration,
}

impl CameraController {
    pub fn new(
        config: LoopConfig,
        opener: Arc<dyn DeviceOpener>,
        model: Arc<ModelHandle>,
        annotator: Arc<Annotator>,
    ) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            config,
            opener,
            model,
            annotator,
            channel: Arc::new(FrameChannel::new()),
            detections: Arc::new(LiveDetections::new()),
            active: Mutex::new(None),
            cancel,
            stop_timeout: Duration::from_secs(2),
        }
    }

    /// How long `stop` waits for the loop to exit before giving up on it.
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn channel(&self) -> &Arc<FrameChannel> {
        &self.channel
    }

    pub fn detections(&self) -> &Arc<LiveDetections> {
        &self.detections
    }

    pub fn model(&self) -> &Arc<ModelHandle> {
        &self.model
    }

    /// Subscribe to the cancel signal; it flips to `true` on stop.
    pub fn subscribe_cancel(&self) -> watch::Receiver<bool> {
        self.cancel.subscribe()
    }

    /// Start the capture loop unless one is already starting or running.
    ///
    /// Also requests a background model load. Returns before the device is
    /// open; a device failure surfaces later as the camera returning to
    /// `stopped`.
    pub async fn start(&self) -> StartOutcome {
        let mut active = self.active.lock().await;

        if let Some(current) = active.as_mut() {
            if current.shared.state().is_active() {
                return StartOutcome::AlreadyRunning;
            }
            // A loop that outlived its stop still owns the device.
            if !current.join.is_finished()
                && tokio::time::timeout(self.stop_timeout, &mut current.join)
                    .await
                    .is_err()
            {
                warn!("Previous capture loop has not exited; refusing to start");
                return StartOutcome::StillStopping;
            }
        }
        // The previous loop has exited; reap it.
        active.take();

        self.cancel.send_replace(false);
        if self.model.request_load() {
            info!("Model load scheduled");
        }

        let shared = Arc::new(LoopShared::new());
        let capture = CaptureLoop {
            config: self.config.clone(),
            opener: Arc::clone(&self.opener),
            model: Arc::clone(&self.model),
            annotator: Arc::clone(&self.annotator),
            channel: Arc::clone(&self.channel),
            detections: Arc::clone(&self.detections),
            shared: Arc::clone(&shared),
            cancel: self.cancel.subscribe(),
        };
        let join = tokio::task::spawn_blocking(move || capture.run());

        info!(device = %self.config.capture.device, "Camera start requested");
        *active = Some(ActiveLoop { shared, join });
        StartOutcome::Started
    }

    /// Stop the capture loop and drain buffered frames.
    pub async fn stop(&self) -> StopOutcome {
        let mut active = self.active.lock().await;

        let Some(mut current) = active.take() else {
            self.channel.drain();
            return StopOutcome::NotRunning;
        };

        let was_active = current.shared.state().is_active();
        current.shared.request_stop();
        self.cancel.send_replace(true);

        match tokio::time::timeout(self.stop_timeout, &mut current.join).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Capture loop panicked"),
            Err(_) => {
                warn!(
                    timeout_ms = self.stop_timeout.as_millis() as u64,
                    "Capture loop did not exit in time"
                );
                // Keep the handle so a later start waits for this loop.
                *active = Some(current);
            }
        }

        let drained = self.channel.drain();
        self.detections.clear();
        info!(drained, "Camera stopped");

        if was_active {
            StopOutcome::Stopped
        } else {
            StopOutcome::NotRunning
        }
    }

    pub async fn camera_state(&self) -> CameraState {
        match self.active.lock().await.as_ref() {
            Some(current) => current.shared.state(),
            None => CameraState::Stopped,
        }
    }

    pub async fn status(&self) -> PipelineStatus {
        PipelineStatus {
            camera: self.camera_state().await,
            device: self.config.capture.device.to_string(),
            model: self.model.state(),
            model_error: self.model.last_error(),
            buffered_frames: self.channel.len(),
            live_detections: self.detections.snapshot().count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureDevice, CaptureSettings};
    use crate::detector::{Detector, RawDetection};
    use crate::error::{VisionError, VisionResult};
    use crate::model::ModelSource;
    use image::{Rgb, RgbImage};
    use leafscan_models::ModelState;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct BlackDevice;

    impl CaptureDevice for BlackDevice {
        fn read_frame(&mut self) -> VisionResult<Option<RgbImage>> {
            Ok(Some(RgbImage::from_pixel(32, 24, Rgb([0, 0, 0]))))
        }

        fn release(&mut self) {}
    }

    #[derive(Default)]
    struct CountingOpener {
        opens: AtomicUsize,
        fail: bool,
    }

    impl DeviceOpener for CountingOpener {
        fn open(&self, _settings: &CaptureSettings) -> VisionResult<Box<dyn CaptureDevice>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(VisionError::device_unavailable("no camera"));
            }
            Ok(Box::new(BlackDevice))
        }
    }

    struct EmptyDetector;

    impl Detector for EmptyDetector {
        fn detect(&self, _image: &RgbImage, _t: f32) -> VisionResult<Vec<RawDetection>> {
            Ok(Vec::new())
        }

        fn class_name(&self, class_id: usize) -> String {
            class_id.to_string()
        }
    }

    #[derive(Default)]
    struct CountingSource {
        loads: AtomicUsize,
    }

    impl ModelSource for CountingSource {
        fn load(&self) -> VisionResult<Arc<dyn Detector>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(EmptyDetector))
        }

        fn describe(&self) -> String {
            "counting".to_string()
        }
    }

    fn controller(opener: Arc<CountingOpener>, source: Arc<CountingSource>) -> CameraController {
        let config = LoopConfig {
            frame_interval: Duration::from_millis(5),
            ..LoopConfig::default()
        };
        CameraController::new(
            config,
            opener,
            Arc::new(ModelHandle::new(source)),
            Arc::new(Annotator::default()),
        )
    }

    async fn wait_for_state(camera: &CameraController, state: CameraState) {
        for _ in 0..500 {
            if camera.camera_state().await == state {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("camera never reached {}", state);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_start_twice_opens_once() {
        let opener = Arc::new(CountingOpener::default());
        let camera = controller(Arc::clone(&opener), Arc::default());

        assert_eq!(camera.start().await, StartOutcome::Started);
        assert_eq!(camera.start().await, StartOutcome::AlreadyRunning);
        wait_for_state(&camera, CameraState::Running).await;
        assert_eq!(camera.start().await, StartOutcome::AlreadyRunning);
        assert_eq!(opener.opens.load(Ordering::SeqCst), 1);

        assert_eq!(camera.stop().await, StopOutcome::Stopped);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stop_when_idle() {
        let camera = controller(Arc::default(), Arc::default());
        assert_eq!(camera.stop().await, StopOutcome::NotRunning);
        assert_eq!(camera.camera_state().await, CameraState::Stopped);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_no_frames_after_stop() {
        let camera = controller(Arc::default(), Arc::default());
        camera.start().await;
        let first = camera.channel().consume(Duration::from_secs(5)).await;
        assert!(first.is_some());

        camera.stop().await;
        assert!(camera.channel().is_empty());
        assert!(camera
            .channel()
            .consume(Duration::from_millis(50))
            .await
            .is_none());
        assert_eq!(camera.camera_state().await, CameraState::Stopped);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_device_failure_returns_to_stopped() {
        let opener = Arc::new(CountingOpener {
            opens: AtomicUsize::new(0),
            fail: true,
        });
        let camera = controller(Arc::clone(&opener), Arc::default());

        assert_eq!(camera.start().await, StartOutcome::Started);
        wait_for_state(&camera, CameraState::Stopped).await;

        // The dead loop is reaped and a fresh attempt is made.
        assert_eq!(camera.start().await, StartOutcome::Started);
        wait_for_state(&camera, CameraState::Stopped).await;
        assert_eq!(opener.opens.load(Ordering::SeqCst), 2);
        assert_eq!(camera.stop().await, StopOutcome::NotRunning);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_start_loads_model_once() {
        let source = Arc::new(CountingSource::default());
        let camera = controller(Arc::default(), Arc::clone(&source));

        camera.start().await;
        assert_eq!(
            camera.model().wait_settled(Duration::from_secs(5)).await,
            ModelState::Loaded
        );
        camera.stop().await;
        camera.start().await;
        camera.stop().await;

        assert_eq!(source.loads.load(Ordering::SeqCst), 1);
        let status = camera.status().await;
        assert_eq!(status.model, ModelState::Loaded);
        assert_eq!(status.camera, CameraState::Stopped);
        assert_eq!(status.buffered_frames, 0);
    }

    /// Tracks how many devices are open at once.
    #[derive(Default)]
    struct ExclusiveOpener {
        open: Arc<AtomicUsize>,
        max_open: Arc<AtomicUsize>,
    }

    struct TrackedDevice {
        open: Arc<AtomicUsize>,
    }

    impl CaptureDevice for TrackedDevice {
        fn read_frame(&mut self) -> VisionResult<Option<RgbImage>> {
            Ok(Some(RgbImage::from_pixel(32, 24, Rgb([0, 0, 0]))))
        }

        fn release(&mut self) {
            self.open.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl DeviceOpener for ExclusiveOpener {
        fn open(&self, _settings: &CaptureSettings) -> VisionResult<Box<dyn CaptureDevice>> {
            let now = self.open.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_open.fetch_max(now, Ordering::SeqCst);
            Ok(Box::new(TrackedDevice {
                open: Arc::clone(&self.open),
            }))
        }
    }

    struct SlowDetector(Duration);

    impl Detector for SlowDetector {
        fn detect(&self, _image: &RgbImage, _t: f32) -> VisionResult<Vec<RawDetection>> {
            std::thread::sleep(self.0);
            Ok(vec![RawDetection {
                class_id: 0,
                confidence: 0.9,
                bbox: leafscan_models::BoundingBox::new(2, 2, 20, 20),
            }])
        }

        fn class_name(&self, _class_id: usize) -> String {
            "Tomato_Leaf_Mold".to_string()
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_slow_loop_outliving_stop_blocks_restart() {
        let opener = Arc::new(ExclusiveOpener::default());
        let camera = CameraController::new(
            LoopConfig {
                frame_interval: Duration::from_millis(5),
                ..LoopConfig::default()
            },
            Arc::clone(&opener) as Arc<dyn DeviceOpener>,
            Arc::new(ModelHandle::loaded(Arc::new(SlowDetector(
                Duration::from_millis(400),
            )))),
            Arc::new(Annotator::default()),
        )
        .with_stop_timeout(Duration::from_millis(50));

        assert_eq!(camera.start().await, StartOutcome::Started);
        // The first frame lands after one inference; the next one is in flight.
        assert!(camera.channel().consume(Duration::from_secs(5)).await.is_some());

        assert_eq!(camera.stop().await, StopOutcome::Stopped);
        assert_eq!(camera.camera_state().await, CameraState::Stopping);

        let outcome = camera.start().await;
        assert_eq!(outcome, StartOutcome::StillStopping);
        assert!(!outcome.is_success());

        wait_for_state(&camera, CameraState::Stopped).await;
        assert!(camera.channel().is_empty());
        assert!(camera
            .channel()
            .consume(Duration::from_millis(50))
            .await
            .is_none());
        assert_eq!(camera.detections().snapshot().count, 0);
        assert_eq!(opener.open.load(Ordering::SeqCst), 0);

        assert_eq!(camera.start().await, StartOutcome::Started);
        camera.stop().await;
        assert_eq!(opener.max_open.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancel_signal_follows_lifecycle() {
        let camera = controller(Arc::default(), Arc::default());
        let cancel = camera.subscribe_cancel();

        camera.start().await;
        assert!(!*cancel.borrow());
        camera.stop().await;
        assert!(*cancel.borrow());
    }
}
