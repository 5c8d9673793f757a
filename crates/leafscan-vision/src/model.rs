//! Lazily loaded detection model.
//!
//! The handle moves through `unloaded -> loading -> loaded`. A load request is
//! a no-op while a load is in flight or after it has completed, so callers can
//! request a load on every camera start. Loading happens on a blocking worker
//! and the request returns immediately. A failed load drops back to
//! `unloaded` and keeps the error message for status reporting.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use leafscan_models::ModelState;
use tracing::{error, info};

use crate::detector::Detector;
use crate::error::VisionResult;

/// Something that can produce a detector.
pub trait ModelSource: Send + Sync + 'static {
    /// Load the model. Runs on a blocking thread.
    fn load(&self) -> VisionResult<Arc<dyn Detector>>;

    /// Short description for logs (usually the model path).
    fn describe(&self) -> String;
}

/// A source that hands out an already-constructed detector.
pub struct StaticModelSource {
    detector: Arc<dyn Detector>,
}

impl StaticModelSource {
    pub fn new(detector: Arc<dyn Detector>) -> Self {
        Self { detector }
    }
}

impl ModelSource for StaticModelSource {
    fn load(&self) -> VisionResult<Arc<dyn Detector>> {
        Ok(Arc::clone(&self.detector))
    }

    fn describe(&self) -> String {
        "in-memory detector".to_string()
    }
}

/// Loads a YOLOv8 ONNX model from disk.
#[cfg(feature = "onnx")]
pub struct OnnxModelSource {
    config: crate::yolo::YoloConfig,
}

#[cfg(feature = "onnx")]
impl OnnxModelSource {
    pub fn new(config: crate::yolo::YoloConfig) -> Self {
        Self { config }
    }
}

#[cfg(feature = "onnx")]
impl ModelSource for OnnxModelSource {
    fn load(&self) -> VisionResult<Arc<dyn Detector>> {
        let detector = crate::yolo::YoloDetector::new(self.config.clone())?;
        Ok(Arc::new(detector))
    }

    fn describe(&self) -> String {
        self.config.model_path.clone()
    }
}

enum Slot {
    Unloaded,
    Loading,
    Loaded(Arc<dyn Detector>),
}

/// Shared handle to the detection model.
pub struct ModelHandle {
    source: Arc<dyn ModelSource>,
    slot: RwLock<Slot>,
    last_error: RwLock<Option<String>>,
}

impl ModelHandle {
    pub fn new(source: Arc<dyn ModelSource>) -> Self {
        Self {
            source,
            slot: RwLock::new(Slot::Unloaded),
            last_error: RwLock::new(None),
        }
    }

    /// Handle that is already loaded with `detector`.
    pub fn loaded(detector: Arc<dyn Detector>) -> Self {
        let handle = Self::new(Arc::new(StaticModelSource::new(Arc::clone(&detector))));
        *handle.write_slot() = Slot::Loaded(detector);
        handle
    }

    pub fn state(&self) -> ModelState {
        match &*self.read_slot() {
            Slot::Unloaded => ModelState::Unloaded,
            Slot::Loading => ModelState::Loading,
            Slot::Loaded(_) => ModelState::Loaded,
        }
    }

    /// The loaded detector, or `None` while unloaded or loading.
    pub fn current(&self) -> Option<Arc<dyn Detector>> {
        match &*self.read_slot() {
            Slot::Loaded(detector) => Some(Arc::clone(detector)),
            _ => None,
        }
    }

    /// Message of the most recent failed load, cleared on success.
    pub fn last_error(&self) -> Option<String> {
        match self.last_error.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Schedule a background load unless one is running or already done.
    ///
    /// Returns `true` when a new load was scheduled. Must be called from
    /// within a tokio runtime.
    pub fn request_load(self: &Arc<Self>) -> bool {
        if !self.begin_load() {
            return false;
        }

        let handle = Arc::clone(self);
        tokio::task::spawn_blocking(move || handle.run_load());
        true
    }

    /// Load synchronously on the current thread, honoring the same state rules.
    pub fn load_blocking(&self) -> ModelState {
        if self.begin_load() {
            self.run_load();
        }
        self.state()
    }

    /// Wait until the handle leaves `loading`, up to `timeout`.
    pub async fn wait_settled(&self, timeout: Duration) -> ModelState {
        let deadline = Instant::now() + timeout;
        loop {
            let state = self.state();
            if state != ModelState::Loading || Instant::now() >= deadline {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Move `unloaded -> loading`; `false` if not currently unloaded.
    fn begin_load(&self) -> bool {
        let mut slot = self.write_slot();
        if !matches!(*slot, Slot::Unloaded) {
            return false;
        }
        *slot = Slot::Loading;
        true
    }

    fn run_load(&self) {
        let source = self.source.describe();
        info!(source = %source, "Loading detection model");
        let started = Instant::now();

        match self.source.load() {
            Ok(detector) => {
                *self.write_slot() = Slot::Loaded(detector);
                self.set_last_error(None);
                info!(
                    source = %source,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Detection model loaded"
                );
            }
            Err(e) => {
                error!(source = %source, error = %e, "Model load failed");
                self.set_last_error(Some(e.to_string()));
                *self.write_slot() = Slot::Unloaded;
            }
        }
    }

    fn set_last_error(&self, message: Option<String>) {
        match self.last_error.write() {
            Ok(mut guard) => *guard = message,
            Err(poisoned) => *poisoned.into_inner() = message,
        }
    }

    fn read_slot(&self) -> RwLockReadGuard<'_, Slot> {
        self.slot.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_slot(&self) -> RwLockWriteGuard<'_, Slot> {
        self.slot.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::RawDetection;
    use crate::error::VisionError;
    use image::RgbImage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullDetector;

    impl Detector for NullDetector {
        fn detect(&self, _image: &RgbImage, _t: f32) -> VisionResult<Vec<RawDetection>> {
            Ok(Vec::new())
        }

        fn class_name(&self, class_id: usize) -> String {
            class_id.to_string()
        }
    }

    struct CountingSource {
        loads: AtomicUsize,
        delay: Duration,
        fail: bool,
    }

    impl ModelSource for CountingSource {
        fn load(&self) -> VisionResult<Arc<dyn Detector>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            if self.fail {
                return Err(VisionError::model_not_found("missing.onnx"));
            }
            Ok(Arc::new(NullDetector))
        }

        fn describe(&self) -> String {
            "counting".to_string()
        }
    }

    fn counting(delay_ms: u64, fail: bool) -> Arc<CountingSource> {
        Arc::new(CountingSource {
            loads: AtomicUsize::new(0),
            delay: Duration::from_millis(delay_ms),
            fail,
        })
    }

    #[tokio::test]
    async fn test_request_load_is_fire_once() {
        let source = counting(50, false);
        let handle = Arc::new(ModelHandle::new(source.clone()));
        assert_eq!(handle.state(), ModelState::Unloaded);
        assert!(handle.current().is_none());

        assert!(handle.request_load());
        assert_eq!(handle.state(), ModelState::Loading);
        assert!(!handle.request_load());

        assert_eq!(handle.wait_settled(Duration::from_secs(5)).await, ModelState::Loaded);
        assert!(handle.current().is_some());
        assert!(!handle.request_load());
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_load_records_error_and_allows_retry() {
        let source = counting(0, true);
        let handle = Arc::new(ModelHandle::new(source.clone()));

        assert!(handle.request_load());
        assert_eq!(handle.wait_settled(Duration::from_secs(5)).await, ModelState::Unloaded);
        assert!(handle.last_error().unwrap().contains("missing.onnx"));

        assert!(handle.request_load());
        handle.wait_settled(Duration::from_secs(5)).await;
        assert_eq!(source.loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_preloaded_handle() {
        let handle = ModelHandle::loaded(Arc::new(NullDetector));
        assert_eq!(handle.state(), ModelState::Loaded);
        assert_eq!(handle.load_blocking(), ModelState::Loaded);
        assert!(handle.last_error().is_none());
    }
}
