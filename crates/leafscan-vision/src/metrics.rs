//! Pipeline metrics.
//!
//! Recorded through the `metrics` facade; the API binary installs the
//! Prometheus exporter.

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    pub const FRAMES_CAPTURED_TOTAL: &str = "leafscan_frames_captured_total";
    pub const FRAMES_PUBLISHED_TOTAL: &str = "leafscan_frames_published_total";
    pub const FRAMES_DROPPED_TOTAL: &str = "leafscan_frames_dropped_total";
    pub const FRAME_READ_FAILURES_TOTAL: &str = "leafscan_frame_read_failures_total";
    pub const INFERENCE_DURATION_SECONDS: &str = "leafscan_inference_duration_seconds";
    pub const INFERENCE_FAILURES_TOTAL: &str = "leafscan_inference_failures_total";
    pub const LIVE_DETECTIONS: &str = "leafscan_live_detections";
    pub const CAMERA_RUNNING: &str = "leafscan_camera_running";
}

pub fn record_frame_captured() {
    counter!(names::FRAMES_CAPTURED_TOTAL).increment(1);
}

pub fn record_frame_published(dropped_oldest: bool) {
    counter!(names::FRAMES_PUBLISHED_TOTAL).increment(1);
    if dropped_oldest {
        counter!(names::FRAMES_DROPPED_TOTAL).increment(1);
    }
}

pub fn record_read_failure() {
    counter!(names::FRAME_READ_FAILURES_TOTAL).increment(1);
}

/// Record one inference call; `source` is `live` or `upload`.
pub fn record_inference(source: &'static str, duration_secs: f64, ok: bool) {
    let labels = [("source", source)];
    histogram!(names::INFERENCE_DURATION_SECONDS, &labels).record(duration_secs);
    if !ok {
        counter!(names::INFERENCE_FAILURES_TOTAL, &labels).increment(1);
    }
}

pub fn set_live_detections(count: usize) {
    gauge!(names::LIVE_DETECTIONS).set(count as f64);
}

pub fn set_camera_running(running: bool) {
    gauge!(names::CAMERA_RUNNING).set(if running { 1.0 } else { 0.0 });
}
