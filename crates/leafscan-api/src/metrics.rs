//! Prometheus metrics for the API server.

use std::sync::OnceLock;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use regex_lite::Regex;

/// Initialize the Prometheus metrics recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "leafscan_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "leafscan_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "leafscan_http_requests_in_flight";

    // Streaming
    pub const STREAM_VIEWERS: &str = "leafscan_stream_viewers";
    pub const STREAM_EMPTY_PARTS_TOTAL: &str = "leafscan_stream_empty_parts_total";

    // Uploads
    pub const UPLOADS_TOTAL: &str = "leafscan_uploads_total";
    pub const UPLOAD_DETECTIONS: &str = "leafscan_upload_detections";

    // Rate limiting metrics
    pub const RATE_LIMIT_HITS_TOTAL: &str = "leafscan_rate_limit_hits_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn stream_viewer_connected() {
    gauge!(names::STREAM_VIEWERS).increment(1.0);
}

pub fn stream_viewer_disconnected() {
    gauge!(names::STREAM_VIEWERS).decrement(1.0);
}

pub fn record_stream_empty_part() {
    counter!(names::STREAM_EMPTY_PARTS_TOTAL).increment(1);
}

/// Record an upload outcome (`ok`, `rejected`, `model_not_ready`, `failed`).
pub fn record_upload(outcome: &'static str) {
    let labels = [("outcome", outcome)];
    counter!(names::UPLOADS_TOTAL, &labels).increment(1);
}

pub fn record_upload_detections(count: usize) {
    histogram!(names::UPLOAD_DETECTIONS).record(count as f64);
}

/// Record rate limit hit.
pub fn record_rate_limit_hit(endpoint: &str) {
    let labels = [("endpoint", endpoint.to_string())];
    counter!(names::RATE_LIMIT_HITS_TOTAL, &labels).increment(1);
}

fn upload_file_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^/uploads/[^/]+$").expect("valid upload path pattern"))
}

/// Sanitize path for metrics labels (collapse file names).
fn sanitize_path(path: &str) -> String {
    upload_file_pattern()
        .replace(path, "/uploads/:filename")
        .into_owned()
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    // Increment in-flight counter
    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);

    let response = next.run(request).await;

    // Decrement in-flight counter
    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    let status = response.status().as_u16();
    let duration = start.elapsed().as_secs_f64();

    record_http_request(&method, &path, status, duration);

    response
}
