//! API routes.

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;

use crate::handlers::{
    get_detections, get_status, get_upload, health, index, ready, start_camera, stop_camera,
    upload_image, video_feed,
};
use crate::metrics::metrics_middleware;
use crate::middleware::{
    cors_layer, rate_limit_middleware, request_id, request_logging, security_headers,
    IpRateLimiter,
};
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let camera_routes = Router::new()
        .route("/start_camera", get(start_camera))
        .route("/stop_camera", get(stop_camera))
        .route("/video_feed", get(video_feed))
        .route("/detections", get(get_detections))
        .route("/status", get(get_status));

    // Uploads run inference, so each client is throttled.
    let upload_limiter = IpRateLimiter::new(state.config.upload_rate_limit_rps);
    let upload_routes = Router::new()
        .route("/upload", post(upload_image))
        .layer(middleware::from_fn_with_state(
            upload_limiter,
            rate_limit_middleware,
        ))
        .route("/uploads/:filename", get(get_upload));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/ready", get(ready));

    // Metrics endpoint (if enabled)
    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new()
        .route("/", get(index))
        .merge(camera_routes)
        .merge(upload_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(DefaultBodyLimit::max(state.config.max_body_size))
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(request_logging))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}
