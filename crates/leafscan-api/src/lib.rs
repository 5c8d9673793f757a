//! Axum HTTP API for live leaf disease detection.
//!
//! This crate provides:
//! - Camera start/stop and an MJPEG live stream of annotated frames
//! - Live detection snapshots and pipeline status
//! - Image upload with single-shot detection
//! - Rate limiting, security headers and Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::{ApiConfig, VisionConfig, DEFAULT_LOG_FILTER};
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
