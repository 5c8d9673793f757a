//! Camera lifecycle and live detection handlers.

use axum::extract::State;
use axum::Json;
use leafscan_models::{DetectionSnapshot, PipelineStatus};
use serde::Serialize;

use crate::state::AppState;

/// Reply to start/stop requests.
#[derive(Debug, Serialize)]
pub struct CameraResponse {
    pub success: bool,
    pub message: String,
}

/// Start the camera loop; a second start while running is still a success.
pub async fn start_camera(State(state): State<AppState>) -> Json<CameraResponse> {
    let outcome = state.camera.start().await;
    Json(CameraResponse {
        success: outcome.is_success(),
        message: outcome.message().to_string(),
    })
}

pub async fn stop_camera(State(state): State<AppState>) -> Json<CameraResponse> {
    let outcome = state.camera.stop().await;
    Json(CameraResponse {
        success: true,
        message: outcome.message().to_string(),
    })
}

/// Detections from the most recently processed live frame.
pub async fn get_detections(State(state): State<AppState>) -> Json<DetectionSnapshot> {
    let snapshot = state.camera.detections().snapshot();
    Json(DetectionSnapshot::clone(&snapshot))
}

pub async fn get_status(State(state): State<AppState>) -> Json<PipelineStatus> {
    Json(state.camera.status().await)
}
