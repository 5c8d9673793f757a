//! Image upload and single-shot analysis.

use std::path::Path;
use std::sync::Arc;

use axum::extract::{Multipart, State};
use axum::Json;
use leafscan_models::Detection;
use leafscan_vision::{VisionError, ANNOTATED_PREFIX};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

/// Extensions accepted for uploads.
pub const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "webp"];

/// Reply to an upload. Validation and detection failures are reported with
/// `success: false` and a message rather than an HTTP error.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detections: Option<Vec<Detection>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_image: Option<String>,
}

impl UploadResponse {
    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            detections: None,
            input_image: None,
            output_image: None,
        }
    }

    fn analysed(filename: &str, detections: Vec<Detection>) -> Self {
        Self {
            success: true,
            message: None,
            detections: Some(detections),
            input_image: Some(upload_url(filename)),
            output_image: Some(upload_url(&format!("{}{}", ANNOTATED_PREFIX, filename))),
        }
    }
}

fn upload_url(filename: &str) -> String {
    format!("/uploads/{}", filename)
}

/// Reduce a client-supplied file name to a safe single path component.
///
/// Directory parts are dropped, whitespace becomes `_`, anything outside
/// `[A-Za-z0-9._-]` is removed and leading dots are stripped. Returns `None`
/// when nothing usable remains.
pub fn sanitize_filename(raw: &str) -> Option<String> {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .filter_map(|c| match c {
            c if c.is_whitespace() => Some('_'),
            c if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') => Some(c),
            _ => None,
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// Whether `filename` has an accepted image extension.
pub fn has_allowed_extension(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| ALLOWED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// User-facing message for a failed analysis.
fn failure_message(error: &VisionError) -> String {
    match error {
        VisionError::ModelNotReady | VisionError::Inference(_) => error.to_string(),
        other => format!("Detection failed: {}", other),
    }
}

/// Store an uploaded image, run detection once and return the results.
pub async fn upload_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;
        upload = Some((filename, data));
        break;
    }

    let Some((raw_name, data)) = upload else {
        metrics::record_upload("rejected");
        return Ok(Json(UploadResponse::failure("No file uploaded")));
    };
    if raw_name.is_empty() {
        metrics::record_upload("rejected");
        return Ok(Json(UploadResponse::failure("No file selected")));
    }
    if data.is_empty() {
        metrics::record_upload("rejected");
        return Ok(Json(UploadResponse::failure("Uploaded file is empty")));
    }
    let Some(filename) = sanitize_filename(&raw_name) else {
        metrics::record_upload("rejected");
        return Ok(Json(UploadResponse::failure("Invalid file name")));
    };
    if !has_allowed_extension(&filename) {
        metrics::record_upload("rejected");
        return Ok(Json(UploadResponse::failure(format!(
            "Unsupported file type. Allowed: {}",
            ALLOWED_EXTENSIONS.join(", ")
        ))));
    }

    let upload_dir = &state.config.upload_dir;
    tokio::fs::create_dir_all(upload_dir).await?;
    let input_path = upload_dir.join(&filename);
    tokio::fs::write(&input_path, &data).await?;
    info!(filename = %filename, bytes = data.len(), "Upload stored");

    let analyzer = Arc::clone(&state.analyzer);
    let result = tokio::task::spawn_blocking(move || analyzer.analyze_file(&input_path))
        .await
        .map_err(|e| ApiError::internal(format!("Analysis task failed: {}", e)))?;

    match result {
        Ok(output) => {
            metrics::record_upload("ok");
            metrics::record_upload_detections(output.detections.len());
            Ok(Json(UploadResponse::analysed(&filename, output.detections)))
        }
        Err(e) => {
            let outcome = if matches!(e, VisionError::ModelNotReady) {
                "model_not_ready"
            } else {
                "failed"
            };
            metrics::record_upload(outcome);
            warn!(filename = %filename, error = %e, "Upload analysis failed");
            Ok(Json(UploadResponse::failure(failure_message(&e))))
        }
    }
}
