//! Shared data models for the LeafScan detection service.
//!
//! This crate provides Serde-serializable types for:
//! - Detections and bounding boxes
//! - Live detection snapshots
//! - The leaf disease catalogue (diagnosis and remedy lookups)
//! - Camera and model lifecycle states

pub mod catalog;
pub mod detection;
pub mod status;

// Re-export common types
pub use catalog::{lookup_disease, normalize_class_name, DiseaseInfo, INFO_NOT_AVAILABLE};
pub use detection::{BoundingBox, Detection, DetectionSnapshot};
pub use status::{CameraState, ModelState, ParseStateError, PipelineStatus};
