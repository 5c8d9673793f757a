//! Object detector abstraction.
//!
//! The service treats the model as an opaque function from an RGB image to a
//! list of `(class id, confidence, box)` triples plus a class-name mapping.
//! [`crate::yolo::YoloDetector`] is the production implementation; tests
//! plug in their own.

use std::collections::HashMap;
use std::path::Path;

use image::RgbImage;
use leafscan_models::{BoundingBox, Detection};

use crate::error::{VisionError, VisionResult};

/// One raw model output in pixel coordinates of the input image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
    pub class_id: usize,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// A pretrained object detector.
pub trait Detector: Send + Sync {
    /// Run inference on one frame, keeping detections at or above `confidence_threshold`.
    fn detect(&self, image: &RgbImage, confidence_threshold: f32) -> VisionResult<Vec<RawDetection>>;

    /// Human-readable name of a class id.
    fn class_name(&self, class_id: usize) -> String;
}

/// Resolve raw outputs into labelled detections with catalogue text attached.
pub fn label_detections(detector: &dyn Detector, raw: &[RawDetection]) -> Vec<Detection> {
    raw.iter()
        .map(|r| Detection::new(detector.class_name(r.class_id), r.confidence, r.bbox))
        .collect()
}

/// Class id to label mapping.
///
/// Ids without an entry render as their decimal value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelMap {
    names: HashMap<usize, String>,
}

impl LabelMap {
    pub fn new(names: HashMap<usize, String>) -> Self {
        Self { names }
    }

    /// Build from an ordered list, where position is the class id.
    pub fn from_list<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: labels
                .into_iter()
                .enumerate()
                .map(|(i, s)| (i, s.into()))
                .collect(),
        }
    }

    /// Parse a labels file: one label per line, blank lines and `#` comments skipped.
    pub fn parse(content: &str) -> Self {
        Self::from_list(
            content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#')),
        )
    }

    /// Load a labels file from disk.
    pub fn load(path: impl AsRef<Path>) -> VisionResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(VisionError::FileNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    pub fn name(&self, class_id: usize) -> String {
        self.names
            .get(&class_id)
            .cloned()
            .unwrap_or_else(|| class_id.to_string())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
