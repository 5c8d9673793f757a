//! Detection types shared by the live loop and the upload path.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::catalog::lookup_disease;

/// Axis-aligned box in integer pixel coordinates of the source frame.
///
/// Serialized as `[x1, y1, x2, y2]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[i32; 4]", into = "[i32; 4]")]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    /// Create a box from corner coordinates, reordering so that `x1 <= x2` and `y1 <= y2`.
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    pub fn width(&self) -> u32 {
        self.x2.abs_diff(self.x1)
    }

    pub fn height(&self) -> u32 {
        self.y2.abs_diff(self.y1)
    }

    /// Clamp the box to a `width` x `height` frame.
    ///
    /// Returns `None` when nothing of the box remains inside the frame.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Self> {
        let max_x = width as i32 - 1;
        let max_y = height as i32 - 1;
        if max_x < 0 || max_y < 0 {
            return None;
        }
        if self.x2 < 0 || self.y2 < 0 || self.x1 > max_x || self.y1 > max_y {
            return None;
        }
        Some(Self {
            x1: self.x1.clamp(0, max_x),
            y1: self.y1.clamp(0, max_y),
            x2: self.x2.clamp(0, max_x),
            y2: self.y2.clamp(0, max_y),
        })
    }
}

impl From<[i32; 4]> for BoundingBox {
    fn from(v: [i32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BoundingBox> for [i32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// One labelled detection, enriched with catalogue text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Detection {
    /// Class label reported by the model
    #[serde(rename = "class")]
    pub label: String,
    /// Detection confidence [0, 1]
    pub confidence: f32,
    /// Bounding box `[x1, y1, x2, y2]` in pixels
    #[schemars(with = "[i32; 4]")]
    pub bbox: BoundingBox,
    pub diagnosis: String,
    pub remedy: String,
}

impl Detection {
    /// Build a detection and attach the catalogue diagnosis and remedy for its label.
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        let label = label.into();
        let info = lookup_disease(&label);
        Self {
            label,
            confidence: confidence.clamp(0.0, 1.0),
            bbox,
            diagnosis: info.diagnosis.to_string(),
            remedy: info.remedy.to_string(),
        }
    }
}

/// The most recent batch of live detections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DetectionSnapshot {
    pub detections: Vec<Detection>,
    pub count: usize,
    pub timestamp: DateTime<Utc>,
}

impl DetectionSnapshot {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self {
            count: detections.len(),
            detections,
            timestamp: Utc::now(),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

impl Default for DetectionSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}
