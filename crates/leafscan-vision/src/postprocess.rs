//! YOLOv8 output decoding and non-maximum suppression.
//!
//! YOLOv8 detection heads emit a `[1, 4 + C, N]` tensor:
//! - rows 0..4 are the box in centre format (cx, cy, w, h) in model input pixels
//! - rows 4.. are per-class scores
//! - N is the number of anchor candidates (8400 for a 640x640 input)

use leafscan_models::BoundingBox;
use ndarray::ArrayView2;

use crate::detector::RawDetection;
use crate::error::{VisionError, VisionResult};

/// A decoded candidate box in source-image pixels, before NMS.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub class_id: usize,
    pub confidence: f32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl Candidate {
    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    /// Round to integer pixels, clamped to a `width` x `height` frame.
    pub fn to_raw(&self, width: u32, height: u32) -> RawDetection {
        let max_x = width.saturating_sub(1) as f32;
        let max_y = height.saturating_sub(1) as f32;
        RawDetection {
            class_id: self.class_id,
            confidence: self.confidence,
            bbox: BoundingBox::new(
                self.x1.clamp(0.0, max_x).round() as i32,
                self.y1.clamp(0.0, max_y).round() as i32,
                self.x2.clamp(0.0, max_x).round() as i32,
                self.y2.clamp(0.0, max_y).round() as i32,
            ),
        }
    }
}

/// Decode a YOLOv8 output tensor of shape `[1, num_features, num_boxes]`.
///
/// `scale_x`/`scale_y` map model-input pixels back to the source image.
pub fn decode_yolov8(
    outputs: &[f32],
    num_features: usize,
    num_boxes: usize,
    confidence_threshold: f32,
    scale_x: f32,
    scale_y: f32,
) -> VisionResult<Vec<Candidate>> {
    if num_features <= 4 {
        return Err(VisionError::inference(format!(
            "Output has no class scores: {} features",
            num_features
        )));
    }
    if outputs.len() != num_features * num_boxes {
        return Err(VisionError::inference(format!(
            "Unexpected output size: expected {}, got {}",
            num_features * num_boxes,
            outputs.len()
        )));
    }

    let view = ArrayView2::from_shape((num_features, num_boxes), outputs)
        .map_err(|e| VisionError::inference(format!("Failed to reshape output: {}", e)))?;
    let transposed = view.t(); // [num_boxes, num_features]
    let num_classes = num_features - 4;

    let mut candidates = Vec::new();
    for i in 0..num_boxes {
        let mut best_class = 0;
        let mut best_score = f32::MIN;
        for c in 0..num_classes {
            let score = transposed[[i, 4 + c]];
            if score > best_score {
                best_score = score;
                best_class = c;
            }
        }

        if best_score < confidence_threshold {
            continue;
        }

        let cx = transposed[[i, 0]];
        let cy = transposed[[i, 1]];
        let w = transposed[[i, 2]];
        let h = transposed[[i, 3]];

        candidates.push(Candidate {
            class_id: best_class,
            confidence: best_score,
            x1: (cx - w / 2.0) * scale_x,
            y1: (cy - h / 2.0) * scale_y,
            x2: (cx + w / 2.0) * scale_x,
            y2: (cy + h / 2.0) * scale_y,
        });
    }

    Ok(candidates)
}

/// Intersection over union of two candidates.
pub fn iou(a: &Candidate, b: &Candidate) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.area() + b.area() - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Greedy per-class NMS, highest confidence first.
pub fn non_maximum_suppression(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    if candidates.is_empty() {
        return candidates;
    }

    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep = Vec::new();
    let mut suppressed = vec![false; candidates.len()];

    for i in 0..candidates.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(candidates[i]);

        for j in (i + 1)..candidates.len() {
            if suppressed[j] || candidates[i].class_id != candidates[j].class_id {
                continue;
            }
            if iou(&candidates[i], &candidates[j]) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}
