//! YOLOv8 detector on ONNX Runtime.
//!
//! Uses ONNX Runtime for inference with automatic execution provider selection:
//! - CUDA on Linux with NVIDIA GPU (when `cuda` feature enabled)
//! - CoreML on macOS
//! - CPU fallback on all platforms

use std::path::Path;
use std::sync::Mutex;

use image::imageops::FilterType;
use image::RgbImage;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{Tensor, Value};
use tracing::{debug, info};

use crate::detector::{Detector, LabelMap, RawDetection};
use crate::error::{VisionError, VisionResult};
use crate::postprocess::{decode_yolov8, non_maximum_suppression};

/// Configuration for the YOLOv8 detector.
#[derive(Debug, Clone)]
pub struct YoloConfig {
    /// Path to ONNX model file
    pub model_path: String,
    /// Optional labels file, one class name per line
    pub labels_path: Option<String>,
    /// IoU threshold for NMS
    pub nms_threshold: f32,
    /// Input image size (model expects square input)
    pub input_size: u32,
}

impl Default for YoloConfig {
    fn default() -> Self {
        Self {
            model_path: "best.onnx".to_string(),
            labels_path: None,
            nms_threshold: 0.45,
            input_size: 640,
        }
    }
}

/// Object detector backed by a YOLOv8 ONNX export.
pub struct YoloDetector {
    session: Mutex<Session>,
    labels: LabelMap,
    config: YoloConfig,
}

impl YoloDetector {
    /// Load the model and labels described by `config`.
    ///
    /// Returns error if the model file doesn't exist or cannot be loaded.
    pub fn new(config: YoloConfig) -> VisionResult<Self> {
        let model_path = Path::new(&config.model_path);
        if !model_path.exists() {
            return Err(VisionError::model_not_found(&config.model_path));
        }

        let labels = match &config.labels_path {
            Some(path) => LabelMap::load(path)?,
            None => LabelMap::default(),
        };

        let session = Mutex::new(create_session(model_path)?);
        info!(
            model_path = %config.model_path,
            input_size = config.input_size,
            labels = labels.len(),
            "YOLO detector initialized"
        );

        Ok(Self {
            session,
            labels,
            config,
        })
    }

    pub fn config(&self) -> &YoloConfig {
        &self.config
    }

    /// Resize to the square model input and lay out as normalized NCHW.
    fn preprocess(&self, image: &RgbImage) -> VisionResult<Value> {
        let size = self.config.input_size;
        let resized = image::imageops::resize(image, size, size, FilterType::Triangle);
        let (w, h) = (size as usize, size as usize);

        let mut chw_data: Vec<f32> = Vec::with_capacity(3 * h * w);
        for c in 0..3 {
            for y in 0..h {
                for x in 0..w {
                    let pixel = resized.get_pixel(x as u32, y as u32);
                    chw_data.push(pixel[c] as f32 / 255.0);
                }
            }
        }

        let shape = vec![1usize, 3, h, w];
        Tensor::from_array((shape, chw_data.into_boxed_slice()))
            .map(Value::from)
            .map_err(|e| VisionError::inference(format!("Failed to create tensor: {}", e)))
    }

    /// Run the session and return `(features, boxes, data)` of the first output.
    fn run_inference(&self, input: Value) -> VisionResult<(usize, usize, Vec<f32>)> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| VisionError::internal("Session lock poisoned"))?;

        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| VisionError::inference(format!("ONNX inference failed: {}", e)))?;

        let output = outputs
            .get("output0")
            .ok_or_else(|| VisionError::inference("Missing output0 tensor"))?;

        let (shape, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| VisionError::inference(format!("Failed to extract tensor: {}", e)))?;

        if shape.len() != 3 {
            return Err(VisionError::inference(format!(
                "Unexpected output rank {}",
                shape.len()
            )));
        }

        Ok((shape[1] as usize, shape[2] as usize, data.to_vec()))
    }
}

impl Detector for YoloDetector {
    fn detect(&self, image: &RgbImage, confidence_threshold: f32) -> VisionResult<Vec<RawDetection>> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(VisionError::InvalidImage("empty frame".to_string()));
        }

        let input = self.preprocess(image)?;
        let (features, boxes, data) = self.run_inference(input)?;

        let input_size = self.config.input_size as f32;
        let candidates = decode_yolov8(
            &data,
            features,
            boxes,
            confidence_threshold,
            width as f32 / input_size,
            height as f32 / input_size,
        )?;
        let kept = non_maximum_suppression(candidates, self.config.nms_threshold);

        debug!(count = kept.len(), "Object detection completed");

        Ok(kept.iter().map(|c| c.to_raw(width, height)).collect())
    }

    fn class_name(&self, class_id: usize) -> String {
        self.labels.name(class_id)
    }
}

/// Create ONNX Runtime session with automatic execution provider selection.
fn create_session(model_path: &Path) -> VisionResult<Session> {
    let model_bytes = std::fs::read(model_path)
        .map_err(|e| VisionError::model_load(format!("Failed to read model file: {}", e)))?;

    let builder = Session::builder()
        .map_err(|e| VisionError::model_load(format!("Failed to create session builder: {}", e)))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| VisionError::model_load(format!("Failed to set optimization level: {}", e)))?;

    #[cfg(all(target_os = "linux", feature = "cuda"))]
    {
        use ort::execution_providers::CUDAExecutionProvider;
        if let Ok(cuda_builder) = builder
            .clone()
            .with_execution_providers([CUDAExecutionProvider::default().build()])
        {
            if let Ok(session) = cuda_builder.commit_from_memory(&model_bytes) {
                info!("Using CUDA execution provider for object detection");
                return Ok(session);
            }
        }
        debug!("CUDA execution provider not available, trying alternatives");
    }

    #[cfg(target_os = "macos")]
    {
        use ort::execution_providers::CoreMLExecutionProvider;
        if let Ok(coreml_builder) = builder
            .clone()
            .with_execution_providers([CoreMLExecutionProvider::default().build()])
        {
            if let Ok(session) = coreml_builder.commit_from_memory(&model_bytes) {
                info!("Using CoreML execution provider for object detection");
                return Ok(session);
            }
        }
        debug!("CoreML execution provider not available, using CPU");
    }

    info!("Using CPU execution provider for object detection");
    builder
        .commit_from_memory(&model_bytes)
        .map_err(|e| VisionError::model_load(format!("Failed to load ONNX model: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = YoloConfig::default();
        assert_eq!(config.input_size, 640);
        assert!((config.nms_threshold - 0.45).abs() < 0.001);
        assert!(config.labels_path.is_none());
    }

    #[test]
    fn test_missing_model_file() {
        let config = YoloConfig {
            model_path: "/nonexistent/best.onnx".to_string(),
            ..Default::default()
        };
        match YoloDetector::new(config) {
            Err(VisionError::ModelNotFound(path)) => assert!(path.contains("best.onnx")),
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("model should not load"),
        }
    }
}
