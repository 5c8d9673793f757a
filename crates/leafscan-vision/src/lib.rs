#![deny(unreachable_patterns)]
//! Camera capture and leaf disease detection pipeline.
//!
//! This crate provides:
//! - Capture device abstraction with an optional OpenCV backend
//! - YOLOv8 inference on ONNX Runtime with NMS post-processing
//! - A lazily loaded, fire-once model handle
//! - Box and label annotation, JPEG encoding
//! - The live capture loop, a bounded drop-oldest frame channel and the
//!   start/stop controller
//! - Single-shot analysis of uploaded images

pub mod analysis;
pub mod annotate;
pub mod capture;
pub mod channel;
pub mod controller;
pub mod detector;
pub mod encoding;
pub mod error;
mod glyphs;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod postprocess;
#[cfg(feature = "onnx")]
pub mod yolo;

pub use analysis::{annotated_path, detect_and_annotate, AnalysisOutput, ImageAnalyzer, ANNOTATED_PREFIX};
pub use annotate::{class_color, label_text, Annotator, LabelFont};
pub use capture::{default_opener, CaptureDevice, CaptureSettings, DeviceId, DeviceOpener, UnavailableOpener};
pub use channel::{FrameChannel, FRAME_CHANNEL_CAPACITY};
pub use controller::{CameraController, StartOutcome, StopOutcome};
pub use detector::{label_detections, Detector, LabelMap, RawDetection};
pub use encoding::{decode_image, encode_jpeg, load_image, save_image, DEFAULT_JPEG_QUALITY};
pub use error::{VisionError, VisionResult};
pub use model::{ModelHandle, ModelSource, StaticModelSource};
pub use pipeline::{LiveDetections, LoopConfig};

#[cfg(feature = "onnx")]
pub use model::OnnxModelSource;
#[cfg(feature = "onnx")]
pub use yolo::{YoloConfig, YoloDetector};
