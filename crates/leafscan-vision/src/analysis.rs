//! Single-shot analysis of stored images.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use image::RgbImage;
use leafscan_models::Detection;
use tracing::{info, warn};

use crate::annotate::Annotator;
use crate::detector::{label_detections, Detector};
use crate::encoding::{load_image, save_image};
use crate::error::{VisionError, VisionResult};
use crate::metrics;
use crate::model::ModelHandle;

/// Prefix given to annotated copies of uploaded images.
pub const ANNOTATED_PREFIX: &str = "annotated_";

/// Detect on `image` and return an annotated copy with the labelled detections.
pub fn detect_and_annotate(
    detector: &dyn Detector,
    annotator: &Annotator,
    image: &RgbImage,
    confidence_threshold: f32,
) -> VisionResult<(RgbImage, Vec<Detection>)> {
    let raw = detector.detect(image, confidence_threshold)?;
    let detections = label_detections(detector, &raw);

    let mut annotated = image.clone();
    annotator.annotate(&mut annotated, &raw, &detections);
    Ok((annotated, detections))
}

/// Result of analysing one stored image.
#[derive(Debug, Clone)]
pub struct AnalysisOutput {
    pub detections: Vec<Detection>,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
}

/// Path of the annotated copy for `input`, in the same directory.
pub fn annotated_path(input: &Path) -> VisionResult<PathBuf> {
    let name = input
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| VisionError::InvalidImage(format!("invalid file name: {}", input.display())))?;
    Ok(input.with_file_name(format!("{}{}", ANNOTATED_PREFIX, name)))
}

/// Runs the detector once on stored images.
pub struct ImageAnalyzer {
    model: Arc<ModelHandle>,
    annotator: Arc<Annotator>,
    confidence_threshold: f32,
}

impl ImageAnalyzer {
    pub fn new(model: Arc<ModelHandle>, annotator: Arc<Annotator>, confidence_threshold: f32) -> Self {
        Self {
            model,
            annotator,
            confidence_threshold,
        }
    }

    /// Analyse `input`, writing the annotated copy next to it.
    ///
    /// Fails with [`VisionError::ModelNotReady`] before any output is written
    /// when the model has not finished loading. Blocking; call from a
    /// blocking worker.
    pub fn analyze_file(&self, input: &Path) -> VisionResult<AnalysisOutput> {
        let detector = self.model.current().ok_or(VisionError::ModelNotReady)?;
        let image = load_image(input)?;

        let started = Instant::now();
        let result = detect_and_annotate(
            detector.as_ref(),
            &self.annotator,
            &image,
            self.confidence_threshold,
        );
        metrics::record_inference("upload", started.elapsed().as_secs_f64(), result.is_ok());

        let (annotated, detections) = result.map_err(|e| {
            warn!(path = %input.display(), error = %e, "Upload detection failed");
            e
        })?;

        let output_path = annotated_path(input)?;
        save_image(&annotated, &output_path)?;

        info!(
            input = %input.display(),
            output = %output_path.display(),
            count = detections.len(),
            "Upload analysed"
        );

        Ok(AnalysisOutput {
            detections,
            input_path: input.to_path_buf(),
            output_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::RawDetection;
    use image::Rgb;
    use leafscan_models::BoundingBox;

    struct OneBox;

    impl Detector for OneBox {
        fn detect(&self, _image: &RgbImage, _t: f32) -> VisionResult<Vec<RawDetection>> {
            Ok(vec![RawDetection {
                class_id: 0,
                confidence: 0.9,
                bbox: BoundingBox::new(0, 0, 10, 10),
            }])
        }

        fn class_name(&self, _class_id: usize) -> String {
            "X".to_string()
        }
    }

    struct Broken;

    impl Detector for Broken {
        fn detect(&self, _image: &RgbImage, _t: f32) -> VisionResult<Vec<RawDetection>> {
            Err(VisionError::inference("tensor shape mismatch"))
        }

        fn class_name(&self, class_id: usize) -> String {
            class_id.to_string()
        }
    }

    fn write_input(dir: &Path) -> PathBuf {
        let path = dir.join("leaf.png");
        save_image(&RgbImage::from_pixel(32, 32, Rgb([0, 0, 0])), &path).unwrap();
        path
    }

    #[test]
    fn test_annotated_path() {
        assert_eq!(
            annotated_path(Path::new("uploads/leaf.jpg")).unwrap(),
            PathBuf::from("uploads/annotated_leaf.jpg")
        );
    }

    #[test]
    fn test_analyze_writes_annotated_copy() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path());
        let analyzer = ImageAnalyzer::new(
            Arc::new(ModelHandle::loaded(Arc::new(OneBox))),
            Arc::new(Annotator::default()),
            0.5,
        );

        let out = analyzer.analyze_file(&input).unwrap();
        assert_eq!(out.detections.len(), 1);
        assert_eq!(out.detections[0].label, "X");
        assert!(out.output_path.exists());
        assert_ne!(load_image(&out.output_path).unwrap(), load_image(&input).unwrap());
    }

    #[test]
    fn test_model_not_ready_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path());
        let source = Arc::new(crate::model::StaticModelSource::new(Arc::new(OneBox)));
        let analyzer = ImageAnalyzer::new(
            Arc::new(ModelHandle::new(source)),
            Arc::new(Annotator::default()),
            0.5,
        );

        let err = analyzer.analyze_file(&input).unwrap_err();
        assert!(matches!(err, VisionError::ModelNotReady));
        assert!(!annotated_path(&input).unwrap().exists());
    }

    #[test]
    fn test_inference_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path());
        let analyzer = ImageAnalyzer::new(
            Arc::new(ModelHandle::loaded(Arc::new(Broken))),
            Arc::new(Annotator::default()),
            0.5,
        );

        let err = analyzer.analyze_file(&input).unwrap_err();
        assert!(err.to_string().contains("tensor shape mismatch"));
        assert!(!annotated_path(&input).unwrap().exists());
    }
}
