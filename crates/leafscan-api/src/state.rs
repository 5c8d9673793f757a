//! Application state.

use std::sync::Arc;

use leafscan_vision::{
    default_opener, Annotator, CameraController, DeviceOpener, ImageAnalyzer, LabelFont,
    ModelHandle, ModelSource, OnnxModelSource,
};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::ApiConfig;

/// Label text height in pixels.
const LABEL_FONT_PX: f32 = 16.0;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub camera: Arc<CameraController>,
    pub analyzer: Arc<ImageAnalyzer>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl AppState {
    /// Create state with the compiled-in camera backend and the configured ONNX model.
    pub async fn new(config: ApiConfig) -> Result<Self, std::io::Error> {
        tokio::fs::create_dir_all(&config.upload_dir).await?;
        let source = Arc::new(OnnxModelSource::new(config.vision.yolo_config()));
        Ok(Self::with_components(config, default_opener(), source))
    }

    /// Create state around explicit device and model implementations.
    pub fn with_components(
        config: ApiConfig,
        opener: Arc<dyn DeviceOpener>,
        source: Arc<dyn ModelSource>,
    ) -> Self {
        let model = Arc::new(ModelHandle::new(source));
        let annotator = Arc::new(Annotator::new(load_label_font(&config)));

        let camera = CameraController::new(
            config.vision.loop_config(),
            opener,
            Arc::clone(&model),
            Arc::clone(&annotator),
        )
        .with_stop_timeout(config.vision.stop_timeout);

        let analyzer = ImageAnalyzer::new(model, annotator, config.vision.confidence_threshold);

        let (shutdown, _) = watch::channel(false);

        Self {
            config,
            camera: Arc::new(camera),
            analyzer: Arc::new(analyzer),
            shutdown: Arc::new(shutdown),
        }
    }

    pub fn model(&self) -> &Arc<ModelHandle> {
        self.camera.model()
    }

    /// Flips to `true` once the server begins shutting down.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// End open streams and stop the camera.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        self.camera.stop().await;
    }
}

fn load_label_font(config: &ApiConfig) -> Option<LabelFont> {
    let path = config.vision.label_font_path.as_deref()?;
    match LabelFont::load(path, LABEL_FONT_PX) {
        Ok(font) => {
            info!(path = %path, "Loaded label font");
            Some(font)
        }
        Err(e) => {
            warn!(path = %path, error = %e, "Label font unavailable; drawing boxes without text");
            None
        }
    }
}
