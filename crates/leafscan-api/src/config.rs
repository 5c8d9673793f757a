//! API configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use leafscan_vision::{CaptureSettings, DeviceId, LoopConfig, YoloConfig, DEFAULT_JPEG_QUALITY};

/// Log directives used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "leafscan_api=info,leafscan_vision=info";

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Per-client upload rate limit, requests per second
    pub upload_rate_limit_rps: u32,
    /// Max request body size
    pub max_body_size: usize,
    /// Environment (development/production)
    pub environment: String,
    /// Directory holding uploaded and annotated images
    pub upload_dir: PathBuf,
    /// Expose Prometheus metrics at /metrics
    pub metrics_enabled: bool,
    /// Camera and model settings
    pub vision: VisionConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
            upload_rate_limit_rps: 5,
            max_body_size: 16 * 1024 * 1024, // 16MB
            environment: "development".to_string(),
            upload_dir: PathBuf::from("uploads"),
            metrics_enabled: true,
            vision: VisionConfig::default(),
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: env_parse("API_PORT", defaults.port),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.cors_origins),
            upload_rate_limit_rps: env_parse("UPLOAD_RATE_LIMIT_RPS", defaults.upload_rate_limit_rps),
            max_body_size: env_parse("MAX_BODY_SIZE", defaults.max_body_size),
            environment: std::env::var("ENVIRONMENT").unwrap_or(defaults.environment),
            upload_dir: std::env::var("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir),
            metrics_enabled: std::env::var("METRICS_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.metrics_enabled),
            vision: VisionConfig::from_env(),
        }
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "production"
    }
}

/// Camera, streaming and model settings.
#[derive(Debug, Clone)]
pub struct VisionConfig {
    pub camera_device: DeviceId,
    pub camera_width: u32,
    pub camera_height: u32,
    /// Pause between published frames
    pub frame_interval: Duration,
    pub confidence_threshold: f32,
    pub jpeg_quality: u8,
    /// How long a stream viewer waits for a frame before sending an empty part
    pub stream_timeout: Duration,
    /// How long stop waits for the capture loop to exit
    pub stop_timeout: Duration,
    pub model_path: String,
    pub model_labels: Option<String>,
    pub model_input_size: u32,
    pub nms_threshold: f32,
    /// TrueType font for label text; boxes only when unset
    pub label_font_path: Option<String>,
}

impl Default for VisionConfig {
    fn default() -> Self {
        let capture = CaptureSettings::default();
        let yolo = YoloConfig::default();
        Self {
            camera_device: capture.device,
            camera_width: capture.width,
            camera_height: capture.height,
            frame_interval: Duration::from_millis(30),
            confidence_threshold: 0.5,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            stream_timeout: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(2),
            model_path: yolo.model_path,
            model_labels: yolo.labels_path,
            model_input_size: yolo.input_size,
            nms_threshold: yolo.nms_threshold,
            label_font_path: None,
        }
    }
}

impl VisionConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            camera_device: env_parse("CAMERA_DEVICE", defaults.camera_device),
            camera_width: env_parse("CAMERA_WIDTH", defaults.camera_width),
            camera_height: env_parse("CAMERA_HEIGHT", defaults.camera_height),
            frame_interval: Duration::from_millis(env_parse(
                "FRAME_INTERVAL_MS",
                defaults.frame_interval.as_millis() as u64,
            )),
            confidence_threshold: env_parse("CONFIDENCE_THRESHOLD", defaults.confidence_threshold)
                .clamp(0.0, 1.0),
            jpeg_quality: env_parse("JPEG_QUALITY", defaults.jpeg_quality),
            stream_timeout: Duration::from_secs(env_parse(
                "STREAM_TIMEOUT_SECS",
                defaults.stream_timeout.as_secs(),
            )),
            stop_timeout: Duration::from_secs(env_parse(
                "STOP_TIMEOUT_SECS",
                defaults.stop_timeout.as_secs(),
            )),
            model_path: std::env::var("MODEL_PATH").unwrap_or(defaults.model_path),
            model_labels: std::env::var("MODEL_LABELS").ok().or(defaults.model_labels),
            model_input_size: env_parse("MODEL_INPUT_SIZE", defaults.model_input_size),
            nms_threshold: env_parse("NMS_THRESHOLD", defaults.nms_threshold),
            label_font_path: std::env::var("LABEL_FONT_PATH").ok(),
        }
    }

    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            capture: CaptureSettings {
                device: self.camera_device.clone(),
                width: self.camera_width,
                height: self.camera_height,
                ..CaptureSettings::default()
            },
            confidence_threshold: self.confidence_threshold,
            jpeg_quality: self.jpeg_quality,
            frame_interval: self.frame_interval,
            ..LoopConfig::default()
        }
    }

    pub fn yolo_config(&self) -> YoloConfig {
        YoloConfig {
            model_path: self.model_path.clone(),
            labels_path: self.model_labels.clone(),
            nms_threshold: self.nms_threshold,
            input_size: self.model_input_size,
        }
    }
}

/// Parse an environment variable, falling back to `default` when unset or invalid.
fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_log_filter_covers_service_crates() {
        assert!(tracing_subscriber::EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
        for target in ["leafscan_api=info", "leafscan_vision=info"] {
            assert!(DEFAULT_LOG_FILTER.split(',').any(|d| d == target));
        }
    }

    #[test]
    fn test_defaults() {
        let config = ApiConfig::default();
        assert_eq!(config.port, 8000);
        assert_eq!(config.upload_dir, PathBuf::from("uploads"));
        assert!(!config.is_production());

        let vision = &config.vision;
        assert_eq!(vision.camera_device, DeviceId::Index(0));
        assert_eq!(vision.confidence_threshold, 0.5);
        assert_eq!(vision.stream_timeout, Duration::from_secs(5));
        assert_eq!(vision.model_path, "best.onnx");
    }

    #[test]
    fn test_loop_config_carries_camera_settings() {
        let vision = VisionConfig {
            camera_device: DeviceId::Path("/dev/video2".to_string()),
            camera_width: 1280,
            frame_interval: Duration::from_millis(50),
            ..VisionConfig::default()
        };
        let loop_config = vision.loop_config();
        assert_eq!(loop_config.capture.device, DeviceId::Path("/dev/video2".to_string()));
        assert_eq!(loop_config.capture.width, 1280);
        assert_eq!(loop_config.capture.height, 480);
        assert_eq!(loop_config.frame_interval, Duration::from_millis(50));
    }

    #[test]
    fn test_env_parse_falls_back_on_garbage() {
        std::env::set_var("LEAFSCAN_TEST_PORT", "not-a-port");
        assert_eq!(env_parse("LEAFSCAN_TEST_PORT", 8000u16), 8000);
        std::env::set_var("LEAFSCAN_TEST_PORT", " 9000 ");
        assert_eq!(env_parse("LEAFSCAN_TEST_PORT", 8000u16), 9000);
        std::env::remove_var("LEAFSCAN_TEST_PORT");
    }
}
