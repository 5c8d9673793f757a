//! Video capture device abstraction.
//!
//! The capture loop only needs `open`, `read_frame` and `release`. The OpenCV
//! backend is compiled with the `opencv` feature; without it the default
//! opener reports every device as unavailable.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use image::RgbImage;

use crate::error::{VisionError, VisionResult};

/// Identifies a capture source: a camera index or a device/file path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeviceId {
    Index(i32),
    Path(String),
}

impl Default for DeviceId {
    fn default() -> Self {
        DeviceId::Index(0)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceId::Index(i) => write!(f, "{}", i),
            DeviceId::Path(p) => f.write_str(p),
        }
    }
}

impl FromStr for DeviceId {
    type Err = VisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(VisionError::device_unavailable("empty device identifier"));
        }
        Ok(match s.parse::<i32>() {
            Ok(i) if i >= 0 => DeviceId::Index(i),
            _ => DeviceId::Path(s.to_string()),
        })
    }
}

/// How to open the capture device.
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub device: DeviceId,
    /// Requested frame width
    pub width: u32,
    /// Requested frame height
    pub height: u32,
    /// Pause after opening before the first read
    pub warmup: Duration,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            device: DeviceId::default(),
            width: 640,
            height: 480,
            warmup: Duration::from_millis(200),
        }
    }
}

/// An open capture device.
pub trait CaptureDevice: Send {
    /// Read the next frame.
    ///
    /// `Ok(None)` and `Err(_)` are both transient: the caller pauses and retries.
    fn read_frame(&mut self) -> VisionResult<Option<RgbImage>>;

    /// Release the underlying resource. Must be safe to call more than once.
    fn release(&mut self);
}

/// Opens capture devices.
pub trait DeviceOpener: Send + Sync + 'static {
    fn open(&self, settings: &CaptureSettings) -> VisionResult<Box<dyn CaptureDevice>>;
}

/// Opener used when no capture backend is compiled in.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableOpener;

impl DeviceOpener for UnavailableOpener {
    fn open(&self, settings: &CaptureSettings) -> VisionResult<Box<dyn CaptureDevice>> {
        Err(VisionError::device_unavailable(format!(
            "no capture backend compiled in for device {}",
            settings.device
        )))
    }
}

/// The best opener available in this build.
pub fn default_opener() -> Arc<dyn DeviceOpener> {
    #[cfg(feature = "opencv")]
    {
        Arc::new(opencv_backend::OpenCvOpener)
    }
    #[cfg(not(feature = "opencv"))]
    {
        Arc::new(UnavailableOpener)
    }
}

#[cfg(feature = "opencv")]
pub use opencv_backend::{OpenCvDevice, OpenCvOpener};

#[cfg(feature = "opencv")]
mod opencv_backend {
    use image::RgbImage;
    use opencv::core::Mat;
    use opencv::imgproc;
    use opencv::prelude::{MatTraitConst, MatTraitConstManual, VideoCaptureTrait, VideoCaptureTraitConst};
    use opencv::videoio::{VideoCapture, CAP_ANY, CAP_PROP_FRAME_HEIGHT, CAP_PROP_FRAME_WIDTH};
    use tracing::{debug, warn};

    use super::{CaptureDevice, CaptureSettings, DeviceId, DeviceOpener};
    use crate::error::{VisionError, VisionResult};

    /// Opens cameras and video files through OpenCV `VideoCapture`.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct OpenCvOpener;

    impl DeviceOpener for OpenCvOpener {
        fn open(&self, settings: &CaptureSettings) -> VisionResult<Box<dyn CaptureDevice>> {
            let mut cap = match &settings.device {
                DeviceId::Index(i) => VideoCapture::new(*i, CAP_ANY),
                DeviceId::Path(p) => VideoCapture::from_file(p, CAP_ANY),
            }
            .map_err(|e| VisionError::device_unavailable(format!("{}: {}", settings.device, e)))?;

            if let Err(e) = cap.set(CAP_PROP_FRAME_WIDTH, settings.width as f64) {
                debug!(error = %e, "Camera rejected frame width");
            }
            if let Err(e) = cap.set(CAP_PROP_FRAME_HEIGHT, settings.height as f64) {
                debug!(error = %e, "Camera rejected frame height");
            }

            std::thread::sleep(settings.warmup);

            if !cap.is_opened().unwrap_or(false) {
                let _ = cap.release();
                return Err(VisionError::device_unavailable(format!(
                    "failed to open camera {}",
                    settings.device
                )));
            }

            Ok(Box::new(OpenCvDevice {
                cap,
                released: false,
            }))
        }
    }

    pub struct OpenCvDevice {
        cap: VideoCapture,
        released: bool,
    }

    impl CaptureDevice for OpenCvDevice {
        fn read_frame(&mut self) -> VisionResult<Option<RgbImage>> {
            let mut frame = Mat::default();
            let ok = self
                .cap
                .read(&mut frame)
                .map_err(|e| VisionError::frame_read(e.to_string()))?;
            if !ok || frame.empty() {
                return Ok(None);
            }

            let mut rgb = Mat::default();
            imgproc::cvt_color_def(&frame, &mut rgb, imgproc::COLOR_BGR2RGB)
                .map_err(|e| VisionError::frame_read(format!("Color conversion failed: {}", e)))?;

            let width = rgb.cols() as u32;
            let height = rgb.rows() as u32;
            let data = rgb
                .data_bytes()
                .map_err(|e| VisionError::frame_read(format!("Failed to get frame data: {}", e)))?;

            Ok(RgbImage::from_raw(width, height, data.to_vec()))
        }

        fn release(&mut self) {
            if self.released {
                return;
            }
            self.released = true;
            if let Err(e) = self.cap.release() {
                warn!(error = %e, "Failed to release camera");
            }
        }
    }

    impl Drop for OpenCvDevice {
        fn drop(&mut self) {
            self.release();
        }
    }
}
