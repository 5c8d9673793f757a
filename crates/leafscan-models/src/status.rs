//! Lifecycle states for the camera loop and the detection model.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Lifecycle of the capture loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum CameraState {
    /// No loop is running.
    #[default]
    Stopped,
    /// A loop has been spawned and is opening the device.
    Starting,
    /// The device is open and frames are flowing.
    Running,
    /// Stop was requested; the loop exits at its next iteration.
    Stopping,
}

impl CameraState {
    pub const ALL: &'static [CameraState] = &[
        CameraState::Stopped,
        CameraState::Starting,
        CameraState::Running,
        CameraState::Stopping,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CameraState::Stopped => "stopped",
            CameraState::Starting => "starting",
            CameraState::Running => "running",
            CameraState::Stopping => "stopping",
        }
    }

    /// Whether a start request should be answered with "already running".
    pub fn is_active(&self) -> bool {
        matches!(self, CameraState::Starting | CameraState::Running)
    }

    /// Encode for storage in an atomic.
    pub fn to_u8(self) -> u8 {
        match self {
            CameraState::Stopped => 0,
            CameraState::Starting => 1,
            CameraState::Running => 2,
            CameraState::Stopping => 3,
        }
    }

    /// Decode from [`CameraState::to_u8`]; unknown values map to `Stopped`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => CameraState::Starting,
            2 => CameraState::Running,
            3 => CameraState::Stopping,
            _ => CameraState::Stopped,
        }
    }
}

impl fmt::Display for CameraState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CameraState {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CameraState::ALL
            .iter()
            .copied()
            .find(|state| state.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseStateError(s.to_string()))
    }
}

/// Load state of the detection model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModelState {
    #[default]
    Unloaded,
    Loading,
    Loaded,
}

impl ModelState {
    pub const ALL: &'static [ModelState] =
        &[ModelState::Unloaded, ModelState::Loading, ModelState::Loaded];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelState::Unloaded => "unloaded",
            ModelState::Loading => "loading",
            ModelState::Loaded => "loaded",
        }
    }
}

impl fmt::Display for ModelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelState {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModelState::ALL
            .iter()
            .copied()
            .find(|state| state.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseStateError(s.to_string()))
    }
}

/// Point-in-time view of the live pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PipelineStatus {
    pub camera: CameraState,
    /// Configured capture device
    pub device: String,
    pub model: ModelState,
    /// Message of the last failed model load
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_error: Option<String>,
    /// Encoded frames waiting in the frame channel
    pub buffered_frames: usize,
    /// Detections in the current live snapshot
    pub live_detections: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown state: {0}")]
pub struct ParseStateError(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_state_roundtrip_u8() {
        for state in CameraState::ALL {
            assert_eq!(CameraState::from_u8(state.to_u8()), *state);
        }
        assert_eq!(CameraState::from_u8(200), CameraState::Stopped);
    }

    #[test]
    fn test_camera_state_active() {
        assert!(CameraState::Starting.is_active());
        assert!(CameraState::Running.is_active());
        assert!(!CameraState::Stopping.is_active());
        assert!(!CameraState::Stopped.is_active());
    }

    #[test]
    fn test_parse_states() {
        assert_eq!("Running".parse::<CameraState>().unwrap(), CameraState::Running);
        assert_eq!("loaded".parse::<ModelState>().unwrap(), ModelState::Loaded);
        assert!("paused".parse::<CameraState>().is_err());
    }

    #[test]
    fn test_pipeline_status_omits_missing_error() {
        let status = PipelineStatus {
            camera: CameraState::Running,
            device: "0".to_string(),
            model: ModelState::Loaded,
            model_error: None,
            buffered_frames: 2,
            live_detections: 1,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["camera"], "running");
        assert!(json.get("model_error").is_none());
    }

    #[test]
    fn test_serde_snake_case() {
        assert_eq!(serde_json::to_string(&ModelState::Loading).unwrap(), "\"loading\"");
        assert_eq!(serde_json::to_string(&CameraState::Stopped).unwrap(), "\"stopped\"");
    }
}
