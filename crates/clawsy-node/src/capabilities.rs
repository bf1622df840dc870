//! Collaborators the engine calls out to: device capabilities and the user.
//!
//! The engine itself knows nothing about screens, cameras or dialogs. A host
//! application implements [`CapabilityProvider`] for whatever the device can
//! do and [`ApprovalHandler`] for whatever way it has of asking the user.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use clawsy_core::RpcError;

/// Failure of a capability call, answered on the command's correlation id.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    #[error("{0} is not available on this node")]
    Unavailable(String),

    #[error("{0}")]
    Failed(String),

    #[error("{0}")]
    Denied(String),
}

pub type CapabilityResult<T> = Result<T, CapabilityError>;

impl From<CapabilityError> for RpcError {
    fn from(err: CapabilityError) -> Self {
        match err {
            CapabilityError::Denied(msg) => RpcError::denied(msg),
            other => RpcError::server(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenCapture {
    /// Image format, e.g. `png`.
    pub format: String,
    pub base64: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraInfo {
    pub id: String,
    pub name: String,
}

/// A camera frame, base64 encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraImage {
    pub base64: String,
}

/// A position fix, shaped the way the agent expects it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    /// Unix seconds.
    pub timestamp: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_name: Option<String>,
}

/// Device capabilities. Every method defaults to `Unavailable` so a host only
/// implements what it has.
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    async fn capture_screen(&self, _interactive: bool) -> CapabilityResult<ScreenCapture> {
        Err(CapabilityError::Unavailable("screen capture".into()))
    }

    async fn read_clipboard(&self) -> CapabilityResult<String> {
        Err(CapabilityError::Unavailable("clipboard".into()))
    }

    async fn write_clipboard(&self, _text: &str) -> CapabilityResult<()> {
        Err(CapabilityError::Unavailable("clipboard".into()))
    }

    async fn list_cameras(&self) -> CapabilityResult<Vec<CameraInfo>> {
        Err(CapabilityError::Unavailable("camera".into()))
    }

    async fn snap_camera(&self, _device_id: Option<&str>) -> CapabilityResult<CameraImage> {
        Err(CapabilityError::Unavailable("camera".into()))
    }

    /// Last known position, `None` if there is no fix yet.
    async fn current_location(&self) -> CapabilityResult<Option<Location>> {
        Err(CapabilityError::Unavailable("location".into()))
    }

    async fn start_location(&self) -> CapabilityResult<()> {
        Err(CapabilityError::Unavailable("location".into()))
    }

    async fn stop_location(&self) -> CapabilityResult<()> {
        Err(CapabilityError::Unavailable("location".into()))
    }

    async fn add_smart_location(&self, _name: &str, _lat: f64, _lon: f64) -> CapabilityResult<()> {
        Err(CapabilityError::Unavailable("location".into()))
    }
}

/// Provider with no capabilities at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCapabilities;

#[async_trait]
impl CapabilityProvider for NoCapabilities {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileAction {
    Download,
    Upload,
}

impl std::fmt::Display for FileAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Download => "download",
            Self::Upload => "upload",
        })
    }
}

/// A file command waiting for the user's decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAccessRequest {
    pub name: String,
    pub action: FileAction,
}

/// The user's answer to an approval prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Deny,
    /// Allow this one operation only.
    Once,
    /// Allow, and keep allowing the category for the given time.
    For(Duration),
}

impl ApprovalDecision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Self::Deny)
    }

    /// Duration to record in the permission gate.
    pub fn grant_duration(&self) -> Option<Duration> {
        match self {
            Self::For(d) => Some(*d),
            Self::Deny | Self::Once => None,
        }
    }
}

/// A file transfer about to happen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub action: FileAction,
    pub name: String,
    /// True when a standing grant let it through without a prompt.
    pub automatic: bool,
}

/// Asks the user. Calls may take as long as the user does; the engine's
/// command timeout bounds them.
#[async_trait]
pub trait ApprovalHandler: Send + Sync {
    async fn approve_file_access(&self, request: &FileAccessRequest) -> ApprovalDecision;

    /// Gate for `screen.capture`. Denied unless the host asks the user.
    async fn approve_screen_capture(&self, _interactive: bool) -> ApprovalDecision {
        ApprovalDecision::Deny
    }

    /// Gate for `clipboard.write`, shown the text about to replace the
    /// clipboard. Denied unless the host asks the user.
    async fn approve_clipboard_write(&self, _text: &str) -> ApprovalDecision {
        ApprovalDecision::Deny
    }

    /// Gate for `camera.snap` with `preview: true`.
    async fn approve_camera_image(&self, _image: &CameraImage) -> bool {
        true
    }

    fn notify(&self, _notification: &Notification) {}
}

/// Answers every prompt with the same decision.
#[derive(Debug, Clone, Copy)]
pub struct StaticApprover(pub ApprovalDecision);

#[async_trait]
impl ApprovalHandler for StaticApprover {
    async fn approve_file_access(&self, request: &FileAccessRequest) -> ApprovalDecision {
        tracing::debug!(name = %request.name, action = %request.action, decision = ?self.0, "static approval");
        self.0
    }

    async fn approve_screen_capture(&self, _interactive: bool) -> ApprovalDecision {
        self.0
    }

    async fn approve_clipboard_write(&self, _text: &str) -> ApprovalDecision {
        self.0
    }

    async fn approve_camera_image(&self, _image: &CameraImage) -> bool {
        self.0.is_allowed()
    }
}
