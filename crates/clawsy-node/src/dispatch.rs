//! Maps normalized command names onto capability, approval and storage calls.
//!
//! Every path ends in exactly one [`CommandOutcome`]. Params are decoded
//! into typed structs; a decode failure is an invalid-params error, an
//! unknown command is method-not-found.

use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use clawsy_core::{CommandOutcome, RpcError};

use crate::capabilities::{
    ApprovalDecision, ApprovalHandler, CapabilityProvider, FileAccessRequest, FileAction,
    Notification,
};
use crate::files::{FolderError, SharedFolder};
use crate::permissions::{PermissionCategory, PermissionGate};

#[derive(Debug, Default, Deserialize)]
struct ScreenParams {
    #[serde(default)]
    interactive: bool,
}

#[derive(Debug, Deserialize)]
struct ClipboardWriteParams {
    text: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CameraSnapParams {
    #[serde(default)]
    device_id: Option<String>,
    #[serde(default)]
    preview: bool,
}

#[derive(Debug, Deserialize)]
struct FileGetParams {
    name: String,
}

#[derive(Debug, Deserialize)]
struct FileSetParams {
    name: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct SmartLocationParams {
    name: String,
    lat: f64,
    lon: f64,
}

fn decode<T: DeserializeOwned>(params: Value, missing: &str) -> Result<T, RpcError> {
    serde_json::from_value(params).map_err(|e| RpcError::invalid_params(format!("{missing} ({e})")))
}

fn to_result<T: Serialize>(value: &T) -> CommandOutcome {
    serde_json::to_value(value).map_err(|e| RpcError::server(e.to_string()))
}

/// Executes commands against the node's collaborators. Cheap to clone; one
/// clone goes into each command task.
#[derive(Clone)]
pub struct Dispatcher {
    provider: Arc<dyn CapabilityProvider>,
    approver: Arc<dyn ApprovalHandler>,
    permissions: Arc<PermissionGate>,
    folder: SharedFolder,
    folder_label: String,
}

impl Dispatcher {
    pub fn new(
        provider: Arc<dyn CapabilityProvider>,
        approver: Arc<dyn ApprovalHandler>,
        permissions: Arc<PermissionGate>,
        shared_folder: &str,
    ) -> Self {
        Self {
            provider,
            approver,
            permissions,
            folder: SharedFolder::new(shared_folder),
            folder_label: shared_folder.to_string(),
        }
    }

    /// Commands that get a "processing" ack before their result.
    pub fn needs_ack(command: &str) -> bool {
        command.starts_with("file.")
    }

    pub async fn execute(&self, command: &str, params: Value) -> CommandOutcome {
        self.execute_with_ack(command, params, || {}).await
    }

    /// Run `command`, calling `ack` once a `file.*` command has passed its
    /// folder and name checks and is about to do the slow part.
    pub async fn execute_with_ack<F>(&self, command: &str, params: Value, ack: F) -> CommandOutcome
    where
        F: FnOnce() + Send,
    {
        self.preflight(command, &params).await?;
        if Self::needs_ack(command) {
            ack();
        }

        match command {
            "screen.capture" => {
                let p: ScreenParams = decode(params, "Invalid 'interactive' parameter")?;
                let granted = self
                    .consult(
                        PermissionCategory::Screen,
                        self.approver.approve_screen_capture(p.interactive),
                    )
                    .await;
                if granted.is_none() {
                    tracing::info!("screenshot denied by user");
                    return Err(RpcError::denied("User denied screenshot"));
                }
                let shot = self.provider.capture_screen(p.interactive).await?;
                to_result(&shot)
            }
            "clipboard.read" => {
                let text = self.provider.read_clipboard().await?;
                Ok(json!({ "text": text }))
            }
            "clipboard.write" => {
                let p: ClipboardWriteParams = decode(params, "Missing 'text' parameter")?;
                let granted = self
                    .consult(
                        PermissionCategory::Clipboard,
                        self.approver.approve_clipboard_write(&p.text),
                    )
                    .await;
                if granted.is_none() {
                    tracing::info!("clipboard write denied by user");
                    return Err(RpcError::denied("User denied clipboard write"));
                }
                self.provider.write_clipboard(&p.text).await?;
                Ok(json!({ "status": "ok" }))
            }
            "camera.list" => {
                let cameras = self.provider.list_cameras().await?;
                Ok(json!({ "cameras": cameras }))
            }
            "camera.snap" => self.camera_snap(params).await,
            "file.list" => {
                let files = self.folder.list().await?;
                Ok(json!({ "files": files, "path": self.folder_label }))
            }
            "file.get" => self.file_get(params).await,
            "file.set" => self.file_set(params).await,
            "location.get" => match self.provider.current_location().await? {
                Some(location) => to_result(&location),
                None => Err(RpcError::server("Location not available")),
            },
            "location.start" => {
                self.provider.start_location().await?;
                Ok(json!({ "status": "started" }))
            }
            "location.stop" => {
                self.provider.stop_location().await?;
                Ok(json!({ "status": "stopped" }))
            }
            "location.add_smart" => {
                let p: SmartLocationParams = decode(params, "Missing params (name, lat, lon)")?;
                self.provider
                    .add_smart_location(&p.name, p.lat, p.lon)
                    .await?;
                Ok(json!({ "status": "added", "name": p.name }))
            }
            _ => Err(RpcError::method_not_found()),
        }
    }

    /// Folder and name checks for `file.*`, done before the ack.
    async fn preflight(&self, command: &str, params: &Value) -> Result<(), RpcError> {
        if !command.starts_with("file.") {
            return Ok(());
        }
        if !self.folder.exists().await {
            return Err(FolderError::NotConfigured.into());
        }

        let missing = match command {
            "file.get" => "Missing 'name' parameter",
            "file.set" => "Missing 'name' or 'content' parameter",
            _ => return Ok(()),
        };
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params(missing))?;
        self.folder.resolve(name)?;
        Ok(())
    }

    async fn camera_snap(&self, params: Value) -> CommandOutcome {
        let p: CameraSnapParams = decode(params, "Invalid camera parameters")?;
        let image = self
            .provider
            .snap_camera(p.device_id.as_deref())
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "camera capture failed");
                RpcError::from(e)
            })?;
        let standing = self.permissions.is_granted(PermissionCategory::Camera);
        if p.preview && !standing && !self.approver.approve_camera_image(&image).await {
            return Err(RpcError::denied("User rejected camera image"));
        }
        Ok(json!({ "content": image.base64 }))
    }

    async fn file_get(&self, params: Value) -> CommandOutcome {
        let p: FileGetParams = decode(params, "Missing 'name' parameter")?;
        self.authorize_file(&p.name, FileAction::Download).await?;

        let content = self.folder.read_base64(&p.name).await.map_err(|e| match e {
            FolderError::Io(io) => RpcError::server(format!("Failed to read file: {io}")),
            other => other.into(),
        })?;
        Ok(json!({ "content": content, "name": p.name }))
    }

    async fn file_set(&self, params: Value) -> CommandOutcome {
        let p: FileSetParams = decode(params, "Missing 'name' or 'content' parameter")?;
        self.authorize_file(&p.name, FileAction::Upload).await?;

        self.folder
            .write_base64(&p.name, &p.content)
            .await
            .map_err(|e| match e {
                FolderError::Io(io) => RpcError::server(format!("Failed to write file: {io}")),
                other => other.into(),
            })?;
        Ok(json!({ "status": "ok", "name": p.name }))
    }

    /// Standing grant for `category`, or the user's answer to `prompt`.
    ///
    /// `Some(true)` when a standing grant applied, `Some(false)` when the
    /// user allowed it just now (a timed answer is recorded), `None` when
    /// denied. `prompt` is only polled without a standing grant.
    async fn consult(
        &self,
        category: PermissionCategory,
        prompt: impl Future<Output = ApprovalDecision>,
    ) -> Option<bool> {
        if self.permissions.is_granted(category) {
            return Some(true);
        }
        let decision = prompt.await;
        if !decision.is_allowed() {
            return None;
        }
        self.permissions.grant(category, decision.grant_duration());
        Some(false)
    }

    async fn authorize_file(&self, name: &str, action: FileAction) -> Result<(), RpcError> {
        let request = FileAccessRequest {
            name: name.to_string(),
            action,
        };
        let Some(automatic) = self
            .consult(
                PermissionCategory::File,
                self.approver.approve_file_access(&request),
            )
            .await
        else {
            tracing::info!(name, %action, "file access denied by user");
            return Err(RpcError::denied(match action {
                FileAction::Download => "User denied file access",
                FileAction::Upload => "User denied file write",
            }));
        };

        self.approver.notify(&Notification {
            action,
            name: name.to_string(),
            automatic,
        });
        Ok(())
    }
}
