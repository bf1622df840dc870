//! Shared folder exposed through `file.list`, `file.get` and `file.set`.
//!
//! All paths are resolved under the folder root. Names must be relative and
//! may not climb out with `..`.

use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Serialize;
use thiserror::Error;
use tokio::fs;

use clawsy_core::RpcError;

use crate::config::expand_home;

#[derive(Debug, Error)]
pub enum FolderError {
    #[error("Folder not configured")]
    NotConfigured,

    #[error("invalid file name: {0}")]
    InvalidName(String),

    #[error("content is not valid base64: {0}")]
    InvalidContent(String),

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl From<FolderError> for RpcError {
    fn from(err: FolderError) -> Self {
        match err {
            FolderError::InvalidName(_) | FolderError::InvalidContent(_) => {
                RpcError::invalid_params(err.to_string())
            }
            FolderError::NotConfigured | FolderError::Io(_) => RpcError::server(err.to_string()),
        }
    }
}

/// One directory entry as reported to the gateway.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub name: String,
    pub is_directory: bool,
    pub size: u64,
    /// Unix seconds.
    pub modified: f64,
}

#[derive(Debug, Clone)]
pub struct SharedFolder {
    root: PathBuf,
}

impl SharedFolder {
    /// `path` may start with `~`.
    pub fn new(path: &str) -> Self {
        Self {
            root: expand_home(path),
        }
    }

    pub async fn exists(&self) -> bool {
        fs::metadata(&self.root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Visible entries of the folder root, sorted by name.
    pub async fn list(&self) -> Result<Vec<FileEntry>, FolderError> {
        if !self.exists().await {
            return Err(FolderError::NotConfigured);
        }

        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let meta = match entry.metadata().await {
                Ok(m) => m,
                Err(e) => {
                    tracing::debug!(name = %name, error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            let modified = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs_f64())
                .unwrap_or_default();
            entries.push(FileEntry {
                name,
                is_directory: meta.is_dir(),
                size: meta.len(),
                modified,
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Read a file and return it base64 encoded.
    pub async fn read_base64(&self, name: &str) -> Result<String, FolderError> {
        let path = self.resolve(name)?;
        let data = fs::read(&path).await?;
        Ok(STANDARD.encode(data))
    }

    /// Decode base64 `content` and write it to `name`, creating parent directories.
    pub async fn write_base64(&self, name: &str, content: &str) -> Result<u64, FolderError> {
        let path = self.resolve(name)?;
        let data = STANDARD
            .decode(content.trim())
            .map_err(|e| FolderError::InvalidContent(e.to_string()))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, &data).await?;
        Ok(data.len() as u64)
    }

    /// Join `name` onto the root, rejecting anything that could escape it.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, FolderError> {
        let relative = Path::new(name);
        if name.trim().is_empty() {
            return Err(FolderError::InvalidName("empty name".into()));
        }
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(FolderError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(relative))
    }
}
