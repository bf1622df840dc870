//! Node configuration at `~/.clawsy/config.toml`.
//!
//! Gateway address, SSH fallback, shared folder, identity handling and the
//! shell commands backing each capability. CLI flags always override config
//! file values.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use clawsy_node::config::{expand_home, DEFAULT_GATEWAY_PORT, DEFAULT_SHARED_FOLDER};
use clawsy_node::ConnectionConfig;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub ssh: SshConfig,

    #[serde(default)]
    pub files: FilesConfig,

    #[serde(default)]
    pub identity: IdentityConfig,

    #[serde(default)]
    pub capabilities: CapabilitiesConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Gateway host (empty = none).
    #[serde(default)]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub token: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            token: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SshConfig {
    /// User for the tunnel fallback.
    #[serde(default)]
    pub user: Option<String>,

    /// Fall back to an SSH tunnel when the direct connection fails.
    #[serde(default = "default_true")]
    pub fallback: bool,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: None,
            fallback: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilesConfig {
    #[serde(default = "default_shared_folder")]
    pub shared_folder: String,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            shared_folder: default_shared_folder(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Device key location; `~/.clawsy/device.key` when unset.
    #[serde(default)]
    pub key_path: Option<String>,

    /// Generate a throwaway key on every launch instead of persisting one.
    #[serde(default)]
    pub ephemeral: bool,
}

/// Shell command templates, run with `sh -c`.
///
/// `{path}` is replaced with a temporary file the command must write the
/// image to; `{device}` with the requested camera id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilitiesConfig {
    /// Prints the clipboard text on stdout.
    #[serde(default)]
    pub clipboard_read: Option<String>,

    /// Reads the new clipboard text on stdin.
    #[serde(default)]
    pub clipboard_write: Option<String>,

    /// Writes a PNG to `{path}`.
    #[serde(default)]
    pub screen_capture: Option<String>,

    /// Prints one camera per line, `id<TAB>name` or just a name.
    #[serde(default)]
    pub camera_list: Option<String>,

    /// Writes a JPEG to `{path}`.
    #[serde(default)]
    pub camera_snap: Option<String>,

    /// Prints a JSON object with at least `latitude`, `longitude`, `accuracy`.
    #[serde(default)]
    pub location: Option<String>,
}

fn default_port() -> u16 {
    DEFAULT_GATEWAY_PORT
}

fn default_true() -> bool {
    true
}

fn default_shared_folder() -> String {
    DEFAULT_SHARED_FOLDER.to_string()
}

/// Values given on the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub token: Option<String>,
    pub ssh_user: Option<String>,
    pub no_ssh_fallback: bool,
    pub ephemeral: bool,
}

impl Config {
    /// Default config file location.
    pub fn default_path() -> PathBuf {
        let home = dirs::home_dir().unwrap_or_default();
        home.join(".clawsy").join("config.toml")
    }

    /// Load configuration from a TOML file, returning defaults if the file
    /// does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;

        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Save the configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("failed to serialize config")?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("failed to write config to {}", path.display()))?;

        // Holds the gateway token.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }

    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(host) = &overrides.host {
            self.gateway.host = host.clone();
        }
        if let Some(port) = overrides.port {
            self.gateway.port = port;
        }
        if let Some(token) = &overrides.token {
            self.gateway.token = token.clone();
        }
        if let Some(user) = &overrides.ssh_user {
            self.ssh.user = Some(user.clone());
        }
        if overrides.no_ssh_fallback {
            self.ssh.fallback = false;
        }
        if overrides.ephemeral {
            self.identity.ephemeral = true;
        }
    }

    /// Connection settings handed to the node engine.
    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            host: self.gateway.host.clone(),
            port: self.gateway.port,
            auth_token: self.gateway.token.clone(),
            ssh_user: self.ssh.user.clone(),
            ssh_fallback: self.ssh.fallback,
            shared_folder: self.files.shared_folder.clone(),
        }
    }

    /// Explicit key path, if configured.
    pub fn key_path(&self) -> Option<PathBuf> {
        self.identity
            .key_path
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .map(expand_home)
    }

    /// Copy safe to print: the token is masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.gateway.token.is_empty() {
            copy.gateway.token = "********".into();
        }
        copy
    }
}
