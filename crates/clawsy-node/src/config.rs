//! Connection settings consumed by the engine.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use clawsy_core::{NodeError, NodeResult};

pub const DEFAULT_GATEWAY_PORT: u16 = 18789;

/// Fixed local port the SSH tunnel forwards to the gateway.
pub const TUNNEL_LOCAL_PORT: u16 = 18790;

pub const DEFAULT_SHARED_FOLDER: &str = "~/Documents/Clawsy";

/// Everything the engine needs to reach a gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub auth_token: String,
    #[serde(default)]
    pub ssh_user: Option<String>,
    #[serde(default = "default_ssh_fallback")]
    pub ssh_fallback: bool,
    #[serde(default = "default_shared_folder")]
    pub shared_folder: String,
}

fn default_port() -> u16 {
    DEFAULT_GATEWAY_PORT
}

fn default_ssh_fallback() -> bool {
    true
}

fn default_shared_folder() -> String {
    DEFAULT_SHARED_FOLDER.to_string()
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            auth_token: String::new(),
            ssh_user: None,
            ssh_fallback: default_ssh_fallback(),
            shared_folder: default_shared_folder(),
        }
    }
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            auth_token: auth_token.into(),
            ..Self::default()
        }
    }

    /// Reject configurations that cannot start an attempt.
    pub fn validate(&self) -> NodeResult<()> {
        if self.host.trim().is_empty() {
            return Err(NodeError::Config("gateway host is not set".into()));
        }
        if self.auth_token.trim().is_empty() {
            return Err(NodeError::Config("auth token is not set".into()));
        }
        if self.port == 0 {
            return Err(NodeError::Config("gateway port must be non-zero".into()));
        }
        Ok(())
    }

    /// Host with surrounding whitespace and any `http(s)://` / `ws(s)://` prefix removed.
    pub fn bare_host(&self) -> &str {
        let host = self.host.trim();
        ["https://", "http://", "wss://", "ws://"]
            .iter()
            .find_map(|scheme| host.strip_prefix(scheme))
            .unwrap_or(host)
            .trim_end_matches('/')
    }

    /// Loopback gateways are plain `ws`, everything else `wss`.
    pub fn direct_url(&self) -> String {
        let host = self.bare_host();
        let scheme = if is_loopback(host) { "ws" } else { "wss" };
        format!("{scheme}://{host}:{}", self.port)
    }

    /// SSH user, treating blank as unset.
    pub fn ssh_user(&self) -> Option<&str> {
        self.ssh_user
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
    }
}

/// URL of the local end of the SSH tunnel.
pub fn tunnel_url(local_port: u16) -> String {
    format!("ws://127.0.0.1:{local_port}")
}

fn is_loopback(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1")
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest.trim_start_matches('/'));
        }
    }
    PathBuf::from(path)
}
