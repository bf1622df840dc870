//! CLI subcommand implementations.

pub mod id;
pub mod keygen;
pub mod run;
pub mod send;
pub mod show_config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::debug;

use clawsy_node::{DeviceIdentity, KeyStore, NodeEngine, NodeHandle, NodeOptions, NodeServices};

use crate::approval::ConsoleApprover;
use crate::config::Config;
use crate::provider::CommandProvider;

/// Time left after an unanswered prompt to run the command or answer the denial.
const PROMPT_MARGIN: Duration = Duration::from_secs(10);

/// Key store for the configured (or default) key path.
pub fn keystore(cfg: &Config) -> Result<KeyStore> {
    match cfg.key_path() {
        Some(path) => Ok(KeyStore::new(path)),
        None => KeyStore::default_location().context("failed to locate the device key"),
    }
}

/// The device identity: persisted unless the config asks for a throwaway key.
pub fn load_identity(cfg: &Config) -> Result<DeviceIdentity> {
    if cfg.identity.ephemeral {
        debug!("using an ephemeral device key");
        return Ok(DeviceIdentity::generate());
    }
    let store = keystore(cfg)?;
    store
        .load_or_generate()
        .with_context(|| format!("failed to load device key from {}", store.path().display()))
}

/// Spawn a node engine wired to the console approver and command provider.
pub fn spawn_node(cfg: &Config, identity: DeviceIdentity) -> NodeHandle {
    let options = NodeOptions::default();
    let prompt_timeout = options.command_timeout.saturating_sub(PROMPT_MARGIN);
    let services = NodeServices::new(
        Arc::new(CommandProvider::new(cfg.capabilities.clone())),
        Arc::new(ConsoleApprover::new(prompt_timeout)),
    );
    NodeEngine::spawn(cfg.connection(), identity, options, services)
}
