//! `clawsy keygen [--force]`: create or replace the persistent device key.

use anyhow::{bail, Context, Result};
use tracing::info;

use clawsy_core::short_id;
use clawsy_node::auth::encode_b64url;

use crate::config::Config;

pub fn run(cfg: &Config, force: bool) -> Result<()> {
    let store = super::keystore(cfg)?;

    if store.exists() && !force {
        bail!(
            "a device key already exists at {} (use --force to replace it; the gateway will see a new device)",
            store.path().display()
        );
    }

    let identity = store
        .regenerate()
        .with_context(|| format!("failed to write device key to {}", store.path().display()))?;

    info!(device = short_id(identity.device_id()), "device key generated");

    println!("Generated device key at {}", store.path().display());
    println!("  Device ID:  {}", identity.device_id());
    println!("  Public key: {}", encode_b64url(&identity.public_key_raw()));

    Ok(())
}
