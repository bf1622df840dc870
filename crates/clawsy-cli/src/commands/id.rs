//! `clawsy id`: print the device id and public key.

use anyhow::Result;

use clawsy_node::auth::encode_b64url;

use crate::config::Config;

pub fn run(cfg: &Config) -> Result<()> {
    let identity = super::load_identity(cfg)?;

    println!("Device ID:  {}", identity.device_id());
    println!("Public key: {}", encode_b64url(&identity.public_key_raw()));
    if cfg.identity.ephemeral {
        println!("(ephemeral: a new key is generated on every launch)");
    }
    Ok(())
}
