//! `clawsy config [--init]`: print the effective configuration.

use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::config::Config;

pub fn run(cfg: &Config, path: &Path, init: bool) -> Result<()> {
    if init {
        if path.exists() {
            bail!("{} already exists", path.display());
        }
        cfg.save(path)?;
        info!(path = %path.display(), "wrote config");
    }

    let shown = toml::to_string_pretty(&cfg.redacted()).context("failed to serialize config")?;
    println!("# {}", path.display());
    print!("{shown}");
    Ok(())
}
