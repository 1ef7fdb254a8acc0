//! `xfer config` – print the effective configuration.

use anyhow::{Context, Result};
use xfer_core::config::{self, XferConfig};

pub fn run_config(cfg: &XferConfig) -> Result<()> {
    let path = config::config_path()?;
    let toml = toml::to_string_pretty(cfg).context("serialize config")?;
    println!("# {}", path.display());
    print!("{}", toml);
    Ok(())
}
