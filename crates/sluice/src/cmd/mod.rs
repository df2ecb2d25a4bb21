//! CLI subcommands

pub mod check;
pub mod fallback;
pub mod simulate;

use std::path::Path;

use anyhow::{Context, Result};
use sluice_config::Config;

/// Load and validate a config file, or fall back to defaults
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(Config::default()),
    }
}
