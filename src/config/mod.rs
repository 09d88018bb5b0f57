//! Application configuration

pub mod app_config;
pub mod migration;

pub use app_config::{AppConfig, SyncConfig};

use anyhow::{anyhow, Result};
use std::path::PathBuf;

/// Default data directory for queue database, config and attachments
pub fn default_data_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|dir| dir.join("aegis"))
        .ok_or_else(|| anyhow!("Could not determine platform data directory"))
}
