//! Application configuration

use super::default_data_dir;
use crate::config::migration::Migrate;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Config schema version
    pub version: u32,

    /// Data directory path
    pub data_dir: PathBuf,

    /// Logging level
    pub log_level: String,

    /// Sync engine tuning; absent in v0 files, filled by migration
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Backoff and retry tuning for the sync engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// First retry delay in seconds
    pub backoff_base_secs: u64,

    /// Multiplier applied per attempt
    pub backoff_factor: u32,

    /// Upper bound on a single retry delay in seconds
    pub backoff_cap_secs: u64,

    /// Automatic attempts before a record is parked
    pub max_auto_attempts: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            backoff_base_secs: 5,
            backoff_factor: 2,
            backoff_cap_secs: 30,
            max_auto_attempts: 5,
        }
    }
}

impl SyncConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_secs(self.backoff_base_secs)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_secs(self.backoff_cap_secs)
    }
}

impl AppConfig {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let data_dir = default_data_dir()?;
        Self::load_from(&data_dir)
    }

    /// Load configuration from a specific data directory
    pub fn load_from(data_dir: &PathBuf) -> Result<Self> {
        let config_path = data_dir.join("aegis.json");

        if config_path.exists() {
            info!("Loading config from {:?}", config_path);
            let json = fs::read_to_string(&config_path)?;
            let mut config: AppConfig = serde_json::from_str(&json)?;

            // Apply migrations if needed
            if config.version < Self::target_version() {
                info!(
                    "Migrating config from v{} to v{}",
                    config.version,
                    Self::target_version()
                );
                config.migrate()?;
                config.save()?;
            }

            Ok(config)
        } else {
            warn!("No config found, creating default at {:?}", config_path);
            let config = Self::default_with_dir(data_dir.clone());
            config.save()?;
            Ok(config)
        }
    }

    /// Create default configuration with specific data directory
    pub fn default_with_dir(data_dir: PathBuf) -> Self {
        Self {
            version: Self::target_version(),
            data_dir,
            log_level: "info".to_string(),
            sync: SyncConfig::default(),
        }
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        // Ensure directory exists
        fs::create_dir_all(&self.data_dir)?;

        let config_path = self.data_dir.join("aegis.json");
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&config_path, json)?;
        info!("Saved config to {:?}", config_path);
        Ok(())
    }

    /// Get the path of the queue database
    pub fn queue_db_path(&self) -> PathBuf {
        self.data_dir.join("queue.db")
    }

    /// Get the directory uploaded attachments are copied into
    pub fn attachments_dir(&self) -> PathBuf {
        self.data_dir.join("attachments")
    }

    /// Ensure all required directories exist
    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir)?;
        fs::create_dir_all(self.attachments_dir())?;
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        let data_dir = default_data_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::default_with_dir(data_dir)
    }
}

impl Migrate for AppConfig {
    fn current_version(&self) -> u32 {
        self.version
    }

    fn target_version() -> u32 {
        1 // Current schema version
    }

    fn migrate(&mut self) -> Result<()> {
        match self.version {
            0 => {
                // v0 predates the sync section; defaults apply
                self.sync = SyncConfig::default();
                self.version = 1;
                Ok(())
            }
            1 => Ok(()), // Already at target version
            v => Err(anyhow!("Unknown config version: {}", v)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn round_trips_through_disk() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::default_with_dir(dir.path().to_path_buf());
        config.save().unwrap();

        let loaded = AppConfig::load_from(&dir.path().to_path_buf()).unwrap();
        assert_eq!(loaded.version, config.version);
        assert_eq!(loaded.sync.backoff_base_secs, 5);
        assert_eq!(loaded.sync.max_auto_attempts, 5);
    }

    #[test]
    fn creates_default_when_missing() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::load_from(&dir.path().to_path_buf()).unwrap();
        assert_eq!(config.version, AppConfig::target_version());
        assert!(dir.path().join("aegis.json").exists());
    }

    #[test]
    fn migrates_v0_config_without_a_sync_section() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("aegis.json");
        let v0 = serde_json::json!({
            "version": 0,
            "data_dir": dir.path(),
            "log_level": "debug",
        });
        fs::write(&config_path, v0.to_string()).unwrap();

        let loaded = AppConfig::load_from(&dir.path().to_path_buf()).unwrap();
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.log_level, "debug");
        assert_eq!(loaded.sync.max_auto_attempts, 5);

        // The migrated file is rewritten at the current version.
        let rewritten: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&config_path).unwrap()).unwrap();
        assert_eq!(rewritten["version"], 1);
        assert_eq!(rewritten["sync"]["backoff_base_secs"], 5);
    }
}
