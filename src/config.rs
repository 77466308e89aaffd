use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    pub telegram_token: String,

    /// How far a site's next_update_at is pushed after each update.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Pause between scheduler cycles.
    #[serde(default = "default_idle_sleep")]
    pub idle_sleep_secs: u64,

    /// Pause after a failed cycle before trying again.
    #[serde(default = "default_error_cooldown")]
    pub error_cooldown_secs: u64,

    #[serde(default = "default_catalog_sync_hours")]
    pub catalog_sync_hours: u64,

    /// When true, unclassified cycle errors are logged and suppressed instead
    /// of terminating the process.
    #[serde(default)]
    pub suppress_errors: bool,
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stack-watcher");
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("watcher.db").to_string_lossy().to_string()
}

fn default_poll_interval() -> u64 {
    300
}

fn default_idle_sleep() -> u64 {
    4
}

fn default_error_cooldown() -> u64 {
    60
}

fn default_catalog_sync_hours() -> u64 {
    24
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Err(AppError::Config(format!(
                "config file {} not found; create it with at least telegram_token set",
                config_path.display()
            )));
        }
        let content = std::fs::read_to_string(config_path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("stack-watcher")
            .join("config.toml")
    }
}
