//! Config file operations

use crate::error::Result;
use crate::types::AppConfig;
use std::fs;
use std::path::{Path, PathBuf};

pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("beat-scheduler")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

pub fn load_config() -> AppConfig {
    load_config_from(&config_path())
}

/// Lenient load: a missing or unreadable file yields the defaults.
pub fn load_config_from(path: &Path) -> AppConfig {
    if !path.exists() {
        return AppConfig::default();
    }

    match try_load_config_from(path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(path = %path.display(), "ignoring unreadable config: {}", e);
            AppConfig::default()
        }
    }
}

/// Strict load for paths the user named explicitly.
pub fn try_load_config_from(path: &Path) -> Result<AppConfig> {
    let json = fs::read_to_string(path)?;
    let config: AppConfig = serde_json::from_str(&json)?;
    config.policy.validate()?;
    Ok(config)
}

pub fn save_config(config: &AppConfig) -> Result<()> {
    save_config_to(&config_path(), config)
}

pub fn save_config_to(path: &Path, config: &AppConfig) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }

    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json)?;
    tracing::debug!(path = %path.display(), "config saved");

    Ok(())
}
