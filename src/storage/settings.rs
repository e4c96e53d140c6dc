//! Settings storage
//!
//! Loads and saves the [`StatsConfig`] kept in the application data directory.

use crate::storage::{get_data_dir, read_json, write_json_atomic, StorageError};
use crate::types::config::StatsConfig;
use std::path::{Path, PathBuf};

/// Get the settings file path
pub fn get_settings_path() -> Result<PathBuf, StorageError> {
    Ok(get_data_dir()?.join("settings.json"))
}

/// Load settings from disk
///
/// Returns default settings if the file doesn't exist or is corrupted
pub fn load_settings() -> StatsConfig {
    let loaded = get_settings_path().and_then(|path| load_settings_from(&path));
    match loaded {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!("Failed to load settings, using defaults: {}", e);
            StatsConfig::default()
        }
    }
}

/// Load and validate settings from `path`
pub fn load_settings_from(path: &Path) -> Result<StatsConfig, StorageError> {
    let Some(mut settings) = read_json::<StatsConfig>(path)? else {
        tracing::info!("Settings file not found, using defaults");
        return Ok(StatsConfig::default());
    };

    settings.validate();

    tracing::debug!("Loaded settings from {}", path.display());
    Ok(settings)
}

/// Save settings to disk
pub fn save_settings(settings: &StatsConfig) -> Result<(), StorageError> {
    save_settings_to(&get_settings_path()?, settings)
}

pub fn save_settings_to(path: &Path, settings: &StatsConfig) -> Result<(), StorageError> {
    write_json_atomic(path, settings)?;
    tracing::debug!("Saved settings to {}", path.display());
    Ok(())
}
