//! TOML settings loading.
//!
//! Provides three entry points:
//! - `load_settings(path)` - Parse and validate a settings file
//! - `load_or_init(path)` - Same, writing the embedded template first if the file is missing
//! - `save_settings(path, settings)` - Persist settings back to disk

use std::path::{Path, PathBuf};

use tracing::info;

use super::settings::Settings;
use crate::error::{AgentError, Result};

/// Settings template embedded in the binary at compile time.
/// Loaded from `config/printwatch.toml`.
const SETTINGS_TEMPLATE: &str = include_str!("../../config/printwatch.toml");

/// Environment variable that overrides the settings file location.
pub const CONFIG_ENV_VAR: &str = "PRINTWATCH_CONFIG";

/// Resolve the settings file path: `$PRINTWATCH_CONFIG`, else
/// `<config dir>/printwatch/settings.toml`, else `./settings.toml`.
pub fn default_settings_path() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    dirs::config_dir()
        .map(|d| d.join("printwatch").join("settings.toml"))
        .unwrap_or_else(|| PathBuf::from("settings.toml"))
}

/// Parse settings from TOML text, normalizing thresholds and validating.
pub fn parse_settings(content: &str) -> Result<Settings> {
    let mut settings: Settings = toml::from_str(content)
        .map_err(|e| AgentError::Config(format!("Invalid settings TOML: {}", e)))?;
    settings.normalize();
    settings.validate()?;
    Ok(settings)
}

/// Load settings from a TOML file at the given path.
pub fn load_settings(path: &Path) -> Result<Settings> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| AgentError::Config(format!("Failed to read {:?}: {}", path, e)))?;
    let settings = parse_settings(&content)?;
    info!("Loaded settings from {:?}", path);
    Ok(settings)
}

/// Load settings, creating the file from the embedded template when absent.
pub fn load_or_init(path: &Path) -> Result<Settings> {
    if !path.exists() {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, SETTINGS_TEMPLATE)?;
        info!("Wrote default settings to {:?}", path);
    }
    load_settings(path)
}

/// Write settings to `path` as TOML, creating parent directories.
pub fn save_settings(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(settings)
        .map_err(|e| AgentError::Config(format!("Failed to serialize settings: {}", e)))?;
    std::fs::write(path, content)?;
    info!("Saved settings to {:?}", path);
    Ok(())
}
