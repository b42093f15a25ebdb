//! Config loading and data-directory resolution.

use std::fs;
use std::path::PathBuf;

use crate::types::EngineConfig;

/// Directory holding the config file and the default database.
pub fn data_dir() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or("Could not find home directory")?;
    Ok(home.join(".studiolink"))
}

/// Load configuration from `~/.studiolink/config.json`.
///
/// A missing file yields the defaults; a present but malformed or invalid
/// file is an error so a typo never silently reverts the learning policy.
pub fn load_config() -> Result<EngineConfig, String> {
    let config_path = data_dir()?.join("config.json");
    if !config_path.exists() {
        log::info!(
            "No config at {}, using default learning policy",
            config_path.display()
        );
        return Ok(EngineConfig::default());
    }
    load_config_from(&config_path)
}

/// Load and validate configuration from an explicit path.
pub fn load_config_from(path: &std::path::Path) -> Result<EngineConfig, String> {
    let content =
        fs::read_to_string(path).map_err(|e| format!("Failed to read config: {}", e))?;

    let config: EngineConfig =
        serde_json::from_str(&content).map_err(|e| format!("Failed to parse config: {}", e))?;

    config
        .validate()
        .map_err(|e| format!("Invalid config {}: {}", path.display(), e))?;

    Ok(config)
}

/// Resolve the database path: config override or `~/.studiolink/studiolink.db`.
pub fn database_path(config: &EngineConfig) -> Result<PathBuf, String> {
    match config.database_path {
        Some(ref p) if !p.trim().is_empty() => Ok(PathBuf::from(p)),
        _ => Ok(data_dir()?.join("studiolink.db")),
    }
}
