//! Configuration file loading.
//!
//! The gateway reads one JSON file addressed by `LINKGATE_CONFIG_PATH`
//! (default `./config.json`), with the same safety checks the rest of the
//! boot path relies on: the file must live under the working directory and
//! must not be unreasonably large.

use crate::models::settings::Settings;
use log::{debug, warn};
use std::fs;
use std::path::Path;

const MAX_CONFIG_SIZE: u64 = 10 * 1024 * 1024;

/// Loads and parses gateway configuration from the file system.
///
/// # Errors
///
/// Fails when the file is missing, unreadable, outside the working
/// directory, larger than 10 MB, or not valid JSON for [`Settings`].
/// Semantic validation happens separately in
/// [`crate::config::validation::ConfigValidator`].
pub fn load_settings() -> Result<Settings, Box<dyn std::error::Error>> {
    let config_path =
        std::env::var("LINKGATE_CONFIG_PATH").unwrap_or_else(|_| "./config.json".to_string());

    debug!("loading configuration from {}", config_path);

    let path = Path::new(&config_path);
    if !path.exists() {
        return Err(format!("cannot resolve config path '{}'", config_path).into());
    }

    let canonical_path = path
        .canonicalize()
        .map_err(|e| format!("cannot resolve config path '{}': {}", config_path, e))?;

    let current_dir =
        std::env::current_dir().map_err(|e| format!("cannot get current directory: {}", e))?;

    if !canonical_path.starts_with(&current_dir) {
        warn!("config path '{}' is outside the working directory", config_path);
        return Err("config path outside working directory".into());
    }

    let metadata = fs::metadata(&canonical_path)
        .map_err(|e| format!("cannot read config file metadata: {}", e))?;
    if metadata.len() > MAX_CONFIG_SIZE {
        return Err(format!(
            "config file too large: {} bytes (max: {} bytes)",
            metadata.len(),
            MAX_CONFIG_SIZE
        )
        .into());
    }

    let config_data = fs::read_to_string(&canonical_path)
        .map_err(|e| format!("cannot read config file: {}", e))?;

    let settings: Settings =
        serde_json::from_str(&config_data).map_err(|e| format!("invalid JSON: {}", e))?;

    debug!(
        "loaded configuration with {} services",
        settings.services.len()
    );

    Ok(settings)
}
