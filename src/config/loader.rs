// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{Config, RawConfig};
use crate::errors::Result;

/// Environment variable consulted when no `--config` flag is given.
pub const CONFIG_ENV_VAR: &str = "TASKWARDEN_CONFIG";

/// Load a configuration file and return the raw, unvalidated `RawConfig`.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfig> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawConfig = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a configuration file and validate it.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<Config> {
    let raw_config = load_from_path(&path)?;
    let config = Config::try_from(raw_config)?;
    Ok(config)
}

/// Resolve the configuration for this process.
///
/// - An explicit path must exist and be valid.
/// - Otherwise `TASKWARDEN_CONFIG` is treated like an explicit path.
/// - Otherwise `taskwarden.toml` in the working directory is used if present.
/// - Otherwise built-in defaults apply.
pub fn resolve_config(explicit: Option<&Path>) -> Result<Config> {
    if let Some(path) = explicit {
        return load_and_validate(path);
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return load_and_validate(PathBuf::from(path));
        }
    }

    let fallback = default_config_path();
    if fallback.is_file() {
        return load_and_validate(fallback);
    }

    debug!("no config file found; using built-in defaults");
    Ok(Config::default())
}

/// Default config location: `taskwarden.toml` in the working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("taskwarden.toml")
}
