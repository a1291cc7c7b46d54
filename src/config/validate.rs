// src/config/validate.rs

use serde_json::Value;

use crate::config::model::{Config, RawConfig};
use crate::errors::{Result, WardenError};
use crate::types::ID_SEPARATOR;

/// Lower bound for the poll loop; anything faster just burns CPU.
const MIN_POLL_INTERVAL_MS: u64 = 10;

impl TryFrom<RawConfig> for Config {
    type Error = WardenError;

    fn try_from(raw: RawConfig) -> std::result::Result<Self, Self::Error> {
        validate_config(&raw)?;
        Ok(Config::new_unchecked(raw))
    }
}

/// Check the invariants that the rest of the daemon relies on.
pub fn validate_config(cfg: &RawConfig) -> Result<()> {
    if !cfg.worker_to_cpu_ratio.is_finite() || cfg.worker_to_cpu_ratio <= 0.0 {
        return Err(WardenError::Validation(format!(
            "worker_to_cpu_ratio must be a positive number (got {})",
            cfg.worker_to_cpu_ratio
        )));
    }

    if cfg.poll_interval_ms < MIN_POLL_INTERVAL_MS {
        return Err(WardenError::Validation(format!(
            "poll_interval_ms must be >= {MIN_POLL_INTERVAL_MS} (got {})",
            cfg.poll_interval_ms
        )));
    }

    let collection = cfg.default_collection.trim();
    if collection.is_empty() || collection.contains(ID_SEPARATOR) {
        return Err(WardenError::Validation(format!(
            "default_collection must be a non-empty name without '{ID_SEPARATOR}' (got {:?})",
            cfg.default_collection
        )));
    }

    if parse_level(&cfg.log.level).is_none() {
        return Err(WardenError::Validation(format!(
            "log.level must be one of error, warn, info, debug, trace (got {:?})",
            cfg.log.level
        )));
    }

    Ok(())
}

impl Config {
    /// Return a copy of this config with one top-level key replaced.
    ///
    /// `value` arrives as text (e.g. from a query string) and is coerced:
    /// `"true"`/`"false"` become booleans, numerals become numbers, anything
    /// else stays a string. Nested sections such as `log` cannot be set.
    pub fn with_value(&self, key: &str, value: &str) -> Result<Config> {
        let mut doc = serde_json::to_value(self.raw())?;
        let Value::Object(map) = &mut doc else {
            return Err(WardenError::Validation("config is not an object".to_string()));
        };

        match map.get(key) {
            None => {
                return Err(WardenError::Validation(format!(
                    "unknown configuration key '{key}'"
                )));
            }
            Some(Value::Object(_)) => {
                return Err(WardenError::Validation(format!(
                    "configuration section '{key}' cannot be set directly"
                )));
            }
            Some(_) => {}
        }

        map.insert(key.to_string(), coerce_value(value));

        let raw: RawConfig = serde_json::from_value(doc).map_err(|e| {
            WardenError::Validation(format!("invalid value {value:?} for '{key}': {e}"))
        })?;
        Config::try_from(raw)
    }
}

fn coerce_value(value: &str) -> Value {
    match value.trim() {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        trimmed => {
            if let Ok(n) = trimmed.parse::<i64>() {
                return Value::from(n);
            }
            match trimmed.parse::<f64>() {
                Ok(f) if f.is_finite() => Value::from(f),
                _ => Value::String(value.to_string()),
            }
        }
    }
}

/// Parse a textual log level.
pub fn parse_level(s: &str) -> Option<tracing::Level> {
    match s.trim().to_lowercase().as_str() {
        "error" => Some(tracing::Level::ERROR),
        "warn" | "warning" => Some(tracing::Level::WARN),
        "info" => Some(tracing::Level::INFO),
        "debug" => Some(tracing::Level::DEBUG),
        "trace" => Some(tracing::Level::TRACE),
        _ => None,
    }
}
