// src/logging.rs

//! Logging setup for `taskwarden` using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the log level:
//! 1. `--log-level` CLI flag (if provided)
//! 2. `TASKWARDEN_LOG` environment variable (e.g. "info", "debug")
//! 3. `log.level` from the configuration file
//!
//! Without `log.path`, human-readable records go to STDERR. With it, records
//! are appended to that file as JSON lines; worker output lines carry the
//! `runid`, `taskid`, `collection` and `worker_io` fields.

use std::fs::OpenOptions;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::fmt;

use crate::cli::LogLevel;
use crate::config::LogConfig;
use crate::config::validate::parse_level;

/// Environment variable overriding the configured log level.
pub const LOG_ENV_VAR: &str = "TASKWARDEN_LOG";

/// Initialise global logging subscriber.
///
/// Safe to call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>, log: &LogConfig) -> Result<()> {
    let level = resolve_level(
        cli_level,
        std::env::var(LOG_ENV_VAR).ok().as_deref(),
        &log.level,
    );

    match &log.path {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {:?}", path))?;

            fmt()
                .json()
                .flatten_event(true)
                .with_max_level(level)
                .with_target(true)
                .with_current_span(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            // Keep stdout free for dry-run output.
            fmt()
                .with_max_level(level)
                .with_target(true)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_writer(std::io::stderr)
                .init();
        }
    }

    Ok(())
}

fn resolve_level(
    cli_level: Option<LogLevel>,
    env_level: Option<&str>,
    config_level: &str,
) -> tracing::Level {
    match cli_level {
        Some(lvl) => level_from_log_level(lvl),
        None => env_level
            .and_then(parse_level)
            .or_else(|| parse_level(config_level))
            .unwrap_or(tracing::Level::INFO),
    }
}

fn level_from_log_level(lvl: LogLevel) -> tracing::Level {
    match lvl {
        LogLevel::Error => tracing::Level::ERROR,
        LogLevel::Warn => tracing::Level::WARN,
        LogLevel::Info => tracing::Level::INFO,
        LogLevel::Debug => tracing::Level::DEBUG,
        LogLevel::Trace => tracing::Level::TRACE,
    }
}
