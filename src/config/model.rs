// src/config/model.rs

use std::ops::Deref;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::FailurePolicy;

/// Daemon configuration as read from a TOML file.
///
/// ```toml
/// name = "taskwarden"
/// tasks_path = "/etc/taskwarden/tasks"
/// auto_save = true
/// pause = false
/// worker_to_cpu_ratio = 1.25
/// poll_interval_ms = 1000
/// default_collection = "default"
/// failure_policy = "withhold"
///
/// [log]
/// path = "/var/log/taskwarden.log"
/// level = "info"
/// ```
///
/// Every key is optional. This type is not validated; use
/// [`Config::try_from`] (see `validate.rs`) to obtain a [`Config`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawConfig {
    /// Instance name, reported in status output.
    pub name: String,

    /// Directory holding one `<collection>.tasks.json` file per collection.
    ///
    /// `None` disables loading and saving.
    pub tasks_path: Option<PathBuf>,

    /// Save every collection after each successful mutation.
    pub auto_save: bool,

    /// Halt dispatch of new workers. Timers keep enqueueing.
    pub pause: bool,

    /// Capacity ceiling = available CPUs × this ratio.
    pub worker_to_cpu_ratio: f64,

    /// Interval of the dispatcher / timer poll loop.
    pub poll_interval_ms: u64,

    /// Collection used for tasks created without one.
    pub default_collection: String,

    /// Dependents handling on non-zero exit.
    pub failure_policy: FailurePolicy,

    pub log: LogConfig,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            name: "taskwarden".to_string(),
            tasks_path: None,
            auto_save: true,
            pause: false,
            worker_to_cpu_ratio: 1.25,
            poll_interval_ms: 1000,
            default_collection: "default".to_string(),
            failure_policy: FailurePolicy::default(),
            log: LogConfig::default(),
        }
    }
}

/// `[log]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// When set, log records are appended to this file as JSON lines.
    pub path: Option<PathBuf>,
    /// `error`, `warn`, `info`, `debug` or `trace`.
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            path: None,
            level: "info".to_string(),
        }
    }
}

/// Validated configuration.
///
/// Read access goes through `Deref` to [`RawConfig`]; changes go through
/// [`Config::with_value`] so they are always re-validated.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Config {
    inner: RawConfig,
}

impl Config {
    /// Construct without validation. Callers must have validated `raw`.
    pub(crate) fn new_unchecked(inner: RawConfig) -> Self {
        Self { inner }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.inner.poll_interval_ms)
    }

    pub fn raw(&self) -> &RawConfig {
        &self.inner
    }

    pub fn into_raw(self) -> RawConfig {
        self.inner
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new_unchecked(RawConfig::default())
    }
}

impl Deref for Config {
    type Target = RawConfig;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
