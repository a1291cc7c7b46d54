// src/task/model.rs

//! Task and collection data model.
//!
//! Definitions arrive as loosely shaped JSON objects ([`TaskDef`]), either
//! from a collection file or from the control surface. They are merged with
//! the collection defaults and parsed exactly once into a typed [`Task`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::TaskId;

/// Raw task definition, as given by the user.
///
/// Known keys: `name`, `collection`, `command`, `cwd`, `env`, `enabled`,
/// `description`, `trigger`. A key explicitly set to `null` overrides the
/// collection default for that key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskDef(pub Map<String, Value>);

impl TaskDef {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Interpret an arbitrary JSON value as a definition.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }
}

/// What causes a task to be enqueued.
///
/// On the wire this is `{"time": "<cron>"}` or `{"after": "<task id>"}`;
/// exactly one of the two keys must be present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTrigger", into = "RawTrigger")]
pub enum Trigger {
    /// Recurring wall-clock schedule.
    Time { cron: String },
    /// Successful completion of another task.
    After { task_id: TaskId },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTrigger {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    after: Option<String>,
}

impl TryFrom<RawTrigger> for Trigger {
    type Error = String;

    fn try_from(raw: RawTrigger) -> Result<Self, Self::Error> {
        match (raw.time, raw.after) {
            (Some(cron), None) => {
                crate::trigger::cron::parse_schedule(&cron).map_err(|e| e.to_string())?;
                Ok(Trigger::Time { cron })
            }
            (None, Some(task_id)) => {
                if task_id.trim().is_empty() {
                    return Err("trigger.after must name a task id".to_string());
                }
                Ok(Trigger::After { task_id })
            }
            (Some(_), Some(_)) => {
                Err("trigger must have exactly one of `time` or `after`, not both".to_string())
            }
            (None, None) => Err("trigger must have one of `time` or `after`".to_string()),
        }
    }
}

impl From<Trigger> for RawTrigger {
    fn from(trigger: Trigger) -> Self {
        match trigger {
            Trigger::Time { cron } => RawTrigger {
                time: Some(cron),
                after: None,
            },
            Trigger::After { task_id } => RawTrigger {
                time: None,
                after: Some(task_id),
            },
        }
    }
}

/// A stored task: the merged, validated form of a [`TaskDef`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub collection: String,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger: Option<Trigger>,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// The task's own definition (without `name`/`collection`), kept so
    /// saving writes back what was given rather than the merged result.
    #[serde(skip)]
    pub(crate) definition: TaskDef,
}

impl Task {
    /// The task id this task waits for, if it has an `after` trigger.
    pub fn depends_on(&self) -> Option<&str> {
        match &self.trigger {
            Some(Trigger::After { task_id }) => Some(task_id.as_str()),
            _ => None,
        }
    }

    /// The cron expression, if it has a `time` trigger.
    pub fn cron(&self) -> Option<&str> {
        match &self.trigger {
            Some(Trigger::Time { cron }) => Some(cron.as_str()),
            _ => None,
        }
    }

    pub fn definition(&self) -> &TaskDef {
        &self.definition
    }

    pub(crate) fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.definition.set("enabled", enabled);
    }
}

/// `config` section of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// A named group of tasks sharing defaults and an enable switch.
#[derive(Debug, Clone, PartialEq)]
pub struct Collection {
    pub name: String,
    pub config: CollectionConfig,
    pub defaults: Map<String, Value>,
    /// Keyed by task name (not id).
    pub tasks: BTreeMap<String, Task>,
}

impl Collection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: CollectionConfig::default(),
            defaults: Map::new(),
            tasks: BTreeMap::new(),
        }
    }

    pub fn view(&self) -> CollectionView {
        CollectionView {
            collection: self.name.clone(),
            defaults: self.defaults.clone(),
            config: self.config,
            tasks: self.tasks.clone(),
        }
    }
}

/// Bulk definition of one collection. This is also the collection file
/// format:
///
/// ```json
/// {
///   "collection": "florida",
///   "defaults": { "cwd": "/var/www/website/" },
///   "config": { "enabled": true },
///   "tasks": {
///     "task1": { "command": "./update-apis", "trigger": { "time": "*/10 * * * *" } },
///     "task2": { "command": "./process-data", "trigger": { "after": "florida.task1" } }
///   }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionDef {
    pub collection: String,
    #[serde(default)]
    pub defaults: Map<String, Value>,
    #[serde(default)]
    pub config: CollectionConfig,
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskDef>,
}

/// Read-only snapshot of a collection, as returned by task listings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionView {
    pub collection: String,
    pub defaults: Map<String, Value>,
    pub config: CollectionConfig,
    pub tasks: BTreeMap<String, Task>,
}
