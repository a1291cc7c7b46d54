#![allow(dead_code)]

use serde_json::{Map, Value, json};
use taskwarden::config::{Config, RawConfig};
use taskwarden::task::{CollectionConfig, CollectionDef, TaskDef};
use taskwarden::types::FailurePolicy;

/// Builder for `TaskDef` to simplify test setup.
pub struct TaskDefBuilder {
    def: TaskDef,
}

impl TaskDefBuilder {
    pub fn new(command: &str) -> Self {
        Self {
            def: TaskDef::new().with("command", command),
        }
    }

    /// Task name, optionally `collection.name`.
    pub fn name(mut self, name: &str) -> Self {
        self.def.set("name", name);
        self
    }

    pub fn collection(mut self, collection: &str) -> Self {
        self.def.set("collection", collection);
        self
    }

    pub fn cwd(mut self, cwd: &str) -> Self {
        self.def.set("cwd", cwd);
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        let mut env = match self.def.0.remove("env") {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        env.insert(key.to_string(), Value::from(value));
        self.def.set("env", Value::Object(env));
        self
    }

    pub fn time(mut self, cron: &str) -> Self {
        self.def.set("trigger", json!({ "time": cron }));
        self
    }

    pub fn after(mut self, task_id: &str) -> Self {
        self.def.set("trigger", json!({ "after": task_id }));
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.def.set("enabled", enabled);
        self
    }

    pub fn description(mut self, text: &str) -> Self {
        self.def.set("description", text);
        self
    }

    pub fn build(self) -> TaskDef {
        self.def
    }
}

/// Builder for `CollectionDef`.
pub struct CollectionDefBuilder {
    def: CollectionDef,
}

impl CollectionDefBuilder {
    pub fn new(collection: &str) -> Self {
        Self {
            def: CollectionDef {
                collection: collection.to_string(),
                ..CollectionDef::default()
            },
        }
    }

    pub fn default_value(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.def.defaults.insert(key.to_string(), value.into());
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.def.config = CollectionConfig { enabled };
        self
    }

    pub fn with_task(mut self, name: &str, task: TaskDef) -> Self {
        self.def.tasks.insert(name.to_string(), task);
        self
    }

    pub fn build(self) -> CollectionDef {
        self.def
    }
}

/// Builder for a validated `Config`.
pub struct ConfigBuilder {
    raw: RawConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            raw: RawConfig {
                poll_interval_ms: 20,
                ..RawConfig::default()
            },
        }
    }

    pub fn ratio(mut self, ratio: f64) -> Self {
        self.raw.worker_to_cpu_ratio = ratio;
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.raw.poll_interval_ms = ms;
        self
    }

    pub fn paused(mut self, paused: bool) -> Self {
        self.raw.pause = paused;
        self
    }

    pub fn auto_save(mut self, auto_save: bool) -> Self {
        self.raw.auto_save = auto_save;
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.raw.failure_policy = policy;
        self
    }

    pub fn build(self) -> Config {
        Config::try_from(self.raw).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
