// src/task/validate.rs

//! Turning raw definitions into tasks, and checking the dependency graph.

use std::collections::{BTreeMap, BTreeSet};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::errors::{Result, WardenError};
use crate::task::model::{Task, TaskDef, Trigger};
use crate::types::{ID_SEPARATOR, split_task_id, task_id};

/// Typed view of a merged definition.
#[derive(Debug, Deserialize)]
struct TaskFields {
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    cwd: Option<String>,
    #[serde(default)]
    env: Option<BTreeMap<String, String>>,
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    trigger: Option<Trigger>,
    #[serde(default)]
    description: Option<String>,
}

/// Identity fixed by the caller (the path of an update, or the key in a
/// bulk collection definition).
#[derive(Debug, Clone, Copy)]
pub struct FixedIdentity<'a> {
    pub collection: &'a str,
    pub name: Option<&'a str>,
}

/// Check a collection or task name: non-empty, no dot, no slash, no spaces.
pub fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(WardenError::Validation(format!("{kind} name must not be empty")));
    }
    if name.contains(ID_SEPARATOR) || name.contains('/') || name.contains(char::is_whitespace) {
        return Err(WardenError::Validation(format!(
            "{kind} name '{name}' must not contain '{ID_SEPARATOR}', '/' or whitespace"
        )));
    }
    Ok(())
}

/// Work out `(collection, name)` for a definition.
///
/// Order of precedence: an explicit `collection` key, the dot prefix of
/// `name`, then `default_collection`. A fixed identity must agree with
/// whatever the definition says.
pub fn resolve_identity(
    def: &TaskDef,
    fixed: Option<FixedIdentity<'_>>,
    default_collection: &str,
) -> Result<(String, String)> {
    let raw_name = match (def.get_str("name"), fixed.and_then(|f| f.name)) {
        (Some(n), _) => n.trim().to_string(),
        (None, Some(n)) => n.to_string(),
        (None, None) => {
            return Err(WardenError::Validation(
                "task definition requires a name".to_string(),
            ));
        }
    };

    let explicit_collection = def.get_str("collection").map(|c| c.trim().to_string());

    let (collection, name) = match (explicit_collection, split_task_id(&raw_name)) {
        (Some(c), Some((prefix, rest))) => {
            if prefix != c {
                return Err(WardenError::Validation(format!(
                    "task name '{raw_name}' does not belong to collection '{c}'"
                )));
            }
            (c, rest.to_string())
        }
        (Some(c), None) => (c, raw_name),
        (None, Some((prefix, rest))) => (prefix.to_string(), rest.to_string()),
        (None, None) => match fixed {
            Some(f) => (f.collection.to_string(), raw_name),
            None => (default_collection.to_string(), raw_name),
        },
    };

    if let Some(f) = fixed {
        if f.collection != collection {
            return Err(WardenError::Validation(format!(
                "task '{collection}.{name}' cannot be defined in collection '{}'",
                f.collection
            )));
        }
        if let Some(expected) = f.name {
            if expected != name {
                return Err(WardenError::Validation(format!(
                    "task name '{name}' does not match '{expected}'"
                )));
            }
        }
    }

    validate_name("collection", &collection)?;
    validate_name("task", &name)?;

    Ok((collection, name))
}

/// Merge collection defaults with a definition and parse the result.
///
/// Merging is shallow and happens on the JSON objects: every key of `def`
/// replaces the default of the same key, including explicit `null`s.
pub fn build_task(
    collection: &str,
    name: &str,
    defaults: &Map<String, Value>,
    def: &TaskDef,
) -> Result<Task> {
    let id = task_id(collection, name);

    let mut own = def.clone();
    own.remove("name");
    own.remove("collection");

    let mut merged = defaults.clone();
    merged.remove("name");
    merged.remove("collection");
    for (key, value) in own.0.iter() {
        merged.insert(key.clone(), value.clone());
    }

    let fields: TaskFields = serde_json::from_value(Value::Object(merged))
        .map_err(|e| WardenError::Validation(format!("task {id}: {e}")))?;

    let command = match fields.command {
        Some(c) if !c.trim().is_empty() => c,
        _ => {
            return Err(WardenError::Validation(format!(
                "task {id}: a command is required"
            )));
        }
    };

    let cwd = fields.cwd.filter(|c| !c.trim().is_empty());

    Ok(Task {
        id,
        name: name.to_string(),
        collection: collection.to_string(),
        command,
        cwd,
        env: fields.env.unwrap_or_default(),
        trigger: fields.trigger,
        enabled: fields.enabled.unwrap_or(true),
        description: fields.description,
        definition: own,
    })
}

/// Validate the `after` references of a complete task set.
///
/// `tasks` is the set as it would look after a change; `candidates` are the
/// ids being created or replaced by that change. Every `after` must name a
/// task in the set, never the task itself, and the graph must be acyclic.
pub fn validate_dependencies(tasks: &[&Task], candidates: &BTreeSet<&str>) -> Result<()> {
    let ids: BTreeSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();

    for task in tasks {
        let Some(dep) = task.depends_on() else {
            continue;
        };
        if dep == task.id {
            return Err(WardenError::Validation(format!(
                "task '{}' cannot depend on itself in `after`",
                task.id
            )));
        }
        if !ids.contains(dep) {
            if candidates.contains(task.id.as_str()) {
                return Err(WardenError::Validation(format!(
                    "task '{}' has unknown dependency '{}' in `after`",
                    task.id, dep
                )));
            }
            return Err(WardenError::Validation(format!(
                "cannot remove task '{}': task '{}' depends on it",
                dep, task.id
            )));
        }
    }

    // Edge direction: dependency -> dependent.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for id in ids.iter() {
        graph.add_node(id);
    }
    for task in tasks {
        if let Some(dep) = task.depends_on() {
            graph.add_edge(dep, task.id.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(WardenError::Validation(format!(
            "cycle detected in task dependencies involving task '{}'",
            cycle.node_id()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn def(v: Value) -> TaskDef {
        TaskDef::from_value(v).unwrap()
    }

    #[test]
    fn identity_from_dotted_name() {
        let d = def(json!({"name": "foo.delete-me", "command": "echo"}));
        assert_eq!(
            resolve_identity(&d, None, "default").unwrap(),
            ("foo".to_string(), "delete-me".to_string())
        );
    }

    #[test]
    fn identity_falls_back_to_default_collection() {
        let d = def(json!({"name": "test", "command": "echo"}));
        assert_eq!(
            resolve_identity(&d, None, "default").unwrap(),
            ("default".to_string(), "test".to_string())
        );
    }

    #[test]
    fn identity_conflicts_are_rejected() {
        let d = def(json!({"name": "a.x", "collection": "b"}));
        assert!(resolve_identity(&d, None, "default").is_err());

        let d = def(json!({"name": "x", "collection": "b"}));
        let fixed = FixedIdentity {
            collection: "a",
            name: Some("x"),
        };
        assert!(resolve_identity(&d, Some(fixed), "default").is_err());

        let d = def(json!({"command": "echo"}));
        assert!(resolve_identity(&d, None, "default").is_err());
    }

    #[test]
    fn task_fields_win_over_defaults_and_null_clears() {
        let defaults = json!({"cwd": "/var/www/", "env": {"A": "1"}})
            .as_object()
            .cloned()
            .unwrap();

        let t = build_task("c", "t", &defaults, &def(json!({"command": "ls"}))).unwrap();
        assert_eq!(t.cwd.as_deref(), Some("/var/www/"));
        assert_eq!(t.env.get("A").map(String::as_str), Some("1"));

        let t = build_task(
            "c",
            "t",
            &defaults,
            &def(json!({"command": "ls", "cwd": "/tmp", "env": {"B": "2"}})),
        )
        .unwrap();
        assert_eq!(t.cwd.as_deref(), Some("/tmp"));
        assert!(!t.env.contains_key("A"));

        let t = build_task("c", "t", &defaults, &def(json!({"command": "ls", "cwd": null}))).unwrap();
        assert_eq!(t.cwd, None);
    }

    #[test]
    fn missing_command_is_a_validation_error() {
        let err = build_task("c", "t", &Map::new(), &def(json!({"command": "  "}))).unwrap_err();
        assert!(matches!(err, WardenError::Validation(_)));
    }

    fn task(id: &str, after: Option<&str>) -> Task {
        let (c, n) = split_task_id(id).unwrap();
        let mut d = def(json!({"command": "true"}));
        if let Some(a) = after {
            d.set("trigger", json!({"after": a}));
        }
        build_task(c, n, &Map::new(), &d).unwrap()
    }

    #[test]
    fn dependency_checks() {
        let a = task("x.a", None);
        let b = task("x.b", Some("x.a"));
        let ok: BTreeSet<&str> = ["x.b"].into_iter().collect();
        assert!(validate_dependencies(&[&a, &b], &ok).is_ok());

        // Unknown reference from a candidate.
        let err = validate_dependencies(&[&b], &ok).unwrap_err();
        assert!(err.to_string().contains("unknown dependency"));

        // Unknown reference from an untouched task means a removal.
        let err = validate_dependencies(&[&b], &BTreeSet::new()).unwrap_err();
        assert!(err.to_string().contains("cannot remove"));

        // Cycle.
        let a2 = task("x.a", Some("x.b"));
        let err = validate_dependencies(&[&a2, &b], &ok).unwrap_err();
        assert!(err.to_string().contains("cycle"));

        // Self reference.
        let s = task("x.s", Some("x.s"));
        assert!(validate_dependencies(&[&s], &BTreeSet::new()).is_err());
    }
}
