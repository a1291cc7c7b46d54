// src/types.rs

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Canonical task id type: `<collection>.<name>`.
pub type TaskId = String;

/// Separator between collection and task name in a task id.
pub const ID_SEPARATOR: char = '.';

/// Build a task id from its collection and name.
pub fn task_id(collection: &str, name: &str) -> TaskId {
    format!("{collection}{ID_SEPARATOR}{name}")
}

/// Split a task id into `(collection, name)` at the first dot.
pub fn split_task_id(id: &str) -> Option<(&str, &str)> {
    id.split_once(ID_SEPARATOR)
}

/// Whether a lookup filter names a single task (as opposed to a collection).
pub fn is_task_id(filter: &str) -> bool {
    filter.contains(ID_SEPARATOR)
}

/// What happens to the dependents of a task whose run exits non-zero.
///
/// - `Withhold`: dependents are simply not triggered (default).
/// - `Cascade`: every registered transitive dependent is reported as failed
///   for this completion. Nothing is enqueued either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    Withhold,
    Cascade,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        FailurePolicy::Withhold
    }
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "withhold" => Ok(FailurePolicy::Withhold),
            "cascade" => Ok(FailurePolicy::Cascade),
            other => Err(format!(
                "invalid failure_policy: {other} (expected \"withhold\" or \"cascade\")"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_uses_first_dot_only() {
        assert_eq!(split_task_id("florida.task1"), Some(("florida", "task1")));
        assert_eq!(split_task_id("a.b.c"), Some(("a", "b.c")));
        assert_eq!(split_task_id("nodot"), None);
    }

    #[test]
    fn failure_policy_parses_case_insensitively() {
        assert_eq!("Cascade".parse::<FailurePolicy>(), Ok(FailurePolicy::Cascade));
        assert_eq!(" withhold ".parse::<FailurePolicy>(), Ok(FailurePolicy::Withhold));
        assert!("explode".parse::<FailurePolicy>().is_err());
    }
}
