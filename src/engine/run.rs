// src/engine/run.rs

//! A single execution of a task (or of an ad-hoc command).

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::errors::{Result, WardenError};
use crate::task::Task;
use crate::types::TaskId;

/// Lifecycle state of a [`Run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Queued,
    Running,
    Complete,
}

/// What to execute, frozen at enqueue time.
///
/// Later edits to the task do not affect runs already created from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunTask {
    /// `None` for ad-hoc commands.
    pub id: Option<TaskId>,
    pub collection: Option<String>,
    pub command: String,
    pub cwd: Option<String>,
    pub env: BTreeMap<String, String>,
}

impl RunTask {
    pub fn from_task(task: &Task) -> Self {
        Self {
            id: Some(task.id.clone()),
            collection: Some(task.collection.clone()),
            command: task.command.clone(),
            cwd: task.cwd.clone(),
            env: task.env.clone(),
        }
    }

    pub fn ad_hoc(command: impl Into<String>) -> Self {
        Self {
            id: None,
            collection: None,
            command: command.into(),
            cwd: None,
            env: BTreeMap::new(),
        }
    }

    /// Task id, or the command itself for ad-hoc runs.
    pub fn label(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.command)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Run {
    pub id: Uuid,
    pub task: RunTask,
    pub state: RunState,
    pub pid: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    /// Why the run could not be executed, if it failed before exiting.
    pub error: Option<String>,
}

impl Run {
    pub fn new(task: RunTask) -> Self {
        Self {
            id: Uuid::new_v4(),
            task,
            state: RunState::Queued,
            pid: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            exit_code: None,
            error: None,
        }
    }

    pub fn for_task(task: &Task) -> Self {
        Self::new(RunTask::from_task(task))
    }

    pub fn ad_hoc(command: impl Into<String>) -> Self {
        Self::new(RunTask::ad_hoc(command))
    }

    /// Queued -> Running.
    pub fn start(&mut self) -> Result<()> {
        if self.state != RunState::Queued {
            return Err(self.bad_transition("start"));
        }
        self.state = RunState::Running;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn set_pid(&mut self, pid: u32) {
        self.pid = Some(pid);
    }

    /// Running -> Complete.
    pub fn complete(&mut self, exit_code: i32) -> Result<()> {
        if self.state != RunState::Running {
            return Err(self.bad_transition("complete"));
        }
        self.state = RunState::Complete;
        self.exit_code = Some(exit_code);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Complete with exit code -1 and a reason.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<()> {
        self.complete(-1)?;
        self.error = Some(reason.into());
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.state == RunState::Complete
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Time between start and completion (or now, while running).
    pub fn duration(&self) -> Option<Duration> {
        let start = self.started_at?;
        let end = self.completed_at.unwrap_or_else(Utc::now);
        (end - start).to_std().ok()
    }

    /// Duration for log lines, e.g. `2m 3.120s`.
    pub fn duration_human(&self) -> String {
        match self.duration() {
            Some(d) => format_duration(d),
            None => "-".to_string(),
        }
    }

    fn bad_transition(&self, action: &str) -> WardenError {
        WardenError::InvalidTransition(format!(
            "cannot {action} run {} in state {:?}",
            self.id, self.state
        ))
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let millis = d.subsec_millis();
    match (secs / 3600, (secs % 3600) / 60, secs % 60) {
        (0, 0, s) => format!("{s}.{millis:03}s"),
        (0, m, s) => format!("{m}m {s}.{millis:03}s"),
        (h, m, s) => format!("{h}h {m}m {s}s"),
    }
}
