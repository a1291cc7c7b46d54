// src/engine/queue.rs

use std::collections::VecDeque;

use tracing::debug;
use uuid::Uuid;

use super::run::Run;
use crate::types::is_task_id;

/// FIFO backlog of runs waiting for a free worker slot.
///
/// Runs are dispatched strictly in the order they were pushed. The queue is
/// in-memory only; it does not survive a restart.
#[derive(Debug, Default)]
pub struct RunQueue {
    runs: VecDeque<Run>,
}

impl RunQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn push(&mut self, run: Run) {
        debug!(runid = %run.id, task = %run.task.label(), "run queued");
        self.runs.push_back(run);
    }

    pub fn pop(&mut self) -> Option<Run> {
        self.runs.pop_front()
    }

    pub fn contains(&self, run_id: Uuid) -> bool {
        self.runs.iter().any(|r| r.id == run_id)
    }

    /// Remove queued runs matching `filter`, returning how many were removed.
    ///
    /// - `None` empties the queue.
    /// - A task id (contains a dot) removes runs of that task.
    /// - Anything else is a collection name and removes runs of every task in
    ///   that collection.
    ///
    /// Ad-hoc runs only go away when the whole queue is cleared.
    pub fn clear(&mut self, filter: Option<&str>) -> usize {
        let before = self.runs.len();

        match filter {
            None => self.runs.clear(),
            Some(f) if is_task_id(f) => {
                self.runs.retain(|r| r.task.id.as_deref() != Some(f));
            }
            Some(collection) => {
                self.runs
                    .retain(|r| r.task.collection.as_deref() != Some(collection));
            }
        }

        let removed = before - self.runs.len();
        debug!(filter = ?filter, removed, "queue cleared");
        removed
    }

    /// Labels of queued runs in order: the task id, or the command for
    /// ad-hoc runs.
    pub fn present_task_ids(&self) -> Vec<String> {
        self.runs.iter().map(|r| r.task.label().to_string()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Run> {
        self.runs.iter()
    }
}
