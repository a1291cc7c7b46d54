// src/engine/mod.rs

//! Orchestration engine for taskwarden.
//!
//! The pure state machine lives in [`core`] ([`Scheduler`]): it owns the
//! task store, triggers, queue, dispatcher and the active runs, and turns
//! events into [`CoreCommand`]s without doing any IO. The async shell in
//! [`runtime`] reads [`RuntimeEvent`]s, ticks the scheduler and carries out
//! its commands. [`control`] is the request/reply surface external layers
//! use through a [`SchedulerHandle`].

use nix::sys::signal::Signal;
use serde::Serialize;
use uuid::Uuid;

use crate::types::TaskId;

pub mod control;
pub mod core;
pub mod dispatcher;
pub mod queue;
pub mod run;
pub mod runtime;

pub use control::{ControlRequest, SchedulerHandle};
pub use core::{PsSnapshot, Scheduler, StatusSnapshot};
pub use dispatcher::{Dispatcher, compute_ceiling};
pub use queue::RunQueue;
pub use run::{Run, RunState, RunTask};
pub use runtime::Runtime;

/// Events flowing into the runtime from workers, signal handlers and the
/// control surface.
#[derive(Debug)]
pub enum RuntimeEvent {
    /// A worker spawned its process.
    RunStarted { run_id: Uuid, pid: u32 },
    /// A worker's process exited (-1 when killed by a signal).
    RunCompleted { run_id: Uuid, exit_code: i32 },
    /// A worker could not run its process at all.
    RunFailed { run_id: Uuid, error: String },
    /// Graceful shutdown requested; live children receive `signal`.
    ShutdownRequested { signal: Signal },
    /// A request from a [`SchedulerHandle`].
    Control(ControlRequest),
}

/// Command produced by the core, to be executed by the IO shell.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Start these runs (already marked running).
    Spawn(Vec<Run>),
    /// Deliver `signal` to these child pids.
    Signal { pids: Vec<u32>, signal: Signal },
}

/// Result of handling one event or tick.
#[derive(Debug, Clone)]
pub struct CoreStep {
    pub commands: Vec<CoreCommand>,
    /// False once a shutdown is in progress and no workers remain.
    pub keep_running: bool,
}

/// Notifications published to subscribers of a [`SchedulerHandle`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum LifecycleEvent {
    /// The run's process was spawned; carries its pid.
    #[serde(rename = "worker.start")]
    WorkerStart(Run),
    #[serde(rename = "worker.complete")]
    WorkerComplete(Run),
    #[serde(rename = "queue.new")]
    QueueNew { run_id: Uuid, task: String },
    /// Task id or collection name.
    #[serde(rename = "task.updated")]
    TaskUpdated(String),
    /// Task id or collection name.
    #[serde(rename = "task.deleted")]
    TaskDeleted(String),
    #[serde(rename = "dependent.failed")]
    DependentFailed { task_id: TaskId, upstream: TaskId },
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::WorkerStart(_) => "worker.start",
            LifecycleEvent::WorkerComplete(_) => "worker.complete",
            LifecycleEvent::QueueNew { .. } => "queue.new",
            LifecycleEvent::TaskUpdated(_) => "task.updated",
            LifecycleEvent::TaskDeleted(_) => "task.deleted",
            LifecycleEvent::DependentFailed { .. } => "dependent.failed",
        }
    }
}
