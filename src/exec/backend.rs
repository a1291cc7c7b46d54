// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The runtime hands started runs to an `ExecutorBackend` instead of
//! spawning processes itself, so tests can swap in a fake that reports
//! completions without touching the OS.
//!
//! - `RealExecutorBackend` spawns one [`worker`](super::worker) per run.
//! - Test backends record runs and emit `RunStarted`/`RunCompleted` events
//!   directly.

use std::future::Future;
use std::pin::Pin;

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::engine::{Run, RuntimeEvent};
use crate::errors::Result;

use super::worker::run_worker;

/// Trait abstracting how runs are executed.
pub trait ExecutorBackend: Send {
    /// Start executing the given runs.
    ///
    /// Implementations report back through `RuntimeEvent::RunStarted`,
    /// `RunCompleted` and `RunFailed`.
    fn spawn_runs(&mut self, runs: Vec<Run>) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Deliver `signal` to child processes.
    fn signal(&mut self, pids: &[u32], signal: Signal) {
        for &pid in pids {
            let Ok(raw) = i32::try_from(pid) else {
                warn!(pid, "pid out of range; not signalling");
                continue;
            };
            match kill(Pid::from_raw(raw), signal) {
                Ok(()) => debug!(pid, %signal, "signal sent"),
                Err(err) => warn!(pid, %signal, error = %err, "failed to signal worker"),
            }
        }
    }
}

/// Real executor backend used in production.
pub struct RealExecutorBackend {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
}

impl RealExecutorBackend {
    /// Create a backend whose workers report to `runtime_tx`.
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>) -> Self {
        Self { runtime_tx }
    }
}

impl ExecutorBackend for RealExecutorBackend {
    fn spawn_runs(&mut self, runs: Vec<Run>) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.runtime_tx.clone();

        Box::pin(async move {
            for run in runs {
                tokio::spawn(run_worker(run, tx.clone()));
            }
            Ok(())
        })
    }
}
