use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nix::sys::signal::Signal;
use taskwarden::engine::{Run, RuntimeEvent};
use taskwarden::errors::Result;
use taskwarden::exec::ExecutorBackend;
use tokio::sync::mpsc;

/// A fake executor that:
/// - records the label (task id or command) of every run it is given
/// - reports `RunStarted` with a made-up pid, then `RunCompleted` with the
///   exit code configured for that label (0 by default)
/// - optionally keeps each run "alive" for a fixed delay
/// - records signals instead of delivering them.
///
/// Events are sent from spawned tasks so the runtime never waits on its own
/// channel.
pub struct FakeExecutor {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    executed: Arc<Mutex<Vec<String>>>,
    signalled: Arc<Mutex<Vec<(u32, Signal)>>>,
    exit_codes: HashMap<String, i32>,
    delay: Option<Duration>,
    next_pid: Arc<AtomicU32>,
}

impl FakeExecutor {
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>, executed: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            runtime_tx,
            executed,
            signalled: Arc::new(Mutex::new(Vec::new())),
            exit_codes: HashMap::new(),
            delay: None,
            next_pid: Arc::new(AtomicU32::new(1000)),
        }
    }

    /// Runs labelled `label` exit with `code`.
    pub fn with_exit_code(mut self, label: &str, code: i32) -> Self {
        self.exit_codes.insert(label.to_string(), code);
        self
    }

    /// Keep each run running for `delay` before completing.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Shared record of `(pid, signal)` pairs.
    pub fn signalled(&self) -> Arc<Mutex<Vec<(u32, Signal)>>> {
        Arc::clone(&self.signalled)
    }
}

impl ExecutorBackend for FakeExecutor {
    fn spawn_runs(&mut self, runs: Vec<Run>) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.runtime_tx.clone();
        let executed = Arc::clone(&self.executed);
        let next_pid = Arc::clone(&self.next_pid);
        let exit_codes = self.exit_codes.clone();
        let delay = self.delay;

        Box::pin(async move {
            for run in runs {
                let label = run.task.label().to_string();
                executed.lock().unwrap().push(label.clone());

                let pid = next_pid.fetch_add(1, Ordering::SeqCst);
                let exit_code = exit_codes.get(&label).copied().unwrap_or(0);
                let tx = tx.clone();
                let run_id = run.id;

                tokio::spawn(async move {
                    let _ = tx.send(RuntimeEvent::RunStarted { run_id, pid }).await;
                    if let Some(d) = delay {
                        tokio::time::sleep(d).await;
                    }
                    let _ = tx
                        .send(RuntimeEvent::RunCompleted { run_id, exit_code })
                        .await;
                });
            }
            Ok(())
        })
    }

    fn signal(&mut self, pids: &[u32], signal: Signal) {
        let mut guard = self.signalled.lock().unwrap();
        guard.extend(pids.iter().map(|&pid| (pid, signal)));
    }
}
