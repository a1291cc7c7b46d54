// src/engine/runtime.rs

use std::fmt;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{self, Interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::errors::Result;
use crate::exec::ExecutorBackend;
use crate::persist::Persistence;

use super::control;
use super::core::Scheduler;
use super::{CoreCommand, CoreStep, LifecycleEvent, RuntimeEvent};

/// Poll period while waiting for workers to exit during shutdown.
pub const SHUTDOWN_POLL: Duration = Duration::from_millis(250);

/// Drives the [`Scheduler`] from `RuntimeEvent`s and a ticker, and delegates
/// process execution to an `ExecutorBackend`.
///
/// This is the IO shell around the scheduler: it reads the event channel,
/// answers control requests, publishes lifecycle events and spawns runs.
pub struct Runtime<E: ExecutorBackend> {
    core: Scheduler,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    executor: E,
    events: broadcast::Sender<LifecycleEvent>,
    persistence: Option<Persistence>,
}

impl<E: ExecutorBackend> fmt::Debug for Runtime<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .field("persistence", &self.persistence)
            .finish_non_exhaustive()
    }
}

fn ticker(period: Duration) -> Interval {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

impl<E: ExecutorBackend> Runtime<E> {
    pub fn new(
        core: Scheduler,
        event_rx: mpsc::Receiver<RuntimeEvent>,
        executor: E,
        events: broadcast::Sender<LifecycleEvent>,
    ) -> Self {
        Self {
            core,
            event_rx,
            executor,
            events,
            persistence: None,
        }
    }

    /// Use `persistence` for load/save requests and auto-save.
    pub fn with_persistence(mut self, persistence: Persistence) -> Self {
        self.persistence = Some(persistence);
        self
    }

    fn period(&self) -> Duration {
        if self.core.is_shutting_down() {
            SHUTDOWN_POLL
        } else {
            self.core.config().poll_interval()
        }
    }

    /// Main event loop.
    ///
    /// - Consumes `RuntimeEvent`s from `event_rx`.
    /// - Ticks the scheduler every poll interval (timers and dispatch).
    /// - Executes the commands returned by the scheduler.
    ///
    /// Returns once a shutdown was requested and every worker has finished.
    pub async fn run(mut self) -> Result<()> {
        info!(name = %self.core.config().name, "taskwarden runtime started");

        let mut period = self.period();
        let mut interval = ticker(period);

        loop {
            let step = tokio::select! {
                maybe_event = self.event_rx.recv() => match maybe_event {
                    Some(event) => self.handle_event(event),
                    None => {
                        info!("runtime event channel closed; exiting");
                        break;
                    }
                },
                _ = interval.tick() => self.core.tick(Utc::now()),
            };

            self.publish_events();

            let keep_running = step.keep_running;
            for command in step.commands {
                self.execute_command(command).await?;
            }

            if !keep_running {
                info!("All workers complete. Exiting");
                break;
            }

            let wanted = self.period();
            if wanted != period {
                debug!(?wanted, "tick period changed");
                period = wanted;
                interval = ticker(period);
            }
        }

        Ok(())
    }

    fn handle_event(&mut self, event: RuntimeEvent) -> CoreStep {
        match event {
            RuntimeEvent::Control(request) => {
                control::apply(&mut self.core, self.persistence.as_ref(), request)
            }
            other => {
                debug!(event = ?other, "runtime received event");
                self.core.step(other)
            }
        }
    }

    fn publish_events(&mut self) {
        for event in self.core.drain_events() {
            debug!(event = event.name(), "lifecycle event");
            // No subscribers is fine.
            let _ = self.events.send(event);
        }
    }

    async fn execute_command(&mut self, command: CoreCommand) -> Result<()> {
        match command {
            CoreCommand::Spawn(runs) => {
                let ids: Vec<_> = runs.iter().map(|r| r.id).collect();
                debug!(?ids, "spawning runs");
                self.executor.spawn_runs(runs).await
            }
            CoreCommand::Signal { pids, signal } => {
                info!(?pids, %signal, "signalling workers");
                self.executor.signal(&pids, signal);
                Ok(())
            }
        }
    }
}
