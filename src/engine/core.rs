// src/engine/core.rs

//! Pure scheduler state machine.
//!
//! [`Scheduler`] owns every piece of scheduling state:
//! - the task store and the trigger manager
//! - the run queue and the dispatcher
//! - the set of active runs
//! - the current configuration
//!
//! It has no channels and spawns nothing. Worker notifications go through
//! [`Scheduler::step`], time through [`Scheduler::tick`], and control
//! requests through the plain methods below. Lifecycle events accumulate in
//! an outbox the shell drains with [`Scheduler::drain_events`].

use std::collections::BTreeMap;
use std::mem;

use chrono::{DateTime, Utc};
use nix::sys::signal::Signal;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::engine::dispatcher::Dispatcher;
use crate::engine::queue::RunQueue;
use crate::engine::run::Run;
use crate::engine::{CoreCommand, CoreStep, LifecycleEvent, RuntimeEvent};
use crate::errors::Result;
use crate::task::{CollectionDef, CollectionView, SyncReport, Task, TaskDef, TaskStore};
use crate::trigger::TriggerManager;
use crate::types::{FailurePolicy, TaskId};

/// Point-in-time summary of the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub name: String,
    /// Number of live workers.
    pub workers: usize,
    /// Labels of queued runs, in dispatch order.
    pub queue: Vec<String>,
    /// Task ids with an armed timer.
    pub active_timers: Vec<TaskId>,
    pub is_paused: bool,
    pub max_workers: usize,
    pub collections: Vec<String>,
    pub total_tasks: usize,
}

/// Active runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PsSnapshot {
    pub count: usize,
    pub pids: Vec<u32>,
    pub runs: Vec<Run>,
}

#[derive(Debug)]
pub struct Scheduler {
    config: Config,
    store: TaskStore,
    triggers: TriggerManager,
    queue: RunQueue,
    dispatcher: Dispatcher,
    active: BTreeMap<Uuid, Run>,
    shutting_down: Option<Signal>,
    outbox: Vec<LifecycleEvent>,
}

impl Scheduler {
    pub fn new(config: Config) -> Self {
        let dispatcher = Dispatcher::new(config.worker_to_cpu_ratio);
        Self::with_dispatcher(config, dispatcher)
    }

    /// Construct with an explicit dispatcher (fixed CPU count in tests).
    pub fn with_dispatcher(config: Config, dispatcher: Dispatcher) -> Self {
        Self {
            store: TaskStore::new(config.default_collection.clone()),
            triggers: TriggerManager::new(),
            queue: RunQueue::new(),
            dispatcher,
            active: BTreeMap::new(),
            shutting_down: None,
            outbox: Vec::new(),
            config,
        }
    }

    // ---------- accessors ----------

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    pub fn triggers(&self) -> &TriggerManager {
        &self.triggers
    }

    pub fn queue(&self) -> &RunQueue {
        &self.queue
    }

    /// Store and triggers together, for bulk loading.
    pub fn parts_mut(&mut self) -> (&mut TaskStore, &mut TriggerManager) {
        (&mut self.store, &mut self.triggers)
    }

    pub fn max_workers(&self) -> usize {
        self.dispatcher.ceiling()
    }

    pub fn active_workers(&self) -> usize {
        self.active.len()
    }

    pub fn is_paused(&self) -> bool {
        self.config.pause
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.is_some()
    }

    /// Shutdown has been requested and every worker has finished.
    pub fn is_finished(&self) -> bool {
        self.shutting_down.is_some() && self.active.is_empty()
    }

    /// Take the lifecycle events produced since the last call.
    pub fn drain_events(&mut self) -> Vec<LifecycleEvent> {
        mem::take(&mut self.outbox)
    }

    fn emit(&mut self, event: LifecycleEvent) {
        self.outbox.push(event);
    }

    // ---------- configuration ----------

    /// Apply one `key = value` change and return the new configuration.
    pub fn set_config(&mut self, key: &str, value: &str) -> Result<Config> {
        let updated = self.config.with_value(key, value)?;
        self.replace_config(updated);
        info!(key, value, "configuration updated");
        Ok(self.config.clone())
    }

    pub fn replace_config(&mut self, config: Config) {
        self.dispatcher.set_ratio(config.worker_to_cpu_ratio);
        self.store
            .set_default_collection(config.default_collection.clone());
        if config.pause != self.config.pause {
            info!(paused = config.pause, "dispatch pause toggled");
        }
        self.config = config;
    }

    // ---------- snapshots ----------

    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            name: self.config.name.clone(),
            workers: self.active.len(),
            queue: self.queue.present_task_ids(),
            active_timers: self.triggers.timer_ids(),
            is_paused: self.is_paused(),
            max_workers: self.max_workers(),
            collections: self.store.collection_names(),
            total_tasks: self.store.total_tasks(),
        }
    }

    pub fn ps(&self) -> PsSnapshot {
        PsSnapshot {
            count: self.active.len(),
            pids: self.active.values().filter_map(|r| r.pid).collect(),
            runs: self.active.values().cloned().collect(),
        }
    }

    // ---------- tasks ----------

    pub fn get_task(&self, id: &str) -> Result<Task> {
        self.store.get_task(id).cloned()
    }

    pub fn get_tasks(&self, filter: Option<&str>) -> Result<Vec<CollectionView>> {
        self.store.get_tasks(filter)
    }

    pub fn create_task(&mut self, def: TaskDef) -> Result<Task> {
        let task = self.store.create_task(def, &mut self.triggers)?;
        self.emit(LifecycleEvent::TaskUpdated(task.id.clone()));
        Ok(task)
    }

    pub fn update_task(&mut self, id: &str, def: TaskDef) -> Result<Task> {
        let task = self.store.update_task(id, def, &mut self.triggers)?;
        self.emit(LifecycleEvent::TaskUpdated(task.id.clone()));
        Ok(task)
    }

    pub fn delete_task(&mut self, id: &str) -> Result<Task> {
        let task = self.store.delete_task(id, &mut self.triggers)?;
        self.emit(LifecycleEvent::TaskDeleted(task.id.clone()));
        Ok(task)
    }

    pub fn enable_task(&mut self, id: &str) -> Result<Task> {
        let task = self.store.enable_task(id, &mut self.triggers)?;
        self.emit(LifecycleEvent::TaskUpdated(task.id.clone()));
        Ok(task)
    }

    pub fn disable_task(&mut self, id: &str) -> Result<Task> {
        let task = self.store.disable_task(id, &mut self.triggers)?;
        self.emit(LifecycleEvent::TaskUpdated(task.id.clone()));
        Ok(task)
    }

    // ---------- collections ----------

    pub fn create_collection_and_tasks(&mut self, bulk: CollectionDef) -> Result<SyncReport> {
        self.sync_collection(bulk)
    }

    pub fn update_collection_and_tasks(&mut self, bulk: CollectionDef) -> Result<SyncReport> {
        self.sync_collection(bulk)
    }

    fn sync_collection(&mut self, bulk: CollectionDef) -> Result<SyncReport> {
        let report = self.store.sync_collection(bulk, &mut self.triggers)?;
        for id in report.deleted.iter() {
            self.emit(LifecycleEvent::TaskDeleted(id.clone()));
        }
        self.emit(LifecycleEvent::TaskUpdated(report.collection.clone()));
        Ok(report)
    }

    pub fn get_collection(&self, name: &str) -> Result<CollectionView> {
        Ok(self.store.get_collection(name)?.view())
    }

    pub fn delete_collection(&mut self, name: &str) -> Result<Vec<TaskId>> {
        let ids = self.store.delete_collection(name, &mut self.triggers)?;
        self.emit(LifecycleEvent::TaskDeleted(name.to_string()));
        Ok(ids)
    }

    pub fn get_collection_defaults(&self, name: &str) -> Result<Map<String, Value>> {
        self.store.get_collection_defaults(name).cloned()
    }

    pub fn set_collection_defaults(
        &mut self,
        name: &str,
        defaults: Map<String, Value>,
    ) -> Result<bool> {
        let created = self.store.set_collection_defaults(name, defaults)?;
        self.emit(LifecycleEvent::TaskUpdated(name.to_string()));
        Ok(created)
    }

    pub fn enable_collection(&mut self, name: &str) -> Result<Vec<TaskId>> {
        let ids = self.store.enable_collection(name, &mut self.triggers)?;
        if !ids.is_empty() {
            self.emit(LifecycleEvent::TaskUpdated(name.to_string()));
        }
        Ok(ids)
    }

    pub fn disable_collection(&mut self, name: &str) -> Result<Vec<TaskId>> {
        let ids = self.store.disable_collection(name, &mut self.triggers)?;
        if !ids.is_empty() {
            self.emit(LifecycleEvent::TaskUpdated(name.to_string()));
        }
        Ok(ids)
    }

    // ---------- queue ----------

    /// Enqueue a run of a known task id, or of an ad-hoc shell command.
    ///
    /// Explicit runs ignore the task's enabled flag.
    pub fn run_task(&mut self, target: &str) -> Run {
        let run = match self.store.get_task(target) {
            Ok(task) => Run::for_task(task),
            Err(_) => {
                debug!(command = %target, "no task with this id; running as command");
                Run::ad_hoc(target)
            }
        };
        self.enqueue(run.clone());
        run
    }

    pub fn clear_queue(&mut self, filter: Option<&str>) -> usize {
        self.queue.clear(filter)
    }

    pub fn queue_ids(&self) -> Vec<String> {
        self.queue.present_task_ids()
    }

    fn enqueue(&mut self, run: Run) {
        let event = LifecycleEvent::QueueNew {
            run_id: run.id,
            task: run.task.label().to_string(),
        };
        self.queue.push(run);
        self.emit(event);
    }

    fn enqueue_task(&mut self, id: &str) {
        match self.store.get_task(id) {
            Ok(task) => {
                let run = Run::for_task(task);
                self.enqueue(run);
            }
            Err(_) => warn!(taskid = %id, "triggered task no longer exists"),
        }
    }

    // ---------- time ----------

    /// Fire due timers, then dispatch.
    pub fn tick(&mut self, now: DateTime<Utc>) -> CoreStep {
        for id in self.triggers.due_timers(now) {
            debug!(taskid = %id, "timer fired");
            self.enqueue_task(&id);
        }

        if self.is_shutting_down() && !self.active.is_empty() {
            info!(
                workers = self.active.len(),
                "Still waiting for {} workers to finish",
                self.active.len()
            );
        }

        self.settle(Vec::new())
    }

    /// Move queued runs into free worker slots, unless paused or shutting
    /// down.
    pub fn dispatch(&mut self) -> Vec<Run> {
        if self.is_paused() || self.is_shutting_down() {
            return Vec::new();
        }

        let mut started = Vec::new();
        for mut run in self.dispatcher.assign(&mut self.queue, self.active.len()) {
            if let Err(err) = run.start() {
                error!(runid = %run.id, error = %err, "cannot start run");
                continue;
            }
            info!(
                runid = %run.id,
                taskid = %run.task.label(),
                workers = self.active.len() + 1,
                max_workers = self.max_workers(),
                "run dispatched"
            );
            self.active.insert(run.id, run.clone());
            started.push(run);
        }
        started
    }

    /// Dispatch and wrap up a step.
    pub(crate) fn settle(&mut self, mut commands: Vec<CoreCommand>) -> CoreStep {
        let runs = self.dispatch();
        if !runs.is_empty() {
            commands.push(CoreCommand::Spawn(runs));
        }
        CoreStep {
            commands,
            keep_running: !self.is_finished(),
        }
    }

    // ---------- worker notifications ----------

    /// Handle a worker or shutdown event. Control requests are answered by
    /// the shell and produce an empty step here.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        let mut commands = Vec::new();

        match event {
            RuntimeEvent::RunStarted { run_id, pid } => {
                if let Some(pid) = self.run_started(run_id, pid) {
                    if let Some(signal) = self.shutting_down {
                        commands.push(CoreCommand::Signal {
                            pids: vec![pid],
                            signal,
                        });
                    }
                }
            }
            RuntimeEvent::RunCompleted { run_id, exit_code } => {
                self.run_completed(run_id, exit_code);
            }
            RuntimeEvent::RunFailed { run_id, error } => {
                self.run_failed(run_id, &error);
            }
            RuntimeEvent::ShutdownRequested { signal } => {
                let pids = self.begin_shutdown(signal);
                if !pids.is_empty() {
                    commands.push(CoreCommand::Signal { pids, signal });
                }
            }
            RuntimeEvent::Control(_) => {}
        }

        self.settle(commands)
    }

    /// Record the pid of a started run. Returns the pid when a shutdown is
    /// already in progress, so the caller can signal it.
    pub fn run_started(&mut self, run_id: Uuid, pid: u32) -> Option<u32> {
        let Some(run) = self.active.get_mut(&run_id) else {
            warn!(runid = %run_id, pid, "pid reported for unknown run");
            return None;
        };
        run.set_pid(pid);
        info!(runid = %run_id, taskid = %run.task.label(), pid, "worker started");
        let started = run.clone();
        self.emit(LifecycleEvent::WorkerStart(started));
        self.shutting_down.map(|_| pid)
    }

    /// Mark a run complete and trigger dependents.
    pub fn run_completed(&mut self, run_id: Uuid, exit_code: i32) {
        let Some(mut run) = self.active.remove(&run_id) else {
            warn!(runid = %run_id, exit_code, "completion for unknown run");
            return;
        };
        if let Err(err) = run.complete(exit_code) {
            error!(runid = %run_id, error = %err, "cannot complete run");
            return;
        }

        if exit_code == 0 {
            info!(
                runid = %run.id,
                taskid = %run.task.label(),
                exit_code,
                duration = %run.duration_human(),
                "worker complete"
            );
        } else {
            warn!(
                runid = %run.id,
                taskid = %run.task.label(),
                exit_code,
                duration = %run.duration_human(),
                "worker exited with non-zero code"
            );
        }

        self.finish_run(run);
    }

    /// Mark a run that never got to execute as failed.
    pub fn run_failed(&mut self, run_id: Uuid, reason: &str) {
        let Some(mut run) = self.active.remove(&run_id) else {
            warn!(runid = %run_id, reason, "failure for unknown run");
            return;
        };
        if let Err(err) = run.fail(reason) {
            error!(runid = %run_id, error = %err, "cannot fail run");
            return;
        }
        error!(runid = %run.id, taskid = %run.task.label(), reason, "worker failed");
        self.finish_run(run);
    }

    fn finish_run(&mut self, run: Run) {
        let task_id = run.task.id.clone();
        let exit_code = run.exit_code.unwrap_or(-1);
        self.emit(LifecycleEvent::WorkerComplete(run));

        if let Some(id) = task_id {
            self.on_task_complete(&id, exit_code);
        }
    }

    fn on_task_complete(&mut self, id: &str, exit_code: i32) {
        if exit_code == 0 {
            for dependent in self.triggers.dependents_of(id) {
                debug!(taskid = %dependent, upstream = %id, "dependency satisfied");
                self.enqueue_task(&dependent);
            }
            return;
        }

        match self.config.failure_policy {
            FailurePolicy::Withhold => {
                let withheld = self.triggers.dependents_of(id);
                if !withheld.is_empty() {
                    debug!(upstream = %id, ?withheld, "dependents withheld after failure");
                }
            }
            FailurePolicy::Cascade => {
                for dependent in self.triggers.transitive_dependents(id) {
                    warn!(taskid = %dependent, upstream = %id, "dependent failed");
                    self.emit(LifecycleEvent::DependentFailed {
                        task_id: dependent,
                        upstream: id.to_string(),
                    });
                }
            }
        }
    }

    // ---------- shutdown ----------

    /// Stop dispatching and return the pids of live children to signal.
    pub fn begin_shutdown(&mut self, signal: Signal) -> Vec<u32> {
        if self.shutting_down.is_none() {
            info!(%signal, workers = self.active.len(), "shutdown requested");
        }
        self.shutting_down = Some(signal);
        self.active.values().filter_map(|r| r.pid).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RawConfig;
    use serde_json::json;

    fn scheduler(cpus: usize) -> Scheduler {
        let config = Config::try_from(RawConfig {
            worker_to_cpu_ratio: 1.0,
            ..RawConfig::default()
        })
        .unwrap();
        Scheduler::with_dispatcher(config, Dispatcher::with_cpus(cpus, 1.0))
    }

    fn def(v: Value) -> TaskDef {
        TaskDef::from_value(v).unwrap()
    }

    fn spawned(step: &CoreStep) -> Vec<Run> {
        step.commands
            .iter()
            .flat_map(|c| match c {
                CoreCommand::Spawn(runs) => runs.clone(),
                _ => Vec::new(),
            })
            .collect()
    }

    #[test]
    fn success_enqueues_dependents_and_failure_does_not() {
        let mut s = scheduler(4);
        s.create_task(def(json!({"name": "c.a", "command": "true"})))
            .unwrap();
        s.create_task(def(
            json!({"name": "c.b", "command": "true", "trigger": {"after": "c.a"}}),
        ))
        .unwrap();

        let run = s.run_task("c.a");
        let step = s.tick(Utc::now());
        assert_eq!(spawned(&step).len(), 1);

        let step = s.step(RuntimeEvent::RunCompleted {
            run_id: run.id,
            exit_code: 0,
        });
        let next = spawned(&step);
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].task.id.as_deref(), Some("c.b"));

        let run = s.run_task("c.a");
        s.tick(Utc::now());
        s.step(RuntimeEvent::RunCompleted {
            run_id: next[0].id,
            exit_code: 0,
        });
        let step = s.step(RuntimeEvent::RunCompleted {
            run_id: run.id,
            exit_code: 2,
        });
        assert!(spawned(&step).is_empty());
        assert!(s.queue().is_empty());
    }

    #[test]
    fn worker_start_waits_for_a_pid() {
        let mut s = scheduler(2);
        let spawned_ok = s.run_task("echo ok");
        let never_spawned = s.run_task("echo never");
        s.tick(Utc::now());
        s.drain_events();

        s.step(RuntimeEvent::RunFailed {
            run_id: never_spawned.id,
            error: "no such directory".to_string(),
        });
        s.step(RuntimeEvent::RunStarted {
            run_id: spawned_ok.id,
            pid: 4242,
        });

        let started: Vec<Run> = s
            .drain_events()
            .into_iter()
            .filter_map(|e| match e {
                LifecycleEvent::WorkerStart(run) => Some(run),
                _ => None,
            })
            .collect();
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].id, spawned_ok.id);
        assert_eq!(started[0].pid, Some(4242));
    }

    #[test]
    fn pause_holds_the_queue() {
        let mut s = scheduler(2);
        s.set_config("pause", "true").unwrap();
        s.run_task("echo hi");
        assert!(spawned(&s.tick(Utc::now())).is_empty());
        assert_eq!(s.status().queue, vec!["echo hi".to_string()]);

        s.set_config("pause", "false").unwrap();
        assert_eq!(spawned(&s.tick(Utc::now())).len(), 1);
        assert_eq!(s.ps().count, 1);
    }

    #[test]
    fn shutdown_signals_live_and_late_workers() {
        let mut s = scheduler(2);
        let a = s.run_task("sleep 10");
        let b = s.run_task("sleep 10");
        s.tick(Utc::now());
        s.step(RuntimeEvent::RunStarted {
            run_id: a.id,
            pid: 100,
        });

        let step = s.step(RuntimeEvent::ShutdownRequested {
            signal: Signal::SIGTERM,
        });
        assert!(step.keep_running);
        assert!(matches!(
            &step.commands[..],
            [CoreCommand::Signal { pids, .. }] if pids == &vec![100]
        ));

        // Pid arriving after the shutdown started gets signalled too.
        let step = s.step(RuntimeEvent::RunStarted {
            run_id: b.id,
            pid: 101,
        });
        assert!(matches!(
            &step.commands[..],
            [CoreCommand::Signal { pids, .. }] if pids == &vec![101]
        ));

        s.step(RuntimeEvent::RunCompleted {
            run_id: a.id,
            exit_code: -1,
        });
        let step = s.step(RuntimeEvent::RunCompleted {
            run_id: b.id,
            exit_code: -1,
        });
        assert!(!step.keep_running);
    }

    #[test]
    fn cascade_reports_transitive_dependents() {
        let mut s = scheduler(1);
        s.set_config("failure_policy", "cascade").unwrap();
        s.create_task(def(json!({"name": "c.a", "command": "false"})))
            .unwrap();
        s.create_task(def(
            json!({"name": "c.b", "command": "true", "trigger": {"after": "c.a"}}),
        ))
        .unwrap();
        s.create_task(def(
            json!({"name": "c.c", "command": "true", "trigger": {"after": "c.b"}}),
        ))
        .unwrap();
        s.drain_events();

        let run = s.run_task("c.a");
        s.tick(Utc::now());
        s.step(RuntimeEvent::RunFailed {
            run_id: run.id,
            error: "bad cwd".into(),
        });

        let failed: Vec<String> = s
            .drain_events()
            .into_iter()
            .filter_map(|e| match e {
                LifecycleEvent::DependentFailed { task_id, .. } => Some(task_id),
                _ => None,
            })
            .collect();
        assert_eq!(failed, vec!["c.b".to_string(), "c.c".to_string()]);
        assert!(s.queue().is_empty());
    }
}
