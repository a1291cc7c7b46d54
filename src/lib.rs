// src/lib.rs

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod persist;
pub mod task;
pub mod trigger;
pub mod types;

use anyhow::Result;
use nix::sys::signal::Signal;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::{Config, resolve_config};
use crate::engine::{Runtime, RuntimeEvent, Scheduler, SchedulerHandle};
use crate::exec::RealExecutorBackend;
use crate::persist::Persistence;

/// Capacity of the runtime event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;
/// Capacity of the lifecycle broadcast channel.
const LIFECYCLE_CHANNEL_CAPACITY: usize = 1024;

/// Resolve the configuration and apply CLI overrides.
pub fn load_config(args: &CliArgs) -> Result<Config> {
    let cfg = resolve_config(args.config.as_deref())?;
    if args.tasks_path.is_none() && !args.paused {
        return Ok(cfg);
    }

    let mut raw = cfg.into_raw();
    if let Some(dir) = &args.tasks_path {
        raw.tasks_path = Some(dir.clone());
    }
    if args.paused {
        raw.pause = true;
    }
    Ok(Config::try_from(raw)?)
}

/// Wire a scheduler into a runtime with the real process executor.
///
/// The returned handle is how external layers talk to the control loop.
pub fn build_runtime(
    scheduler: Scheduler,
    persistence: Option<Persistence>,
) -> (Runtime<RealExecutorBackend>, SchedulerHandle, mpsc::Sender<RuntimeEvent>) {
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(EVENT_CHANNEL_CAPACITY);
    let (events_tx, _) = broadcast::channel(LIFECYCLE_CHANNEL_CAPACITY);

    let executor = RealExecutorBackend::new(rt_tx.clone());
    let handle = SchedulerHandle::new(rt_tx.clone(), events_tx.clone());

    let mut runtime = Runtime::new(scheduler, rt_rx, executor, events_tx);
    if let Some(p) = persistence {
        runtime = runtime.with_persistence(p);
    }
    (runtime, handle, rt_tx)
}

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - task loading from the tasks directory
/// - scheduler / runtime / executor
/// - SIGINT and SIGTERM handling
pub async fn run(args: CliArgs, cfg: Config) -> Result<()> {
    let mut scheduler = Scheduler::new(cfg.clone());
    let persistence = cfg.tasks_path.clone().map(Persistence::on_disk);

    match &persistence {
        Some(p) => {
            let (store, triggers) = scheduler.parts_mut();
            let report = p.load_tasks(store, triggers)?;
            for (path, reason) in report.failed.iter() {
                warn!(file = %path.display(), %reason, "collection file skipped");
            }
        }
        None => info!("no tasks_path configured; starting with an empty task store"),
    }

    if args.dry_run {
        print_dry_run(&scheduler);
        return Ok(());
    }

    let (runtime, _handle, rt_tx) = build_runtime(scheduler, persistence);

    spawn_signal_forwarder(rt_tx)?;

    runtime.run().await?;
    Ok(())
}

/// Forward SIGINT / SIGTERM to the runtime as shutdown requests.
fn spawn_signal_forwarder(tx: mpsc::Sender<RuntimeEvent>) -> Result<()> {
    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        loop {
            let signal = tokio::select! {
                Some(()) = interrupt.recv() => Signal::SIGINT,
                Some(()) = terminate.recv() => Signal::SIGTERM,
                else => break,
            };
            info!(%signal, "received signal");
            if tx
                .send(RuntimeEvent::ShutdownRequested { signal })
                .await
                .is_err()
            {
                break;
            }
        }
    });

    Ok(())
}

/// Simple dry-run output: print collections, tasks and triggers.
fn print_dry_run(scheduler: &Scheduler) {
    let cfg = scheduler.config();
    println!("taskwarden dry-run");
    println!("  name = {}", cfg.name);
    match &cfg.tasks_path {
        Some(dir) => println!("  tasks_path = {}", dir.display()),
        None => println!("  tasks_path = (none)"),
    }
    println!("  max_workers = {}", scheduler.max_workers());
    println!("  paused = {}", cfg.pause);
    println!("  failure_policy = {:?}", cfg.failure_policy);
    println!();

    for collection in scheduler.store().collections() {
        println!(
            "collection {} ({}, {} tasks):",
            collection.name,
            if collection.config.enabled {
                "enabled"
            } else {
                "disabled"
            },
            collection.tasks.len()
        );
        for task in collection.tasks.values() {
            println!("  - {}", task.id);
            println!("      command: {}", task.command);
            if let Some(cwd) = &task.cwd {
                println!("      cwd: {cwd}");
            }
            if let Some(cron) = task.cron() {
                println!("      time: {cron}");
            }
            if let Some(after) = task.depends_on() {
                println!("      after: {after}");
            }
            if !task.enabled {
                println!("      enabled: false");
            }
        }
    }

    debug!("dry-run complete (no execution)");
}
