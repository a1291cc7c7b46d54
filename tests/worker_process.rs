// tests/worker_process.rs

mod common;
use crate::common::builders::{ConfigBuilder, TaskDefBuilder};
use crate::common::init_tracing;

use std::error::Error;
use std::time::Duration;

use taskwarden::engine::{
    Dispatcher, LifecycleEvent, Run, RunTask, Runtime, RuntimeEvent, Scheduler, SchedulerHandle,
};
use taskwarden::exec::{ExecutorBackend, RealExecutorBackend, run_worker};
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;

type TestResult = Result<(), Box<dyn Error>>;

const WAIT: Duration = Duration::from_secs(5);

async fn next_event(rx: &mut mpsc::Receiver<RuntimeEvent>) -> Result<RuntimeEvent, Box<dyn Error>> {
    timeout(WAIT, rx.recv())
        .await?
        .ok_or_else(|| "runtime channel closed".into())
}

#[tokio::test]
async fn worker_reports_pid_then_exit_code() -> TestResult {
    init_tracing();
    let (tx, mut rx) = mpsc::channel(8);
    let run = Run::ad_hoc("echo hello; echo oops >&2; exit 7");
    let run_id = run.id;

    tokio::spawn(run_worker(run, tx));

    match next_event(&mut rx).await? {
        RuntimeEvent::RunStarted { run_id: id, pid } => {
            assert_eq!(id, run_id);
            assert!(pid > 0);
        }
        other => panic!("expected RunStarted, got {other:?}"),
    }
    match next_event(&mut rx).await? {
        RuntimeEvent::RunCompleted { run_id: id, exit_code } => {
            assert_eq!(id, run_id);
            assert_eq!(exit_code, 7);
        }
        other => panic!("expected RunCompleted, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn binary_output_does_not_cut_the_pipe() -> TestResult {
    init_tracing();
    let (tx, mut rx) = mpsc::channel(8);
    // The shell keeps writing after the invalid byte; a closed pipe would kill it.
    let run = Run::ad_hoc(
        r#"printf 'bad \377 byte\n'; i=0; while [ "$i" -lt 2000 ]; do echo "line $i"; i=$((i+1)); done; exit 0"#,
    );

    tokio::spawn(run_worker(run, tx));

    loop {
        if let RuntimeEvent::RunCompleted { exit_code, .. } = next_event(&mut rx).await? {
            assert_eq!(exit_code, 0);
            break;
        }
    }
    Ok(())
}

#[tokio::test]
async fn worker_uses_cwd_and_env() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let (tx, mut rx) = mpsc::channel(8);

    let mut task = RunTask::ad_hoc(r#"printf '%s' "$GREETING" > out.txt"#);
    task.cwd = Some(dir.path().to_string_lossy().into_owned());
    task.env.insert("GREETING".to_string(), "bonjour".to_string());

    let mut backend = RealExecutorBackend::new(tx);
    backend.spawn_runs(vec![Run::new(task)]).await?;

    loop {
        if let RuntimeEvent::RunCompleted { exit_code, .. } = next_event(&mut rx).await? {
            assert_eq!(exit_code, 0);
            break;
        }
    }
    assert_eq!(std::fs::read_to_string(dir.path().join("out.txt"))?, "bonjour");
    Ok(())
}

#[tokio::test]
async fn missing_cwd_fails_the_run_without_spawning() -> TestResult {
    init_tracing();
    let (tx, mut rx) = mpsc::channel(8);
    let mut task = RunTask::ad_hoc("true");
    task.cwd = Some("/no/such/directory/anywhere".to_string());
    let run = Run::new(task);
    let run_id = run.id;

    run_worker(run, tx).await;

    match next_event(&mut rx).await? {
        RuntimeEvent::RunFailed { run_id: id, error } => {
            assert_eq!(id, run_id);
            assert!(error.contains("/no/such/directory/anywhere"));
        }
        other => panic!("expected RunFailed, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn real_processes_drive_a_dependency_chain() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let cwd = dir.path().to_string_lossy().into_owned();

    let (tx, rx) = mpsc::channel(64);
    let (events_tx, _) = broadcast::channel(64);
    let core = Scheduler::with_dispatcher(
        ConfigBuilder::new().ratio(1.0).build(),
        Dispatcher::with_cpus(2, 1.0),
    );
    let runtime = Runtime::new(core, rx, RealExecutorBackend::new(tx.clone()), events_tx.clone());
    let handle = SchedulerHandle::new(tx, events_tx);
    let join = tokio::spawn(runtime.run());

    handle
        .create_task(
            TaskDefBuilder::new("echo one >> log.txt")
                .name("seq.first")
                .cwd(&cwd)
                .build(),
        )
        .await?;
    handle
        .create_task(
            TaskDefBuilder::new("echo two >> log.txt")
                .name("seq.second")
                .cwd(&cwd)
                .after("seq.first")
                .build(),
        )
        .await?;
    handle
        .create_task(
            TaskDefBuilder::new("cd /no/such/place && echo three >> log.txt")
                .name("seq.third")
                .after("seq.second")
                .build(),
        )
        .await?;

    let mut events = handle.subscribe();
    handle.run_task("seq.first").await?;

    let mut done = Vec::new();
    timeout(WAIT, async {
        while done.len() < 3 {
            if let Ok(LifecycleEvent::WorkerComplete(run)) = events.recv().await {
                done.push(run);
            }
        }
    })
    .await?;

    assert_eq!(done[0].exit_code, Some(0));
    assert_eq!(done[1].exit_code, Some(0));
    assert_ne!(done[2].exit_code, Some(0));
    assert_eq!(
        std::fs::read_to_string(dir.path().join("log.txt"))?,
        "one\ntwo\n"
    );

    handle.shutdown().await?;
    timeout(WAIT, join).await???;
    Ok(())
}

#[tokio::test]
async fn shutdown_terminates_long_running_children() -> TestResult {
    init_tracing();
    let (tx, rx) = mpsc::channel(64);
    let (events_tx, _) = broadcast::channel(64);
    let core = Scheduler::with_dispatcher(
        ConfigBuilder::new().ratio(1.0).build(),
        Dispatcher::with_cpus(2, 1.0),
    );
    let runtime = Runtime::new(core, rx, RealExecutorBackend::new(tx.clone()), events_tx.clone());
    let handle = SchedulerHandle::new(tx, events_tx);
    let join = tokio::spawn(runtime.run());

    handle.run_task("exec sleep 30").await?;
    timeout(WAIT, async {
        while handle.ps().await.map(|ps| ps.pids.is_empty()).unwrap_or(true) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;

    handle.shutdown().await?;
    timeout(WAIT, join).await???;
    Ok(())
}
