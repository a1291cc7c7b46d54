// src/exec/worker.rs

//! Runs a single [`Run`] as a child process.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::engine::{Run, RuntimeEvent};
use crate::errors::{Result, WardenError};

/// Working directory used when a run does not name one.
pub const DEFAULT_CWD: &str = ".";

/// Log context attached to every output line of a run.
#[derive(Debug, Clone)]
struct IoContext {
    run_id: Uuid,
    task: String,
    collection: String,
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Run one worker to completion and report the outcome.
///
/// Never panics and never returns an error: anything that goes wrong is
/// logged and reported as `RunFailed`.
pub async fn run_worker(run: Run, runtime_tx: mpsc::Sender<RuntimeEvent>) {
    let run_id = run.id;
    let label = run.task.label().to_string();

    if let Err(err) = run_worker_inner(&run, &runtime_tx).await {
        error!(
            runid = %run_id,
            taskid = %label,
            kind = err.kind(),
            error = %err,
            "worker error"
        );
        let _ = runtime_tx
            .send(RuntimeEvent::RunFailed {
                run_id,
                error: err.to_string(),
            })
            .await;
    }
}

/// Check that the working directory exists and is a directory.
pub async fn resolve_cwd(cwd: Option<&str>) -> Result<PathBuf> {
    let path = Path::new(cwd.unwrap_or(DEFAULT_CWD));
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => Ok(path.to_path_buf()),
        Ok(_) => Err(WardenError::Configuration(format!(
            "working directory {} is not a directory",
            path.display()
        ))),
        Err(err) => Err(WardenError::Configuration(format!(
            "working directory {}: {err}",
            path.display()
        ))),
    }
}

async fn run_worker_inner(run: &Run, runtime_tx: &mpsc::Sender<RuntimeEvent>) -> Result<()> {
    let cwd = resolve_cwd(run.task.cwd.as_deref()).await?;

    info!(
        runid = %run.id,
        taskid = %run.task.label(),
        cmd = %run.task.command,
        cwd = %cwd.display(),
        "starting worker process"
    );

    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(&run.task.command)
        .current_dir(&cwd)
        .envs(&run.task.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn()?;

    if let Some(pid) = child.id() {
        runtime_tx
            .send(RuntimeEvent::RunStarted { run_id: run.id, pid })
            .await
            .map_err(|_| WardenError::ChannelClosed)?;
    }

    let ctx = IoContext {
        run_id: run.id,
        task: run.task.label().to_string(),
        collection: run.task.collection.clone().unwrap_or_default(),
    };

    let stdout = child
        .stdout
        .take()
        .map(|out| tokio::spawn(pump_lines(out, ctx.clone(), Stream::Stdout)));
    let stderr = child
        .stderr
        .take()
        .map(|err| tokio::spawn(pump_lines(err, ctx.clone(), Stream::Stderr)));

    // Drain both streams before reporting the exit.
    if let Some(handle) = stdout {
        let _ = handle.await;
    }
    if let Some(handle) = stderr {
        let _ = handle.await;
    }
    let status = child.wait().await?;

    let exit_code = status.code().unwrap_or(-1);
    debug!(
        runid = %run.id,
        taskid = %run.task.label(),
        exit_code,
        success = status.success(),
        "worker process exited"
    );

    runtime_tx
        .send(RuntimeEvent::RunCompleted {
            run_id: run.id,
            exit_code,
        })
        .await
        .map_err(|_| WardenError::ChannelClosed)
}

async fn pump_lines<R>(reader: R, ctx: IoContext, stream: Stream)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                warn!(
                    runid = %ctx.run_id,
                    taskid = %ctx.task,
                    error = %err,
                    "failed to read worker output"
                );
                break;
            }
        }
        // Output is not guaranteed to be UTF-8.
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\n', '\r']);
        match stream {
            Stream::Stdout => info!(
                runid = %ctx.run_id,
                taskid = %ctx.task,
                collection = %ctx.collection,
                worker_io = "stdout",
                "{line}"
            ),
            Stream::Stderr => error!(
                runid = %ctx.run_id,
                taskid = %ctx.task,
                collection = %ctx.collection,
                worker_io = "stderr",
                "{line}"
            ),
        }
    }
}
