// src/pool/process.rs

//! Subprocess worker: every attempt runs the task payload as a shell command.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::engine::SchedulerHandle;
use crate::errors::Result;
use crate::pool::heartbeat::spawn_heartbeat;
use crate::pool::protocol::{Dispatch, WorkerResult};
use crate::pool::worker::{Worker, WorkerFactory, WorkerFuture};
use crate::types::{DispatchEpoch, Payload, TaskId, WorkerId};

/// How many trailing stderr lines are kept for the failure message.
const STDERR_TAIL: usize = 5;

/// Internal handle for a currently-running attempt.
///
/// - `cancel` asks the runner to kill the process and acknowledge.
/// - `handle` is the Tokio task that is actually running the command.
struct ActiveProcess {
    cancel: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

pub struct ProcessWorker {
    id: WorkerId,
    scheduler: SchedulerHandle,
    active: HashMap<DispatchEpoch, ActiveProcess>,
    heartbeat: Option<JoinHandle<()>>,
}

impl ProcessWorker {
    pub fn start(
        id: impl Into<WorkerId>,
        scheduler: SchedulerHandle,
        heartbeat_interval: Duration,
    ) -> Self {
        let id = id.into();
        let heartbeat = spawn_heartbeat(id.clone(), scheduler.clone(), heartbeat_interval);
        Self {
            id,
            scheduler,
            active: HashMap::new(),
            heartbeat: Some(heartbeat),
        }
    }
}

impl Worker for ProcessWorker {
    fn id(&self) -> &str {
        &self.id
    }

    fn execute(&mut self, dispatch: Dispatch) -> WorkerFuture<'_> {
        self.active.retain(|_, p| !p.handle.is_finished());

        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        let worker = self.id.clone();
        let scheduler = self.scheduler.clone();
        let epoch = dispatch.epoch;

        let handle = tokio::spawn(async move {
            let result = match run_process(&dispatch, &worker, cancel_rx).await {
                Ok(result) => result,
                Err(err) => {
                    error!(
                        worker = %worker,
                        task = %dispatch.task,
                        epoch = dispatch.epoch,
                        error = %err,
                        "task process error"
                    );
                    WorkerResult::failed(&dispatch, &worker, format!("{err:#}"))
                }
            };
            if scheduler.report(result).await.is_err() {
                debug!(worker = %worker, epoch, "scheduler gone; dropping result");
            }
        });

        self.active.insert(
            epoch,
            ActiveProcess {
                cancel: Some(cancel_tx),
                handle,
            },
        );

        Box::pin(async { Ok(()) })
    }

    fn cancel(&mut self, task: TaskId, epoch: DispatchEpoch) -> WorkerFuture<'_> {
        match self.active.get_mut(&epoch).and_then(|p| p.cancel.take()) {
            Some(cancel) => {
                if cancel.send(()).is_err() {
                    debug!(
                        worker = %self.id,
                        task = %task,
                        epoch,
                        "process already finished while cancelling"
                    );
                }
            }
            None => {
                debug!(
                    worker = %self.id,
                    task = %task,
                    epoch,
                    "no cancel sender present; process may already have been cancelled"
                );
            }
        }
        Box::pin(async { Ok(()) })
    }

    fn stop(&mut self) -> WorkerFuture<'_> {
        if let Some(hb) = self.heartbeat.take() {
            hb.abort();
        }
        // Aborting the runner drops the child, and `kill_on_drop` takes it down.
        for (_, process) in self.active.drain() {
            process.handle.abort();
        }
        Box::pin(async { Ok(()) })
    }
}

impl Drop for ProcessWorker {
    fn drop(&mut self) {
        if let Some(hb) = self.heartbeat.take() {
            hb.abort();
        }
    }
}

/// Run one attempt as `sh -c <payload>` and turn its exit into a result.
///
/// Stdout becomes the result payload. A cancel request kills the child and is
/// acknowledged with a `Cancelled` result for the same epoch.
async fn run_process(
    dispatch: &Dispatch,
    worker: &str,
    mut cancel_rx: oneshot::Receiver<()>,
) -> anyhow::Result<WorkerResult> {
    let cmd_line = dispatch.payload.to_text();
    info!(
        worker = %worker,
        task = %dispatch.task,
        epoch = dispatch.epoch,
        attempt = dispatch.attempt,
        cmd = %cmd_line,
        "starting task process"
    );

    // Build a shell command appropriate for the platform.
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(&cmd_line);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(&cmd_line);
        c
    };

    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning process for task '{}'", dispatch.task))?;

    let stdout_task = child.stdout.take().map(|mut stdout| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stdout.read_to_end(&mut buf).await;
            buf
        })
    });

    // Always consume stderr so buffers don't fill; log at debug, keep a tail.
    let stderr_task = child.stderr.take().map(|stderr| {
        let task = dispatch.task.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut tail: Vec<String> = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(task = %task, "stderr: {}", line);
                tail.push(line);
                if tail.len() > STDERR_TAIL {
                    tail.remove(0);
                }
            }
            tail
        })
    });

    tokio::select! {
        status_res = child.wait() => {
            let status = status_res.with_context(|| {
                format!("waiting for process of task '{}'", dispatch.task)
            })?;
            let code = status.code().unwrap_or(-1);

            info!(
                worker = %worker,
                task = %dispatch.task,
                epoch = dispatch.epoch,
                exit_code = code,
                success = status.success(),
                "task process exited"
            );

            let stdout = match stdout_task {
                Some(h) => h.await.unwrap_or_default(),
                None => Vec::new(),
            };

            if status.success() {
                Ok(WorkerResult::succeeded(dispatch, worker, Payload::new(stdout)))
            } else {
                let tail = match stderr_task {
                    Some(h) => h.await.unwrap_or_default(),
                    None => Vec::new(),
                };
                let mut message = format!("exit code {code}");
                if !tail.is_empty() {
                    message.push_str(": ");
                    message.push_str(&tail.join(" | "));
                }
                Ok(WorkerResult::failed(dispatch, worker, message))
            }
        }

        Ok(()) = &mut cancel_rx => {
            info!(
                worker = %worker,
                task = %dispatch.task,
                epoch = dispatch.epoch,
                "cancellation requested for running attempt; killing process"
            );
            if let Err(e) = child.kill().await {
                warn!(
                    worker = %worker,
                    task = %dispatch.task,
                    epoch = dispatch.epoch,
                    error = %e,
                    "failed to kill child process on cancellation"
                );
            }
            Ok(WorkerResult::cancelled(&dispatch.task, dispatch.epoch, worker))
        }
    }
}

/// Spawns [`ProcessWorker`]s.
pub struct ProcessWorkerFactory {
    heartbeat_interval: Duration,
}

impl ProcessWorkerFactory {
    pub fn new(heartbeat_interval: Duration) -> Self {
        Self { heartbeat_interval }
    }
}

impl WorkerFactory for ProcessWorkerFactory {
    fn spawn(&mut self, id: WorkerId, handle: SchedulerHandle) -> Result<Box<dyn Worker>> {
        Ok(Box::new(ProcessWorker::start(
            id,
            handle,
            self.heartbeat_interval,
        )))
    }
}
