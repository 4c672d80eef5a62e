// src/engine/handle.rs

//! Client and worker entry points into a running scheduler.

use tokio::sync::{mpsc, oneshot};

use crate::dag::{TaskSnapshot, TaskSpec};
use crate::engine::snapshot::MetricsSnapshot;
use crate::engine::{Command, Message, Query, TimerKey};
use crate::errors::{Result, SchedulerError};
use crate::pool::{Worker, WorkerLink, WorkerResult};
use crate::types::{ShutdownMode, TaskId};

/// Cloneable handle to the scheduler.
///
/// Every call becomes a message on the scheduler's single ordered channel.
/// Once the scheduler has stopped, every call fails with
/// [`SchedulerError::SchedulerShutdown`].
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<Message>,
}

impl SchedulerHandle {
    pub fn new(tx: mpsc::Sender<Message>) -> Self {
        Self { tx }
    }

    async fn send(&self, message: Message) -> Result<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| SchedulerError::SchedulerShutdown)
    }

    /// Send a command and wait until the core has processed it.
    async fn command(&self, command: Command) -> Result<()> {
        let (ack, rx) = oneshot::channel();
        self.send(Message::Command {
            command,
            ack: Some(ack),
        })
        .await?;
        rx.await.map_err(|_| SchedulerError::SchedulerShutdown)?
    }

    /// Send a command without waiting for it to be processed.
    pub(crate) async fn notify(&self, command: Command) -> Result<()> {
        self.send(Message::Command { command, ack: None }).await
    }

    /// Deliver an expired timer.
    pub(crate) async fn fire(&self, key: TimerKey) -> Result<()> {
        self.send(Message::Timer(key)).await
    }

    async fn query<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Query) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.send(Message::Query(build(reply))).await?;
        rx.await.map_err(|_| SchedulerError::SchedulerShutdown)
    }

    /// Submit a task. Fails with `DuplicateTaskId`, `CyclicDependency` or
    /// `SchedulerShutdown`; a rejected submission leaves no trace.
    pub async fn submit(&self, spec: TaskSpec) -> Result<()> {
        self.command(Command::Submit(spec)).await
    }

    pub async fn status(&self, task: impl Into<TaskId>) -> Result<TaskSnapshot> {
        let task = task.into();
        self.query(|reply| Query::Status { task, reply }).await?
    }

    /// Cancel a task. Resolves once the request is recorded; a running task
    /// becomes `Cancelled` when its worker acknowledges or the grace period
    /// ends.
    pub async fn cancel(&self, task: impl Into<TaskId>) -> Result<()> {
        self.command(Command::CancelRequested { task: task.into() })
            .await
    }

    pub async fn metrics(&self) -> Result<MetricsSnapshot> {
        self.query(|reply| Query::Metrics { reply }).await
    }

    /// Set the pool size; clamped to `[min_workers, max_workers]`.
    pub async fn scale_to(&self, workers: usize) -> Result<()> {
        self.command(Command::ScaleRequested { target: workers })
            .await
    }

    /// Wait until nothing is queued, running or backing off.
    pub async fn wait_idle(&self) -> Result<()> {
        self.query(|reply| Query::WaitIdle { reply }).await?
    }

    pub async fn shutdown(&self, mode: ShutdownMode) -> Result<()> {
        self.command(Command::Shutdown { mode }).await
    }

    /// Hand a worker built elsewhere (e.g. a remote peer) to the pool.
    pub async fn register_worker(&self, worker: Box<dyn Worker>) -> Result<()> {
        self.send(Message::Attach(WorkerLink(worker))).await
    }

    pub async fn heartbeat(&self, worker: &str) -> Result<()> {
        self.notify(Command::Heartbeat {
            worker: worker.to_string(),
            timestamp: tokio::time::Instant::now().into_std(),
        })
        .await
    }

    pub async fn report(&self, result: WorkerResult) -> Result<()> {
        self.notify(Command::ResultReported(result)).await
    }
}
