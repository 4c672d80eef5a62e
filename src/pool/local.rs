// src/pool/local.rs

//! In-process worker: runs a [`TaskHandler`] closure on a tokio task.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::engine::SchedulerHandle;
use crate::errors::Result;
use crate::pool::heartbeat::spawn_heartbeat;
use crate::pool::protocol::{Dispatch, WorkerResult};
use crate::pool::worker::{Worker, WorkerFactory, WorkerFuture};
use crate::types::{DispatchEpoch, Payload, TaskId, WorkerId};

pub type HandlerFuture = Pin<Box<dyn Future<Output = std::result::Result<Payload, String>> + Send>>;

/// The function a local worker runs for every dispatch.
pub type TaskHandler = Arc<dyn Fn(Dispatch) -> HandlerFuture + Send + Sync>;

/// Wrap an async closure as a [`TaskHandler`].
pub fn handler<F, Fut>(f: F) -> TaskHandler
where
    F: Fn(Dispatch) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Payload, String>> + Send + 'static,
{
    Arc::new(move |dispatch: Dispatch| -> HandlerFuture { Box::pin(f(dispatch)) })
}

/// Internal handle for a running attempt.
struct ActiveAttempt {
    cancel: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

pub struct LocalWorker {
    id: WorkerId,
    scheduler: SchedulerHandle,
    handler: TaskHandler,
    active: HashMap<DispatchEpoch, ActiveAttempt>,
    heartbeat: Option<JoinHandle<()>>,
}

impl LocalWorker {
    /// Create the worker and start its heartbeat loop.
    pub fn start(
        id: impl Into<WorkerId>,
        scheduler: SchedulerHandle,
        handler: TaskHandler,
        heartbeat_interval: Duration,
    ) -> Self {
        let id = id.into();
        let heartbeat = spawn_heartbeat(id.clone(), scheduler.clone(), heartbeat_interval);
        Self {
            id,
            scheduler,
            handler,
            active: HashMap::new(),
            heartbeat: Some(heartbeat),
        }
    }
}

impl Worker for LocalWorker {
    fn id(&self) -> &str {
        &self.id
    }

    fn execute(&mut self, dispatch: Dispatch) -> WorkerFuture<'_> {
        self.active.retain(|_, a| !a.handle.is_finished());

        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        let worker = self.id.clone();
        let scheduler = self.scheduler.clone();
        let run = (self.handler)(dispatch.clone());
        let epoch = dispatch.epoch;

        let handle = tokio::spawn(async move {
            let result = tokio::select! {
                out = run => match out {
                    Ok(payload) => WorkerResult::succeeded(&dispatch, &worker, payload),
                    Err(error) => WorkerResult::failed(&dispatch, &worker, error),
                },
                Ok(()) = &mut cancel_rx => {
                    info!(worker = %worker, task = %dispatch.task, epoch, "attempt cancelled");
                    WorkerResult::cancelled(&dispatch.task, dispatch.epoch, &worker)
                }
            };
            if scheduler.report(result).await.is_err() {
                debug!(worker = %worker, epoch, "scheduler gone; dropping result");
            }
        });

        self.active.insert(
            epoch,
            ActiveAttempt {
                cancel: Some(cancel_tx),
                handle,
            },
        );

        Box::pin(async { Ok(()) })
    }

    fn cancel(&mut self, task: TaskId, epoch: DispatchEpoch) -> WorkerFuture<'_> {
        match self.active.get_mut(&epoch).and_then(|a| a.cancel.take()) {
            Some(cancel) => {
                if cancel.send(()).is_err() {
                    debug!(worker = %self.id, task = %task, epoch, "attempt already finished while cancelling");
                }
            }
            None => {
                debug!(worker = %self.id, task = %task, epoch, "no running attempt to cancel");
            }
        }
        Box::pin(async { Ok(()) })
    }

    fn stop(&mut self) -> WorkerFuture<'_> {
        if let Some(hb) = self.heartbeat.take() {
            hb.abort();
        }
        for (_, attempt) in self.active.drain() {
            attempt.handle.abort();
        }
        Box::pin(async { Ok(()) })
    }
}

impl Drop for LocalWorker {
    fn drop(&mut self) {
        if let Some(hb) = self.heartbeat.take() {
            hb.abort();
        }
    }
}

/// Spawns [`LocalWorker`]s sharing one handler.
pub struct LocalWorkerFactory {
    handler: TaskHandler,
    heartbeat_interval: Duration,
}

impl LocalWorkerFactory {
    pub fn new(handler: TaskHandler, heartbeat_interval: Duration) -> Self {
        Self {
            handler,
            heartbeat_interval,
        }
    }
}

impl WorkerFactory for LocalWorkerFactory {
    fn spawn(&mut self, id: WorkerId, handle: SchedulerHandle) -> Result<Box<dyn Worker>> {
        Ok(Box::new(LocalWorker::start(
            id,
            handle,
            Arc::clone(&self.handler),
            self.heartbeat_interval,
        )))
    }
}
