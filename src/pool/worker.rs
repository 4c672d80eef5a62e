// src/pool/worker.rs

//! The worker capability.
//!
//! The scheduler core never talks to a worker directly; it emits actions and
//! the runtime shell calls these methods. Results and heartbeats travel back
//! as commands through a [`SchedulerHandle`], never as return values, so a
//! worker can be a tokio task, a child process or a remote node.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use crate::engine::SchedulerHandle;
use crate::errors::Result;
use crate::pool::protocol::Dispatch;
use crate::types::{DispatchEpoch, TaskId, WorkerId};

pub type WorkerFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// An execution unit the scheduler can dispatch to.
///
/// Implementations must return from every method promptly: `execute` starts
/// the attempt and hands back control, the outcome is reported later with
/// [`SchedulerHandle::report`]. The scheduler awaits these futures inside its
/// decision loop, so they must never wait on the worker itself.
pub trait Worker: Send {
    fn id(&self) -> &str;

    /// Start running one attempt.
    fn execute(&mut self, dispatch: Dispatch) -> WorkerFuture<'_>;

    /// Ask the worker to stop the given attempt. Cooperative: the worker
    /// acknowledges by reporting a result for the same epoch.
    fn cancel(&mut self, task: TaskId, epoch: DispatchEpoch) -> WorkerFuture<'_>;

    /// Tear the worker down: stop heartbeats and abandon any running attempt.
    fn stop(&mut self) -> WorkerFuture<'_>;
}

/// Builds workers when the pool grows or replaces dead workers.
pub trait WorkerFactory: Send {
    fn spawn(&mut self, id: WorkerId, handle: SchedulerHandle) -> Result<Box<dyn Worker>>;
}

/// A worker handed to the scheduler from outside (e.g. a remote node that
/// registered itself).
pub struct WorkerLink(pub Box<dyn Worker>);

impl fmt::Debug for WorkerLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WorkerLink").field(&self.0.id()).finish()
    }
}
