// src/engine/mod.rs

//! Scheduling engine.
//!
//! This module ties together:
//! - the ready queue (priority order over `Ready` tasks)
//! - the execution tracker (timeouts, retries, backoff)
//! - the dynamic scaler (pool size from observed load)
//! - the main runtime loop that reacts to:
//!   - submissions, cancels and queries from clients
//!   - registrations, heartbeats and results from workers
//!   - timers and periodic ticks
//!   - shutdown requests
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`]. Clients talk to the shell through a
//! [`SchedulerHandle`].

use std::time::Instant;

use tokio::sync::oneshot;

use crate::dag::{TaskSnapshot, TaskSpec};
use crate::errors::Result;
use crate::pool::{WorkerLink, WorkerResult};
use crate::types::{DispatchEpoch, ShutdownMode, TaskId, WorkerId};

pub mod core;
pub mod event_handlers;
pub mod handle;
pub mod queue;
pub mod runtime;
pub mod scaler;
pub mod snapshot;
pub mod tracker;

pub use core::SchedulerCore;
pub use event_handlers::{CoreAction, CoreStep};
pub use handle::SchedulerHandle;
pub use queue::ReadyQueue;
pub use runtime::{Runtime, spawn_scheduler};
pub use scaler::{DynamicScaler, LoadSample, ScaleDecision};
pub use snapshot::{MetricsSnapshot, Totals};
pub use tracker::{ExecutionTracker, RetryDecision};

/// Commands consumed by the scheduler core, one at a time.
#[derive(Debug, Clone)]
pub enum Command {
    /// Admit a new task.
    Submit(TaskSpec),
    /// A worker joined (or rejoined after being declared dead).
    WorkerRegistered { worker: WorkerId },
    /// Liveness signal from a worker.
    Heartbeat { worker: WorkerId, timestamp: Instant },
    /// A worker finished an attempt.
    ResultReported(WorkerResult),
    /// Client asked to cancel a task.
    CancelRequested { task: TaskId },
    /// Set the pool size directly; clamped to the configured bounds.
    ScaleRequested { target: usize },
    Shutdown { mode: ShutdownMode },
    /// The worker factory could not build a requested worker.
    SpawnFailed { worker: WorkerId },
    /// The attempt `(task, epoch)` overran its timeout.
    TaskTimedOut { task: TaskId, epoch: DispatchEpoch },
    /// The backoff after attempt `(task, epoch)` elapsed.
    BackoffElapsed { task: TaskId, epoch: DispatchEpoch },
    /// A worker did not acknowledge a cancel within the grace period.
    CancelGraceExpired {
        worker: WorkerId,
        task: TaskId,
        epoch: DispatchEpoch,
    },
    /// Periodic check for workers that stopped heartbeating.
    HeartbeatSweep,
    /// Periodic load sample for the scaler.
    ScaleTick,
}

/// Identity of a timer armed by the core. Each key fires at most once and
/// turns into the matching [`Command`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimerKey {
    TaskTimeout {
        task: TaskId,
        epoch: DispatchEpoch,
    },
    Backoff {
        task: TaskId,
        epoch: DispatchEpoch,
    },
    CancelGrace {
        worker: WorkerId,
        task: TaskId,
        epoch: DispatchEpoch,
    },
}

impl TimerKey {
    pub fn into_command(self) -> Command {
        match self {
            TimerKey::TaskTimeout { task, epoch } => Command::TaskTimedOut { task, epoch },
            TimerKey::Backoff { task, epoch } => Command::BackoffElapsed { task, epoch },
            TimerKey::CancelGrace {
                worker,
                task,
                epoch,
            } => Command::CancelGraceExpired {
                worker,
                task,
                epoch,
            },
        }
    }
}

/// Read-only requests answered by the runtime from the core's state.
#[derive(Debug)]
pub enum Query {
    Status {
        task: TaskId,
        reply: oneshot::Sender<Result<TaskSnapshot>>,
    },
    Metrics {
        reply: oneshot::Sender<MetricsSnapshot>,
    },
    /// Resolved once no task can make progress without new submissions.
    WaitIdle { reply: oneshot::Sender<Result<()>> },
}

/// Everything that travels over the scheduler channel.
#[derive(Debug)]
pub enum Message {
    Command {
        command: Command,
        /// Present when the sender waits for the command to be processed.
        ack: Option<oneshot::Sender<Result<()>>>,
    },
    /// A worker built outside the scheduler asks to join the pool.
    Attach(WorkerLink),
    Query(Query),
    Timer(TimerKey),
}
