// src/dag/task.rs

//! Task entities: what clients submit, what the core tracks, and the
//! read-only view handed to the monitor.

use std::time::{Duration, Instant};

use crate::errors::{CancelReason, TaskFailure};
use crate::types::{DispatchEpoch, Payload, TaskId, WorkerId};

/// Default per-attempt timeout when a [`TaskSpec`] does not set one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// State of a task. `Succeeded`, `Failed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskState {
    /// Waiting for dependencies.
    Pending,
    /// Dependencies satisfied; sitting in the ready queue.
    Ready,
    /// Dispatched to a worker.
    Running,
    /// Last attempt overran its timeout; waiting out the backoff.
    TimedOut,
    /// Last attempt crashed or failed; waiting out the backoff.
    Retrying,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskState {
    pub const ALL: [TaskState; 8] = [
        TaskState::Pending,
        TaskState::Ready,
        TaskState::Running,
        TaskState::TimedOut,
        TaskState::Retrying,
        TaskState::Succeeded,
        TaskState::Failed,
        TaskState::Cancelled,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Cancelled
        )
    }

    /// States that a cancel request resolves immediately, without a worker.
    pub fn is_unstarted(self) -> bool {
        matches!(
            self,
            TaskState::Pending | TaskState::Ready | TaskState::TimedOut | TaskState::Retrying
        )
    }
}

/// What a client submits.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub id: TaskId,
    pub priority: i64,
    pub dependencies: Vec<TaskId>,
    pub payload: Payload,
    pub max_retries: u32,
    pub timeout: Duration,
}

impl TaskSpec {
    pub fn new(id: impl Into<TaskId>, payload: impl Into<Payload>) -> Self {
        Self {
            id: id.into(),
            priority: 0,
            dependencies: Vec::new(),
            payload: payload.into(),
            max_retries: 0,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn after(mut self, dep: impl Into<TaskId>) -> Self {
        self.dependencies.push(dep.into());
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// How a task ended, once it has.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded(Payload),
    Failed(TaskFailure),
    Cancelled(CancelReason),
}

/// A task as owned by the scheduler core.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub priority: i64,
    pub dependencies: Vec<TaskId>,
    pub payload: Payload,
    pub max_retries: u32,
    pub timeout: Duration,

    pub state: TaskState,
    pub retry_count: u32,
    /// Submission order; ties between equal priorities pop in this order.
    pub seq: u64,
    /// Epoch of the current (or most recent) dispatch.
    pub epoch: Option<DispatchEpoch>,
    /// Worker running the current attempt.
    pub worker: Option<WorkerId>,
    /// Start of the current attempt.
    pub started_at: Option<Instant>,
    /// Failure of the most recent attempt, kept for the final report.
    pub last_failure: Option<TaskFailure>,
    /// Set while a cancel is in flight to the worker running this task.
    pub cancel_pending: Option<CancelReason>,
    pub outcome: Option<TaskOutcome>,
    pub submitted_at: Instant,
    pub finished_at: Option<Instant>,
}

impl Task {
    pub fn from_spec(spec: TaskSpec, seq: u64, now: Instant) -> Self {
        Self {
            id: spec.id,
            priority: spec.priority,
            dependencies: spec.dependencies,
            payload: spec.payload,
            max_retries: spec.max_retries,
            timeout: spec.timeout,
            state: TaskState::Pending,
            retry_count: 0,
            seq,
            epoch: None,
            worker: None,
            started_at: None,
            last_failure: None,
            cancel_pending: None,
            outcome: None,
            submitted_at: now,
            finished_at: None,
        }
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id.clone(),
            priority: self.priority,
            dependencies: self.dependencies.clone(),
            state: self.state,
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            epoch: self.epoch,
            worker: self.worker.clone(),
            outcome: self.outcome.clone(),
        }
    }
}

/// Read-only view of a task for the monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub priority: i64,
    pub dependencies: Vec<TaskId>,
    pub state: TaskState,
    pub retry_count: u32,
    pub max_retries: u32,
    pub epoch: Option<DispatchEpoch>,
    pub worker: Option<WorkerId>,
    pub outcome: Option<TaskOutcome>,
}

impl TaskSnapshot {
    pub fn result(&self) -> Option<&Payload> {
        match &self.outcome {
            Some(TaskOutcome::Succeeded(payload)) => Some(payload),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&TaskFailure> {
        match &self.outcome {
            Some(TaskOutcome::Failed(failure)) => Some(failure),
            _ => None,
        }
    }

    pub fn cancel_reason(&self) -> Option<&CancelReason> {
        match &self.outcome {
            Some(TaskOutcome::Cancelled(reason)) => Some(reason),
            _ => None,
        }
    }
}
