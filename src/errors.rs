// src/errors.rs

//! Crate-wide error types.
//!
//! [`SchedulerError`] is what callers of the scheduler see. [`TaskFailure`]
//! and [`CancelReason`] are recorded on tasks and drive retry and cascade
//! decisions inside the core; they are never returned raw to clients.

use thiserror::Error;

use crate::types::TaskId;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Cyclic dependency: task '{task}' would depend on itself via '{via}'")]
    CyclicDependency { task: TaskId, via: TaskId },

    #[error("Duplicate task id: {0}")]
    DuplicateTaskId(TaskId),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Scheduler is shutting down")]
    SchedulerShutdown,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Why a single attempt (or a whole task) failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskFailure {
    #[error("task exceeded its timeout")]
    WorkerTimeout,

    #[error("worker '{0}' crashed while running the task")]
    WorkerCrash(String),

    #[error("task reported failure: {0}")]
    Reported(String),

    #[error("gave up after {attempts} attempts; last error: {last}")]
    MaxRetriesExceeded {
        attempts: u32,
        last: Box<TaskFailure>,
    },

    #[error("scheduler shut down before the task could be retried; last error: {0}")]
    ShutdownDuringRetry(Box<TaskFailure>),
}

/// Why a task ended up `Cancelled`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelReason {
    /// A client asked for it.
    Requested,
    /// A dependency (direct or transitive) failed.
    AncestorFailed(TaskId),
    /// A dependency (direct or transitive) was cancelled.
    AncestorCancelled(TaskId),
    /// Strict cascade: some unrelated task failed.
    FailFast(TaskId),
    /// The scheduler shut down before the task finished.
    Shutdown,
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelReason::Requested => write!(f, "cancelled on request"),
            CancelReason::AncestorFailed(id) => write!(f, "dependency '{id}' failed"),
            CancelReason::AncestorCancelled(id) => write!(f, "dependency '{id}' was cancelled"),
            CancelReason::FailFast(id) => write!(f, "task '{id}' failed under strict cascade"),
            CancelReason::Shutdown => write!(f, "scheduler shut down"),
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, SchedulerError>;
