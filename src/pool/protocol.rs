// src/pool/protocol.rs

//! Message shapes exchanged between the scheduler and its workers.
//!
//! No wire format is implied; remote workers serialize these however their
//! transport likes.

use std::time::Duration;

use crate::types::{DispatchEpoch, Payload, TaskId, WorkerId};

/// Instruction to execute one attempt of a task.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub task: TaskId,
    pub epoch: DispatchEpoch,
    pub payload: Payload,
    /// 1 for the first attempt, incremented on every retry.
    pub attempt: u32,
    /// Budget the scheduler enforces for this attempt.
    pub timeout: Duration,
}

/// How an attempt ended, as reported by the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultStatus {
    Succeeded,
    Failed(String),
    /// The worker stopped the attempt because it was told to.
    Cancelled,
}

/// `Result{worker_id, task_id, dispatch_epoch, status, payload_or_error}`.
#[derive(Debug, Clone)]
pub struct WorkerResult {
    pub worker: WorkerId,
    pub task: TaskId,
    pub epoch: DispatchEpoch,
    pub status: ResultStatus,
    pub payload: Payload,
}

impl WorkerResult {
    pub fn succeeded(dispatch: &Dispatch, worker: &str, payload: Payload) -> Self {
        Self {
            worker: worker.to_string(),
            task: dispatch.task.clone(),
            epoch: dispatch.epoch,
            status: ResultStatus::Succeeded,
            payload,
        }
    }

    pub fn failed(dispatch: &Dispatch, worker: &str, error: impl Into<String>) -> Self {
        Self {
            worker: worker.to_string(),
            task: dispatch.task.clone(),
            epoch: dispatch.epoch,
            status: ResultStatus::Failed(error.into()),
            payload: Payload::empty(),
        }
    }

    pub fn cancelled(task: &str, epoch: DispatchEpoch, worker: &str) -> Self {
        Self {
            worker: worker.to_string(),
            task: task.to_string(),
            epoch,
            status: ResultStatus::Cancelled,
            payload: Payload::empty(),
        }
    }
}
