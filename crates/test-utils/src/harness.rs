#![allow(dead_code)]

//! Drive a `SchedulerCore` by hand with a manual clock.

use std::time::{Duration, Instant};

use dagpool::config::SchedulerConfig;
use dagpool::dag::{TaskSnapshot, TaskSpec, TaskState};
use dagpool::engine::{Command, CoreAction, CoreStep, SchedulerCore, TimerKey};
use dagpool::errors::Result;
use dagpool::pool::{Dispatch, ResultStatus, WorkerResult};
use dagpool::types::{DispatchEpoch, Payload, ShutdownMode};

pub struct CoreHarness {
    pub core: SchedulerCore,
    pub now: Instant,
}

impl CoreHarness {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            core: SchedulerCore::new(config),
            now: Instant::now(),
        }
    }

    pub fn advance(&mut self, by: Duration) {
        self.now += by;
    }

    pub fn try_step(&mut self, command: Command) -> Result<CoreStep> {
        self.core.step(command, self.now)
    }

    pub fn step(&mut self, command: Command) -> CoreStep {
        self.try_step(command).expect("command rejected")
    }

    pub fn submit(&mut self, spec: TaskSpec) -> Result<CoreStep> {
        self.try_step(Command::Submit(spec))
    }

    pub fn register(&mut self, worker: &str) -> CoreStep {
        self.step(Command::WorkerRegistered {
            worker: worker.to_string(),
        })
    }

    pub fn heartbeat(&mut self, worker: &str) -> CoreStep {
        let timestamp = self.now;
        self.step(Command::Heartbeat {
            worker: worker.to_string(),
            timestamp,
        })
    }

    pub fn report(&mut self, worker: &str, dispatch: &Dispatch, status: ResultStatus) -> CoreStep {
        self.step(Command::ResultReported(WorkerResult {
            worker: worker.to_string(),
            task: dispatch.task.clone(),
            epoch: dispatch.epoch,
            status,
            payload: Payload::empty(),
        }))
    }

    pub fn succeed(&mut self, worker: &str, dispatch: &Dispatch) -> CoreStep {
        self.step(Command::ResultReported(WorkerResult::succeeded(
            dispatch,
            worker,
            Payload::from(format!("{} done", dispatch.task)),
        )))
    }

    pub fn fail(&mut self, worker: &str, dispatch: &Dispatch, error: &str) -> CoreStep {
        self.step(Command::ResultReported(WorkerResult::failed(
            dispatch, worker, error,
        )))
    }

    pub fn time_out(&mut self, task: &str, epoch: DispatchEpoch) -> CoreStep {
        self.step(Command::TaskTimedOut {
            task: task.to_string(),
            epoch,
        })
    }

    pub fn backoff_elapsed(&mut self, task: &str, epoch: DispatchEpoch) -> CoreStep {
        self.step(Command::BackoffElapsed {
            task: task.to_string(),
            epoch,
        })
    }

    pub fn cancel(&mut self, task: &str) -> Result<CoreStep> {
        self.try_step(Command::CancelRequested {
            task: task.to_string(),
        })
    }

    pub fn shutdown(&mut self, mode: ShutdownMode) -> CoreStep {
        self.step(Command::Shutdown { mode })
    }

    pub fn snapshot(&self, task: &str) -> TaskSnapshot {
        self.core.status(task).expect("unknown task")
    }

    pub fn state(&self, task: &str) -> TaskState {
        self.snapshot(task).state
    }
}

/// `Execute` actions of a step, as `(worker, dispatch)`.
pub fn executes(step: &CoreStep) -> Vec<(String, Dispatch)> {
    step.actions
        .iter()
        .filter_map(|a| match a {
            CoreAction::Execute { worker, dispatch } => Some((worker.clone(), dispatch.clone())),
            _ => None,
        })
        .collect()
}

/// The single `Execute` of a step.
pub fn only_execute(step: &CoreStep) -> (String, Dispatch) {
    let mut all = executes(step);
    assert_eq!(all.len(), 1, "expected exactly one dispatch, got {:?}", step.actions);
    all.remove(0)
}

/// Timers armed by a step.
pub fn armed(step: &CoreStep) -> Vec<(TimerKey, Duration)> {
    step.actions
        .iter()
        .filter_map(|a| match a {
            CoreAction::ArmTimer { key, delay } => Some((key.clone(), *delay)),
            _ => None,
        })
        .collect()
}

/// Delay of the backoff timer armed by a step, if any.
pub fn backoff_delay(step: &CoreStep) -> Option<Duration> {
    armed(step).into_iter().find_map(|(key, delay)| match key {
        TimerKey::Backoff { .. } => Some(delay),
        _ => None,
    })
}

pub fn spawned(step: &CoreStep) -> Vec<String> {
    step.actions
        .iter()
        .filter_map(|a| match a {
            CoreAction::SpawnWorker { worker } => Some(worker.clone()),
            _ => None,
        })
        .collect()
}

pub fn stopped(step: &CoreStep) -> Vec<String> {
    step.actions
        .iter()
        .filter_map(|a| match a {
            CoreAction::StopWorker { worker } => Some(worker.clone()),
            _ => None,
        })
        .collect()
}

pub fn cancels(step: &CoreStep) -> Vec<(String, String, DispatchEpoch)> {
    step.actions
        .iter()
        .filter_map(|a| match a {
            CoreAction::CancelOnWorker {
                worker,
                task,
                epoch,
            } => Some((worker.clone(), task.clone(), *epoch)),
            _ => None,
        })
        .collect()
}
