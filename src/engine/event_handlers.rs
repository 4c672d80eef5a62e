// src/engine/event_handlers.rs

//! Command handling logic for the scheduler core.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::dag::{Admission, NodeStatus, Task, TaskOutcome, TaskSpec, TaskState};
use crate::engine::core::SchedulerCore;
use crate::engine::scaler::{LoadSample, ScaleDecision};
use crate::engine::tracker::RetryDecision;
use crate::engine::TimerKey;
use crate::errors::{CancelReason, Result, SchedulerError, TaskFailure};
use crate::pool::{Assignment, Dispatch, Release, ResultStatus, WorkerResult, WorkerStatus};
use crate::types::{DispatchEpoch, Payload, ShutdownMode, TaskId, WorkerId};

/// Action produced by the pure core, to be performed by the outer IO shell.
#[derive(Debug, Clone)]
pub enum CoreAction {
    /// Hand an attempt to a worker.
    Execute { worker: WorkerId, dispatch: Dispatch },
    /// Ask a worker to stop an attempt.
    CancelOnWorker {
        worker: WorkerId,
        task: TaskId,
        epoch: DispatchEpoch,
    },
    /// Fire `key` (as a command) after `delay`.
    ArmTimer { key: TimerKey, delay: Duration },
    DisarmTimer { key: TimerKey },
    /// Build a worker with this id through the factory.
    SpawnWorker { worker: WorkerId },
    /// Tear a worker down and drop it.
    StopWorker { worker: WorkerId },
}

/// Decision returned by the core after handling a single command.
#[derive(Debug, Clone)]
pub struct CoreStep {
    /// Actions the IO shell should perform, in order.
    pub actions: Vec<CoreAction>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

/// Move a task into its terminal state.
fn finish(task: &mut Task, outcome: TaskOutcome, now: Instant) {
    task.state = match outcome {
        TaskOutcome::Succeeded(_) => TaskState::Succeeded,
        TaskOutcome::Failed(_) => TaskState::Failed,
        TaskOutcome::Cancelled(_) => TaskState::Cancelled,
    };
    task.outcome = Some(outcome);
    task.worker = None;
    task.cancel_pending = None;
    task.finished_at = Some(now);
}

impl SchedulerCore {
    pub(super) fn on_submit(
        &mut self,
        spec: TaskSpec,
        now: Instant,
        actions: &mut Vec<CoreAction>,
    ) -> Result<()> {
        if self.shutdown.is_some() {
            return Err(SchedulerError::SchedulerShutdown);
        }

        let seq = self.next_seq;
        let admission = self.graph.add_task(&spec.id, &spec.dependencies, seq)?;
        self.next_seq += 1;
        self.totals.submitted += 1;

        let id = spec.id.clone();
        let mut task = Task::from_spec(spec, seq, now);
        info!(
            task = %id,
            priority = task.priority,
            deps = ?task.dependencies,
            "task submitted"
        );

        match admission {
            Admission::Ready => {
                task.state = TaskState::Ready;
                self.queue.push(id.clone(), task.priority, seq);
                self.tasks.insert(id, task);
            }
            Admission::Waiting => {
                self.tasks.insert(id, task);
            }
            Admission::Blocked { ancestor } => {
                let reason = match self.graph.status_of(&ancestor) {
                    Some(NodeStatus::Failed) => CancelReason::AncestorFailed(ancestor),
                    _ => CancelReason::AncestorCancelled(ancestor),
                };
                info!(task = %id, %reason, "task can never run; cancelling on admission");
                self.tasks.insert(id.clone(), task);
                self.cancel_now(&id, reason, now, actions);
            }
        }

        Ok(())
    }

    pub(super) fn on_worker_registered(
        &mut self,
        worker: WorkerId,
        now: Instant,
        actions: &mut Vec<CoreAction>,
    ) {
        if self.workers.is_live(&worker) {
            debug!(worker = %worker, "worker already registered; treating as heartbeat");
            self.workers.heartbeat(&worker, now);
            return;
        }

        let expected = self.workers.is_pending_spawn(&worker);
        let full = self.workers.pool_size() >= self.config.pool.max_workers;
        if self.shutdown.is_some() || (!expected && full) {
            warn!(worker = %worker, "registration rejected: pool full or shutting down");
            self.workers.spawn_failed(&worker);
            actions.push(CoreAction::StopWorker { worker });
            return;
        }

        self.workers.register(&worker, now);
    }

    pub(super) fn on_heartbeat(&mut self, worker: &str, timestamp: Instant, now: Instant) {
        // A timestamp from the future would keep a worker alive forever.
        let at = timestamp.min(now);
        if !self.workers.heartbeat(worker, at) {
            debug!(worker = %worker, "heartbeat from unknown or dead worker ignored");
        }
    }

    pub(super) fn on_result(
        &mut self,
        result: WorkerResult,
        now: Instant,
        actions: &mut Vec<CoreAction>,
    ) {
        let WorkerResult {
            worker,
            task: task_id,
            epoch,
            status,
            payload,
        } = result;

        // Any result for the worker's current assignment frees it, even one
        // the task no longer cares about.
        let awaiting_cancel = self
            .workers
            .get(&worker)
            .is_some_and(|w| w.cancel_deadline.is_some());
        let release = self.workers.release(&worker, &task_id, epoch, now);
        match release {
            Release::Idle => {}
            Release::Retired => actions.push(CoreAction::StopWorker {
                worker: worker.clone(),
            }),
            Release::NotCurrent => {
                debug!(worker = %worker, task = %task_id, epoch, "result does not match worker assignment");
            }
        }
        if release != Release::NotCurrent && awaiting_cancel {
            actions.push(CoreAction::DisarmTimer {
                key: TimerKey::CancelGrace {
                    worker: worker.clone(),
                    task: task_id.clone(),
                    epoch,
                },
            });
        }
        self.workers.heartbeat(&worker, now);

        let current = self
            .tasks
            .get(&task_id)
            .is_some_and(|t| t.state == TaskState::Running && t.epoch == Some(epoch));
        if !current {
            debug!(task = %task_id, worker = %worker, epoch, "stale result discarded");
            return;
        }

        actions.push(CoreAction::DisarmTimer {
            key: TimerKey::TaskTimeout {
                task: task_id.clone(),
                epoch,
            },
        });

        let pending_cancel = self
            .tasks
            .get_mut(&task_id)
            .and_then(|t| t.cancel_pending.take());
        if let Some(reason) = pending_cancel {
            info!(task = %task_id, worker = %worker, epoch, "cancel acknowledged");
            self.complete_running_cancel(&task_id, reason, now, actions);
            return;
        }

        match status {
            ResultStatus::Succeeded => self.on_task_succeeded(&task_id, payload, now),
            ResultStatus::Failed(error) => {
                warn!(task = %task_id, worker = %worker, epoch, error = %error, "attempt failed");
                self.attempt_failed(&task_id, TaskFailure::Reported(error), now, actions);
            }
            ResultStatus::Cancelled => {
                warn!(task = %task_id, worker = %worker, epoch, "worker cancelled an attempt nobody asked to cancel");
                self.attempt_failed(
                    &task_id,
                    TaskFailure::Reported("attempt cancelled by worker".to_string()),
                    now,
                    actions,
                );
            }
        }
    }

    pub(super) fn on_cancel_requested(
        &mut self,
        id: &str,
        now: Instant,
        actions: &mut Vec<CoreAction>,
    ) -> Result<()> {
        let state = self
            .tasks
            .get(id)
            .map(|t| t.state)
            .ok_or_else(|| SchedulerError::TaskNotFound(id.to_string()))?;

        match state {
            s if s.is_terminal() => {
                debug!(task = %id, state = ?s, "cancel on finished task ignored");
            }
            TaskState::Running => {
                info!(task = %id, "cancel requested for running task; forwarding to worker");
                self.request_running_cancel(id, CancelReason::Requested, now, actions);
            }
            _ => {
                info!(task = %id, state = ?state, "task cancelled before running");
                self.cancel_now(id, CancelReason::Requested, now, actions);
            }
        }
        Ok(())
    }

    pub(super) fn on_scale_requested(&mut self, target: usize, actions: &mut Vec<CoreAction>) {
        if self.shutdown.is_some() {
            debug!(target, "scale request ignored during shutdown");
            return;
        }
        let target = self.config.pool.clamp(target);
        let current = self.workers.effective_count();
        info!(target, current, "scale requested");

        self.scaler.reset();
        if target > current {
            self.grow(target - current, actions);
        } else if target < current {
            self.retire_workers(current - target, actions);
        }
    }

    pub(super) fn on_scale_tick(&mut self, now: Instant, actions: &mut Vec<CoreAction>) {
        if !self.scaler.enabled() || self.shutdown.is_some() {
            return;
        }

        let sample = LoadSample {
            queue_len: self.queue.len(),
            idle: self.workers.idle_count(),
            busy: self.workers.busy_count(),
            workers: self.workers.effective_count(),
        };

        match self.scaler.evaluate(sample, now) {
            ScaleDecision::Hold => {}
            ScaleDecision::Up(n) => {
                info!(n, queue = sample.queue_len, workers = sample.workers, "scaling up");
                self.grow(n, actions);
            }
            ScaleDecision::Down(n) => {
                info!(n, idle = sample.idle, workers = sample.workers, "scaling down");
                self.retire_workers(n, actions);
            }
        }
    }

    pub(super) fn on_spawn_failed(&mut self, worker: &str) {
        warn!(worker = %worker, "worker could not be spawned");
        self.workers.spawn_failed(worker);
    }

    pub(super) fn on_task_timed_out(
        &mut self,
        id: &str,
        epoch: DispatchEpoch,
        now: Instant,
        actions: &mut Vec<CoreAction>,
    ) {
        let Some(task) = self.tasks.get_mut(id) else {
            return;
        };
        if task.state != TaskState::Running || task.epoch != Some(epoch) {
            debug!(task = %id, epoch, "stale timeout ignored");
            return;
        }

        let worker = task.worker.clone();
        let pending_cancel = task.cancel_pending.take();
        task.state = TaskState::TimedOut;
        warn!(task = %id, epoch, worker = ?worker, timeout = ?task.timeout, "attempt timed out");

        if let Some(reason) = pending_cancel {
            // A cancel is already in flight with its own grace timer.
            self.complete_running_cancel(id, reason, now, actions);
            return;
        }

        if let Some(worker) = worker {
            self.send_cancel(&worker, id, epoch, now, actions);
        }
        self.attempt_failed(id, TaskFailure::WorkerTimeout, now, actions);
    }

    pub(super) fn on_backoff_elapsed(&mut self, id: &str, epoch: DispatchEpoch) {
        let Some(task) = self.tasks.get_mut(id) else {
            return;
        };
        let waiting = matches!(task.state, TaskState::TimedOut | TaskState::Retrying);
        if !waiting || task.epoch != Some(epoch) {
            debug!(task = %id, epoch, "stale backoff timer ignored");
            return;
        }

        task.state = TaskState::Ready;
        self.queue.push(id.to_string(), task.priority, task.seq);
        debug!(task = %id, retry = task.retry_count, "backoff elapsed; task ready again");
    }

    pub(super) fn on_cancel_grace_expired(
        &mut self,
        worker: &str,
        id: &str,
        epoch: DispatchEpoch,
        now: Instant,
        actions: &mut Vec<CoreAction>,
    ) {
        let still_assigned = self.workers.get(worker).is_some_and(|w| {
            w.status == WorkerStatus::Busy
                && w.current
                    .as_ref()
                    .is_some_and(|a| a.task == id && a.epoch == epoch)
        });
        if !still_assigned {
            debug!(worker = %worker, task = %id, epoch, "cancel grace expired after acknowledgement");
            return;
        }

        warn!(worker = %worker, task = %id, epoch, "worker did not honour cancel in time; abandoning it");
        self.workers.mark_dead(worker);
        actions.push(CoreAction::StopWorker {
            worker: worker.to_string(),
        });

        let running = self
            .tasks
            .get(id)
            .is_some_and(|t| t.state == TaskState::Running && t.epoch == Some(epoch));
        if running {
            actions.push(CoreAction::DisarmTimer {
                key: TimerKey::TaskTimeout {
                    task: id.to_string(),
                    epoch,
                },
            });
            let reason = self
                .tasks
                .get_mut(id)
                .and_then(|t| t.cancel_pending.take())
                .unwrap_or(CancelReason::Requested);
            self.complete_running_cancel(id, reason, now, actions);
        }

        self.replenish(actions);
    }

    pub(super) fn on_heartbeat_sweep(&mut self, now: Instant, actions: &mut Vec<CoreAction>) {
        for (worker, assignment) in self.workers.sweep(now) {
            actions.push(CoreAction::StopWorker {
                worker: worker.clone(),
            });

            let Some(Assignment { task, epoch }) = assignment else {
                continue;
            };
            let running = self
                .tasks
                .get(&task)
                .is_some_and(|t| t.state == TaskState::Running && t.epoch == Some(epoch));
            if !running {
                continue;
            }

            actions.push(CoreAction::DisarmTimer {
                key: TimerKey::TaskTimeout {
                    task: task.clone(),
                    epoch,
                },
            });

            let pending_cancel = self
                .tasks
                .get_mut(&task)
                .and_then(|t| t.cancel_pending.take());
            match pending_cancel {
                Some(reason) => self.complete_running_cancel(&task, reason, now, actions),
                None => {
                    warn!(task = %task, worker = %worker, epoch, "in-flight task lost with its worker");
                    self.attempt_failed(&task, TaskFailure::WorkerCrash(worker), now, actions);
                }
            }
        }

        self.replenish(actions);
    }

    pub(super) fn on_shutdown(
        &mut self,
        mode: ShutdownMode,
        now: Instant,
        actions: &mut Vec<CoreAction>,
    ) {
        match (self.shutdown, mode) {
            (Some(ShutdownMode::Hard), _) | (Some(ShutdownMode::Graceful), ShutdownMode::Graceful) => {
                debug!(?mode, "shutdown already in progress");
                return;
            }
            _ => {}
        }

        info!(?mode, "shutdown requested");
        self.shutdown = Some(mode);

        let mut open: Vec<(u64, TaskId)> = self
            .tasks
            .values()
            .filter(|t| !t.state.is_terminal())
            .map(|t| (t.seq, t.id.clone()))
            .collect();
        open.sort();

        for (_, id) in open {
            let Some(state) = self.tasks.get(&id).map(|t| t.state) else {
                continue;
            };
            match state {
                TaskState::Running if mode == ShutdownMode::Hard => {
                    self.abort_running(&id, now, actions);
                }
                TaskState::Running => {}
                _ => {
                    self.finalize_unstarted(&id, CancelReason::Shutdown, now, actions);
                }
            }
            // A task still running under a graceful drain keeps its graph node
            // until it reports. Dependents are handled by this loop, with the
            // shutdown reason.
            let still_running = self
                .tasks
                .get(&id)
                .is_some_and(|t| t.state == TaskState::Running);
            if !still_running {
                let _ = self.graph.mark_cancelled(&id);
            }
        }
    }

    fn on_task_succeeded(&mut self, id: &str, payload: Payload, now: Instant) {
        let Some(task) = self.tasks.get_mut(id) else {
            return;
        };
        let retries = task.retry_count;
        finish(task, TaskOutcome::Succeeded(payload), now);
        self.totals.succeeded += 1;
        self.record_completion(now);
        info!(task = %id, retries, "task succeeded");

        for released in self.graph.mark_succeeded(id) {
            if let Some(dependent) = self.tasks.get_mut(&released) {
                if dependent.state == TaskState::Pending {
                    dependent.state = TaskState::Ready;
                    self.queue.push(released.clone(), dependent.priority, dependent.seq);
                    debug!(task = %released, "dependencies satisfied; task ready");
                }
            }
        }
    }

    /// Retry or fail a task whose current attempt just ended badly.
    fn attempt_failed(
        &mut self,
        id: &str,
        failure: TaskFailure,
        now: Instant,
        actions: &mut Vec<CoreAction>,
    ) {
        let shutting_down = self.shutdown.is_some();
        let Some(task) = self.tasks.get_mut(id) else {
            return;
        };
        task.worker = None;
        task.started_at = None;
        task.last_failure = Some(failure.clone());

        let final_failure = if shutting_down {
            TaskFailure::ShutdownDuringRetry(Box::new(failure))
        } else {
            match self
                .tracker
                .on_failure(task.retry_count, task.max_retries, failure.clone())
            {
                RetryDecision::Retry { attempt, delay } => {
                    task.retry_count = attempt;
                    task.state = if failure == TaskFailure::WorkerTimeout {
                        TaskState::TimedOut
                    } else {
                        TaskState::Retrying
                    };
                    self.totals.retries += 1;
                    let epoch = task.epoch.unwrap_or_default();
                    info!(
                        task = %id,
                        retry = attempt,
                        max_retries = task.max_retries,
                        delay = ?delay,
                        "retrying after backoff"
                    );
                    actions.push(CoreAction::ArmTimer {
                        key: TimerKey::Backoff {
                            task: id.to_string(),
                            epoch,
                        },
                        delay,
                    });
                    return;
                }
                RetryDecision::GiveUp(reason) => reason,
            }
        };

        warn!(task = %id, error = %final_failure, "task failed");
        finish(task, TaskOutcome::Failed(final_failure), now);
        self.totals.failed += 1;

        let cascade = self.graph.mark_failed(id);
        self.apply_cascade(cascade, now, actions);
    }

    /// Cancel a task that is not running and cascade to its dependents.
    fn cancel_now(
        &mut self,
        id: &str,
        reason: CancelReason,
        now: Instant,
        actions: &mut Vec<CoreAction>,
    ) {
        self.finalize_unstarted(id, reason, now, actions);
        let cascade = self.graph.mark_cancelled(id);
        self.apply_cascade(cascade, now, actions);
    }

    fn finalize_unstarted(
        &mut self,
        id: &str,
        reason: CancelReason,
        now: Instant,
        actions: &mut Vec<CoreAction>,
    ) {
        let Some(task) = self.tasks.get_mut(id) else {
            return;
        };
        match task.state {
            TaskState::Ready => self.queue.remove(id),
            TaskState::TimedOut | TaskState::Retrying => {
                if let Some(epoch) = task.epoch {
                    actions.push(CoreAction::DisarmTimer {
                        key: TimerKey::Backoff {
                            task: id.to_string(),
                            epoch,
                        },
                    });
                }
            }
            _ => {}
        }
        debug!(task = %id, %reason, "task cancelled");
        finish(task, TaskOutcome::Cancelled(reason), now);
        self.totals.cancelled += 1;
    }

    /// Apply cancellations computed by the graph. Unstarted tasks end at
    /// once; running ones get a cancel instruction and a grace period.
    fn apply_cascade(
        &mut self,
        cascade: Vec<(TaskId, CancelReason)>,
        now: Instant,
        actions: &mut Vec<CoreAction>,
    ) {
        for (id, reason) in cascade {
            let Some(state) = self.tasks.get(&id).map(|t| t.state) else {
                continue;
            };
            match state {
                s if s.is_terminal() => {}
                TaskState::Running => self.request_running_cancel(&id, reason, now, actions),
                _ => {
                    info!(task = %id, %reason, "cascading cancellation");
                    self.finalize_unstarted(&id, reason, now, actions);
                }
            }
        }
    }

    fn request_running_cancel(
        &mut self,
        id: &str,
        reason: CancelReason,
        now: Instant,
        actions: &mut Vec<CoreAction>,
    ) {
        let Some(task) = self.tasks.get_mut(id) else {
            return;
        };
        if task.cancel_pending.is_some() {
            return;
        }
        let (Some(worker), Some(epoch)) = (task.worker.clone(), task.epoch) else {
            return;
        };
        task.cancel_pending = Some(reason);
        self.send_cancel(&worker, id, epoch, now, actions);
    }

    fn send_cancel(
        &mut self,
        worker: &str,
        id: &str,
        epoch: DispatchEpoch,
        now: Instant,
        actions: &mut Vec<CoreAction>,
    ) {
        let grace = self.config.cancel_grace;
        self.workers.mark_cancelling(worker, now + grace);
        actions.push(CoreAction::CancelOnWorker {
            worker: worker.to_string(),
            task: id.to_string(),
            epoch,
        });
        actions.push(CoreAction::ArmTimer {
            key: TimerKey::CancelGrace {
                worker: worker.to_string(),
                task: id.to_string(),
                epoch,
            },
            delay: grace,
        });
    }

    /// A running task whose cancel has been acknowledged or forced.
    fn complete_running_cancel(
        &mut self,
        id: &str,
        reason: CancelReason,
        now: Instant,
        actions: &mut Vec<CoreAction>,
    ) {
        let Some(task) = self.tasks.get_mut(id) else {
            return;
        };
        info!(task = %id, %reason, "running task cancelled");
        finish(task, TaskOutcome::Cancelled(reason), now);
        self.totals.cancelled += 1;

        let cascade = self.graph.mark_cancelled(id);
        self.apply_cascade(cascade, now, actions);
    }

    /// Hard shutdown of a running task: cancel it without waiting.
    fn abort_running(&mut self, id: &str, now: Instant, actions: &mut Vec<CoreAction>) {
        let Some(task) = self.tasks.get_mut(id) else {
            return;
        };
        if let (Some(worker), Some(epoch)) = (task.worker.clone(), task.epoch) {
            actions.push(CoreAction::DisarmTimer {
                key: TimerKey::TaskTimeout {
                    task: id.to_string(),
                    epoch,
                },
            });
            actions.push(CoreAction::CancelOnWorker {
                worker,
                task: id.to_string(),
                epoch,
            });
        }
        finish(task, TaskOutcome::Cancelled(CancelReason::Shutdown), now);
        self.totals.cancelled += 1;
    }

    fn retire_workers(&mut self, n: usize, actions: &mut Vec<CoreAction>) {
        for worker in self.workers.retire(n) {
            info!(worker = %worker, "idle worker retired");
            actions.push(CoreAction::StopWorker { worker });
        }
    }

    /// Spawn replacements while the pool is below `min_workers`.
    fn replenish(&mut self, actions: &mut Vec<CoreAction>) {
        if self.shutdown.is_some() {
            return;
        }
        let missing = self
            .config
            .pool
            .min_workers
            .saturating_sub(self.workers.effective_count());
        if missing > 0 {
            info!(missing, "pool below min_workers; spawning replacements");
            self.grow(missing, actions);
        }
    }
}
