// src/engine/core.rs

//! Pure scheduler core.
//!
//! This module contains a synchronous, deterministic state machine that
//! consumes [`Command`]s (with the current instant) and produces:
//! - an updated scheduler state
//! - a list of [`CoreAction`]s describing what the IO shell should do next
//!
//! The async shell (`engine::runtime::Runtime`) is responsible for:
//! - reading messages from the scheduler channel
//! - calling into worker capability objects
//! - arming and disarming timers
//! - answering queries
//!
//! The core owns every task, the dependency graph, the ready queue and the
//! worker registry, and is the only place where any of them change. It has
//! no channels and performs no IO, so it can be tested without Tokio.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Instant;

use tracing::{debug, info};

use crate::config::SchedulerConfig;
use crate::dag::{DependencyGraph, Task, TaskSnapshot, TaskState};
use crate::engine::event_handlers::{CoreAction, CoreStep};
use crate::engine::queue::ReadyQueue;
use crate::engine::scaler::DynamicScaler;
use crate::engine::snapshot::{MetricsSnapshot, Totals};
use crate::engine::tracker::ExecutionTracker;
use crate::engine::{Command, TimerKey};
use crate::errors::{Result, SchedulerError};
use crate::pool::{Dispatch, WorkerRegistry};
use crate::types::{DispatchEpoch, ShutdownMode, TaskId};

#[derive(Debug)]
pub struct SchedulerCore {
    pub(super) config: SchedulerConfig,
    pub(super) graph: DependencyGraph,
    pub(super) tasks: HashMap<TaskId, Task>,
    pub(super) queue: ReadyQueue,
    pub(super) workers: WorkerRegistry,
    pub(super) tracker: ExecutionTracker,
    pub(super) scaler: DynamicScaler,
    pub(super) next_seq: u64,
    /// Global dispatch counter; every dispatch gets the next value.
    pub(super) next_epoch: DispatchEpoch,
    pub(super) shutdown: Option<ShutdownMode>,
    pub(super) totals: Totals,
    /// Instants of successful completions inside the throughput window.
    pub(super) completions: VecDeque<Instant>,
}

impl SchedulerCore {
    pub fn new(config: SchedulerConfig) -> Self {
        let graph = DependencyGraph::new(config.cascade);
        let workers = WorkerRegistry::new(config.pool.heartbeat_interval);
        let tracker = ExecutionTracker::new(config.retry.clone());
        let scaler = DynamicScaler::new(
            config.scaler.clone(),
            config.pool.min_workers,
            config.pool.max_workers,
        );

        Self {
            config,
            graph,
            tasks: HashMap::new(),
            queue: ReadyQueue::new(),
            workers,
            tracker,
            scaler,
            next_seq: 0,
            next_epoch: 0,
            shutdown: None,
            totals: Totals::default(),
            completions: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.workers
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_some()
    }

    /// Request the initial pool (`initial_workers`, clamped to the bounds).
    pub fn bootstrap(&mut self) -> CoreStep {
        let target = self.config.pool.clamp(self.config.pool.initial_workers);
        let missing = target.saturating_sub(self.workers.effective_count());

        let mut actions = Vec::new();
        self.spawn_workers(missing, &mut actions);
        info!(workers = missing, "bootstrapping worker pool");

        CoreStep {
            actions,
            keep_running: true,
        }
    }

    /// Handle a single command, updating core state and returning the
    /// resulting actions for the IO shell.
    ///
    /// Errors are only returned for client commands that are rejected
    /// outright (`Submit`, `CancelRequested`); a rejected command leaves the
    /// state untouched.
    pub fn step(&mut self, command: Command, now: Instant) -> Result<CoreStep> {
        let mut actions = Vec::new();

        match command {
            Command::Submit(spec) => self.on_submit(spec, now, &mut actions)?,
            Command::WorkerRegistered { worker } => {
                self.on_worker_registered(worker, now, &mut actions)
            }
            Command::Heartbeat { worker, timestamp } => self.on_heartbeat(&worker, timestamp, now),
            Command::ResultReported(result) => self.on_result(result, now, &mut actions),
            Command::CancelRequested { task } => {
                self.on_cancel_requested(&task, now, &mut actions)?
            }
            Command::ScaleRequested { target } => self.on_scale_requested(target, &mut actions),
            Command::Shutdown { mode } => self.on_shutdown(mode, now, &mut actions),
            Command::SpawnFailed { worker } => self.on_spawn_failed(&worker),
            Command::TaskTimedOut { task, epoch } => {
                self.on_task_timed_out(&task, epoch, now, &mut actions)
            }
            Command::BackoffElapsed { task, epoch } => self.on_backoff_elapsed(&task, epoch),
            Command::CancelGraceExpired {
                worker,
                task,
                epoch,
            } => self.on_cancel_grace_expired(&worker, &task, epoch, now, &mut actions),
            Command::HeartbeatSweep => self.on_heartbeat_sweep(now, &mut actions),
            Command::ScaleTick => self.on_scale_tick(now, &mut actions),
        }

        self.dispatch(now, &mut actions);
        let keep_running = self.finish_if_drained(&mut actions);

        Ok(CoreStep {
            actions,
            keep_running,
        })
    }

    /// Read-only view of one task.
    pub fn status(&self, id: &str) -> Result<TaskSnapshot> {
        self.tasks
            .get(id)
            .map(Task::snapshot)
            .ok_or_else(|| SchedulerError::TaskNotFound(id.to_string()))
    }

    pub fn metrics(&self, now: Instant) -> MetricsSnapshot {
        let mut state_counts: BTreeMap<TaskState, usize> =
            TaskState::ALL.iter().map(|s| (*s, 0)).collect();
        for task in self.tasks.values() {
            *state_counts.entry(task.state).or_insert(0) += 1;
        }

        let window = self.config.throughput_window;
        let completed_in_window = self
            .completions
            .iter()
            .filter(|at| now.saturating_duration_since(**at) <= window)
            .count();
        let throughput = if window.is_zero() {
            0.0
        } else {
            completed_in_window as f64 / window.as_secs_f64()
        };

        MetricsSnapshot {
            state_counts,
            queue_depth: self.queue.len(),
            workers: self.workers.snapshot(now),
            throughput,
            completed_in_window,
            window,
            totals: self.totals,
        }
    }

    /// True when no task can make progress without new submissions: nothing
    /// is queued, running or waiting out a backoff.
    pub fn is_quiescent(&self) -> bool {
        !self.tasks.values().any(|t| {
            matches!(
                t.state,
                TaskState::Ready | TaskState::Running | TaskState::TimedOut | TaskState::Retrying
            )
        })
    }

    /// Pair ready tasks with idle workers until one side runs out.
    pub(super) fn dispatch(&mut self, now: Instant, actions: &mut Vec<CoreAction>) {
        if self.shutdown.is_some() {
            return;
        }

        while !self.queue.is_empty() {
            let Some(worker) = self.workers.pick_idle() else {
                break;
            };
            let Some(task_id) = self.queue.pop_max() else {
                break;
            };
            let Some(task) = self.tasks.get_mut(&task_id) else {
                continue;
            };
            if task.state != TaskState::Ready {
                debug!(task = %task_id, state = ?task.state, "queued task no longer ready; skipping");
                continue;
            }

            self.next_epoch += 1;
            let epoch = self.next_epoch;

            task.state = TaskState::Running;
            task.epoch = Some(epoch);
            task.worker = Some(worker.clone());
            task.started_at = Some(now);

            let dispatch = Dispatch {
                task: task_id.clone(),
                epoch,
                payload: task.payload.clone(),
                attempt: task.retry_count + 1,
                timeout: task.timeout,
            };

            self.workers.assign(&worker, &task_id, epoch);
            self.totals.dispatched += 1;

            info!(
                task = %task_id,
                worker = %worker,
                epoch,
                attempt = dispatch.attempt,
                "dispatching task"
            );

            actions.push(CoreAction::ArmTimer {
                key: TimerKey::TaskTimeout {
                    task: task_id,
                    epoch,
                },
                delay: dispatch.timeout,
            });
            actions.push(CoreAction::Execute { worker, dispatch });
        }
    }

    pub(super) fn spawn_workers(&mut self, n: usize, actions: &mut Vec<CoreAction>) {
        for _ in 0..n {
            let worker = self.workers.reserve_spawn();
            actions.push(CoreAction::SpawnWorker { worker });
        }
    }

    /// Add up to `n` workers to rotation. Retiring workers are taken back
    /// first; new ones are spawned only while the pool stays within
    /// `max_workers`.
    pub(super) fn grow(&mut self, n: usize, actions: &mut Vec<CoreAction>) {
        let kept = self.workers.unretire(n);
        let room = self
            .config
            .pool
            .max_workers
            .saturating_sub(self.workers.pool_size());
        self.spawn_workers((n - kept).min(room), actions);
    }

    pub(super) fn record_completion(&mut self, now: Instant) {
        self.completions.push_back(now);
        let window = self.config.throughput_window;
        while let Some(front) = self.completions.front() {
            if now.saturating_duration_since(*front) <= window {
                break;
            }
            self.completions.pop_front();
        }
    }

    /// Once shutdown has begun and nothing is running any more, stop every
    /// remaining worker and tell the shell to exit.
    fn finish_if_drained(&mut self, actions: &mut Vec<CoreAction>) -> bool {
        let Some(mode) = self.shutdown else {
            return true;
        };
        if self.tasks.values().any(|t| t.state == TaskState::Running) {
            return true;
        }

        for worker in self.workers.live_ids() {
            self.workers.remove(&worker);
            actions.push(CoreAction::StopWorker { worker });
        }
        info!(?mode, "scheduler drained; stopping");
        false
    }
}
