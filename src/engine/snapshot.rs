// src/engine/snapshot.rs

//! Monitor view of the scheduler.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::dag::TaskState;
use crate::pool::registry::WorkerSnapshot;
use crate::pool::WorkerStatus;

/// Running totals since the scheduler started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Totals {
    pub submitted: u64,
    pub dispatched: u64,
    pub retries: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    /// Every state is present, zero counts included.
    pub state_counts: BTreeMap<TaskState, usize>,
    pub queue_depth: usize,
    pub workers: Vec<WorkerSnapshot>,
    /// Successful completions per second over the trailing window.
    pub throughput: f64,
    pub completed_in_window: usize,
    pub window: Duration,
    pub totals: Totals,
}

impl MetricsSnapshot {
    pub fn count(&self, state: TaskState) -> usize {
        self.state_counts.get(&state).copied().unwrap_or(0)
    }

    pub fn workers_with_status(&self, status: WorkerStatus) -> usize {
        self.workers.iter().filter(|w| w.status == status).count()
    }

    /// Live workers that still take new work.
    pub fn active_workers(&self) -> usize {
        self.workers
            .iter()
            .filter(|w| w.status != WorkerStatus::Dead && !w.retiring)
            .count()
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "tasks:")?;
        for (state, count) in &self.state_counts {
            writeln!(f, "  {:<10} {count}", format!("{state:?}"))?;
        }
        writeln!(f, "queue depth: {}", self.queue_depth)?;
        writeln!(
            f,
            "workers: {} idle, {} busy, {} dead",
            self.workers_with_status(WorkerStatus::Idle),
            self.workers_with_status(WorkerStatus::Busy),
            self.workers_with_status(WorkerStatus::Dead),
        )?;
        writeln!(
            f,
            "throughput: {:.3}/s ({} in last {:?})",
            self.throughput, self.completed_in_window, self.window
        )?;
        write!(
            f,
            "totals: {} submitted, {} dispatched, {} retries, {} succeeded, {} failed, {} cancelled",
            self.totals.submitted,
            self.totals.dispatched,
            self.totals.retries,
            self.totals.succeeded,
            self.totals.failed,
            self.totals.cancelled,
        )
    }
}
