// src/pool/registry.rs

//! Worker bookkeeping owned by the scheduler core.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::types::{DispatchEpoch, TaskId, WorkerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WorkerStatus {
    Idle,
    Busy,
    Dead,
}

/// The attempt a worker is currently running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub task: TaskId,
    pub epoch: DispatchEpoch,
}

#[derive(Debug, Clone)]
pub struct WorkerEntry {
    pub id: WorkerId,
    pub status: WorkerStatus,
    pub current: Option<Assignment>,
    pub last_heartbeat: Instant,
    pub idle_since: Instant,
    /// Chosen for scale-down: takes no new work, stopped once idle.
    pub retiring: bool,
    /// Set while a cancel sent to this worker awaits acknowledgement.
    pub cancel_deadline: Option<Instant>,
}

impl WorkerEntry {
    fn assignable(&self) -> bool {
        self.status == WorkerStatus::Idle && !self.retiring
    }
}

/// What happened when a worker reported the end of an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Back in rotation.
    Idle,
    /// Was retiring; removed from the registry and should be stopped.
    Retired,
    /// The result did not match the worker's current assignment.
    NotCurrent,
}

/// Read-only view of a worker for the monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSnapshot {
    pub id: WorkerId,
    pub status: WorkerStatus,
    pub current_task: Option<TaskId>,
    pub retiring: bool,
    pub since_heartbeat: Duration,
}

/// How many dead workers stay listed for the monitor. Older ones are
/// forgotten.
pub const DEAD_WORKERS_KEPT: usize = 16;

/// Liveness, assignment and membership state of every worker.
///
/// The most recent [`DEAD_WORKERS_KEPT`] dead workers stay listed until they
/// register again.
#[derive(Debug)]
pub struct WorkerRegistry {
    workers: BTreeMap<WorkerId, WorkerEntry>,
    /// Dead worker ids, oldest death first.
    dead: VecDeque<WorkerId>,
    heartbeat_interval: Duration,
    /// Spawn requested but not registered yet.
    pending_spawns: BTreeSet<WorkerId>,
    next_spawn: u64,
}

impl WorkerRegistry {
    pub fn new(heartbeat_interval: Duration) -> Self {
        Self {
            workers: BTreeMap::new(),
            dead: VecDeque::new(),
            heartbeat_interval,
            pending_spawns: BTreeSet::new(),
            next_spawn: 0,
        }
    }

    pub fn get(&self, id: &str) -> Option<&WorkerEntry> {
        self.workers.get(id)
    }

    pub fn is_live(&self, id: &str) -> bool {
        self.workers
            .get(id)
            .is_some_and(|w| w.status != WorkerStatus::Dead)
    }

    /// Add a worker to rotation, or bring a dead one back.
    ///
    /// Returns `false` if the worker is already live (the call then only
    /// counts as a heartbeat).
    pub fn register(&mut self, id: &str, now: Instant) -> bool {
        self.pending_spawns.remove(id);

        if let Some(existing) = self.workers.get_mut(id) {
            if existing.status != WorkerStatus::Dead {
                existing.last_heartbeat = now;
                return false;
            }
            self.dead.retain(|d| d != id);
        }

        self.workers.insert(
            id.to_string(),
            WorkerEntry {
                id: id.to_string(),
                status: WorkerStatus::Idle,
                current: None,
                last_heartbeat: now,
                idle_since: now,
                retiring: false,
                cancel_deadline: None,
            },
        );
        info!(worker = %id, "worker registered");
        true
    }

    /// Record a heartbeat. Dead and unknown workers are ignored; they have to
    /// register again.
    pub fn heartbeat(&mut self, id: &str, at: Instant) -> bool {
        match self.workers.get_mut(id) {
            Some(w) if w.status != WorkerStatus::Dead => {
                if at > w.last_heartbeat {
                    w.last_heartbeat = at;
                }
                true
            }
            _ => false,
        }
    }

    /// Idle, non-retiring worker that has waited longest (ties by id).
    pub fn pick_idle(&self) -> Option<WorkerId> {
        self.workers
            .values()
            .filter(|w| w.assignable())
            .min_by(|a, b| a.idle_since.cmp(&b.idle_since).then_with(|| a.id.cmp(&b.id)))
            .map(|w| w.id.clone())
    }

    pub fn assign(&mut self, id: &str, task: &str, epoch: DispatchEpoch) {
        if let Some(w) = self.workers.get_mut(id) {
            w.status = WorkerStatus::Busy;
            w.current = Some(Assignment {
                task: task.to_string(),
                epoch,
            });
        }
    }

    /// Free a worker whose attempt `(task, epoch)` just ended.
    pub fn release(&mut self, id: &str, task: &str, epoch: DispatchEpoch, now: Instant) -> Release {
        let Some(w) = self.workers.get_mut(id) else {
            return Release::NotCurrent;
        };
        let matches = w
            .current
            .as_ref()
            .is_some_and(|a| a.task == task && a.epoch == epoch);
        if !matches || w.status == WorkerStatus::Dead {
            return Release::NotCurrent;
        }

        w.current = None;
        w.cancel_deadline = None;

        if w.retiring {
            self.workers.remove(id);
            info!(worker = %id, "retiring worker finished its task; removed");
            Release::Retired
        } else {
            w.status = WorkerStatus::Idle;
            w.idle_since = now;
            Release::Idle
        }
    }

    pub fn mark_cancelling(&mut self, id: &str, deadline: Instant) {
        if let Some(w) = self.workers.get_mut(id) {
            w.cancel_deadline = Some(deadline);
        }
    }

    /// Mark a worker dead and hand back whatever it was running.
    pub fn mark_dead(&mut self, id: &str) -> Option<Assignment> {
        let w = self.workers.get_mut(id)?;
        if w.status == WorkerStatus::Dead {
            return None;
        }
        w.status = WorkerStatus::Dead;
        w.retiring = false;
        w.cancel_deadline = None;
        let assignment = w.current.take();

        self.dead.push_back(id.to_string());
        while self.dead.len() > DEAD_WORKERS_KEPT {
            if let Some(oldest) = self.dead.pop_front() {
                debug!(worker = %oldest, "forgetting dead worker");
                self.workers.remove(&oldest);
            }
        }
        assignment
    }

    /// Workers that missed two consecutive heartbeat intervals. They are
    /// marked dead here; the caller deals with their in-flight attempts.
    pub fn sweep(&mut self, now: Instant) -> Vec<(WorkerId, Option<Assignment>)> {
        let limit = self.heartbeat_interval * 2;
        let overdue: Vec<WorkerId> = self
            .workers
            .values()
            .filter(|w| w.status != WorkerStatus::Dead)
            .filter(|w| now.saturating_duration_since(w.last_heartbeat) > limit)
            .map(|w| w.id.clone())
            .collect();

        overdue
            .into_iter()
            .map(|id| {
                warn!(worker = %id, "worker missed two heartbeat intervals; marking dead");
                let assignment = self.mark_dead(&id);
                (id, assignment)
            })
            .collect()
    }

    /// Remove a worker outright (scale-down of an idle worker, shutdown).
    pub fn remove(&mut self, id: &str) -> Option<WorkerEntry> {
        self.dead.retain(|d| d != id);
        self.workers.remove(id)
    }

    /// Reserve a fresh id for a worker about to be spawned.
    pub fn reserve_spawn(&mut self) -> WorkerId {
        loop {
            self.next_spawn += 1;
            let id = format!("worker-{}", self.next_spawn);
            if !self.workers.contains_key(&id) && !self.pending_spawns.contains(&id) {
                self.pending_spawns.insert(id.clone());
                return id;
            }
        }
    }

    pub fn is_pending_spawn(&self, id: &str) -> bool {
        self.pending_spawns.contains(id)
    }

    pub fn spawn_failed(&mut self, id: &str) {
        if self.pending_spawns.remove(id) {
            debug!(worker = %id, "pending spawn dropped");
        }
    }

    /// Pick up to `n` workers to retire. Idle workers go first (they are
    /// removed at once); busy ones are marked retiring and left running.
    ///
    /// Returns the ids removed immediately.
    pub fn retire(&mut self, n: usize) -> Vec<WorkerId> {
        let mut idle: Vec<(Instant, WorkerId)> = self
            .workers
            .values()
            .filter(|w| w.assignable())
            .map(|w| (w.idle_since, w.id.clone()))
            .collect();
        // Most recently idle first, so long-idle workers keep their place.
        idle.sort_by(|a, b| b.cmp(a));

        let mut removed = Vec::new();
        for (_, id) in idle.into_iter().take(n) {
            self.workers.remove(&id);
            removed.push(id);
        }

        let mut remaining = n - removed.len();
        if remaining > 0 {
            for w in self.workers.values_mut() {
                if remaining == 0 {
                    break;
                }
                if w.status == WorkerStatus::Busy && !w.retiring {
                    w.retiring = true;
                    info!(worker = %w.id, "worker marked retiring; will stop after current task");
                    remaining -= 1;
                }
            }
        }

        removed
    }

    /// Take back up to `n` retiring workers. Returns how many were kept.
    pub fn unretire(&mut self, n: usize) -> usize {
        let mut kept = 0;
        for w in self.workers.values_mut() {
            if kept == n {
                break;
            }
            if w.retiring && w.status != WorkerStatus::Dead {
                w.retiring = false;
                info!(worker = %w.id, "retiring worker kept in the pool");
                kept += 1;
            }
        }
        kept
    }

    /// Ids of every live worker (shutdown uses this).
    pub fn live_ids(&self) -> Vec<WorkerId> {
        self.workers
            .values()
            .filter(|w| w.status != WorkerStatus::Dead)
            .map(|w| w.id.clone())
            .collect()
    }

    pub fn idle_count(&self) -> usize {
        self.workers.values().filter(|w| w.assignable()).count()
    }

    pub fn busy_count(&self) -> usize {
        self.workers
            .values()
            .filter(|w| w.status == WorkerStatus::Busy)
            .count()
    }

    /// Workers that count toward the pool size: live, not retiring, plus
    /// spawns still in flight.
    pub fn effective_count(&self) -> usize {
        let live = self
            .workers
            .values()
            .filter(|w| w.status != WorkerStatus::Dead && !w.retiring)
            .count();
        live + self.pending_spawns.len()
    }

    /// Every worker still holding a slot: live ones, retiring included, and
    /// spawns in flight. This is what `max_workers` caps.
    pub fn pool_size(&self) -> usize {
        let live = self
            .workers
            .values()
            .filter(|w| w.status != WorkerStatus::Dead)
            .count();
        live + self.pending_spawns.len()
    }

    pub fn snapshot(&self, now: Instant) -> Vec<WorkerSnapshot> {
        self.workers
            .values()
            .map(|w| WorkerSnapshot {
                id: w.id.clone(),
                status: w.status,
                current_task: w.current.as_ref().map(|a| a.task.clone()),
                retiring: w.retiring,
                since_heartbeat: now.saturating_duration_since(w.last_heartbeat),
            })
            .collect()
    }
}
