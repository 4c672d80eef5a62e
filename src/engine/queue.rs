// src/engine/queue.rs

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use tracing::debug;

use crate::types::TaskId;

/// One heap entry. Ordered so that the max-heap yields the highest priority
/// first and, among equal priorities, the lowest submission sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    priority: i64,
    seq: u64,
    task: TaskId,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Priority queue of `Ready` tasks.
///
/// Semantics:
/// - higher `priority` pops first;
/// - equal priorities pop in submission order (`seq`), never by id;
/// - `remove` is lazy: the id goes into a tombstone set and the stale heap
///   entry is dropped when it reaches the top, so pops stay O(log n)
///   amortised without scanning the heap.
#[derive(Debug, Default)]
pub struct ReadyQueue {
    heap: BinaryHeap<Entry>,
    tombstones: HashSet<TaskId>,
    len: usize,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, task: TaskId, priority: i64, seq: u64) {
        // Re-pushing an id that was removed but not yet swept revives it;
        // the tombstone must not swallow the new entry.
        if self.tombstones.remove(&task) {
            self.purge(&task);
        }
        self.heap.push(Entry {
            priority,
            seq,
            task,
        });
        self.len += 1;
    }

    /// Pop the highest-priority live task.
    pub fn pop_max(&mut self) -> Option<TaskId> {
        self.sweep_top();
        let entry = self.heap.pop()?;
        self.len -= 1;
        Some(entry.task)
    }

    /// Look at the highest-priority live task without removing it.
    ///
    /// Takes `&mut self` because it may drop removed entries sitting on top.
    pub fn peek(&mut self) -> Option<&TaskId> {
        self.sweep_top();
        self.heap.peek().map(|e| &e.task)
    }

    /// Lazily remove a queued task. The caller guarantees `task` is queued.
    pub fn remove(&mut self, task: &str) {
        if self.tombstones.insert(task.to_string()) {
            self.len = self.len.saturating_sub(1);
            debug!(task = %task, "ready queue: task tombstoned");
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of live (non-removed) entries.
    pub fn len(&self) -> usize {
        self.len
    }

    fn sweep_top(&mut self) {
        while let Some(top) = self.heap.peek() {
            if !self.tombstones.remove(&top.task) {
                break;
            }
            self.heap.pop();
        }
    }

    /// Drop the stale entry for `task`. Only used on the rare remove-then-push
    /// path, so a rebuild is acceptable here.
    fn purge(&mut self, task: &str) {
        let entries = std::mem::take(&mut self.heap).into_vec();
        self.heap = entries.into_iter().filter(|e| e.task != task).collect();
    }
}
