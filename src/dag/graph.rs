// src/dag/graph.rs

use std::collections::{HashMap, HashSet};

use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::debug;

use crate::errors::{CancelReason, Result, SchedulerError};
use crate::types::{CascadePolicy, TaskId};

/// Where a node stands from the graph's point of view.
///
/// The graph only cares about whether a task can still release its
/// dependents; the finer Ready/Running/retry distinctions live on the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// Named as a dependency but not submitted yet.
    Placeholder,
    /// Submitted, some dependency has not succeeded yet.
    Waiting,
    /// All dependencies succeeded; the task is in the scheduler's hands.
    Released,
    Succeeded,
    Failed,
    Cancelled,
}

impl NodeStatus {
    fn is_unresolved(self) -> bool {
        matches!(self, NodeStatus::Waiting | NodeStatus::Released)
    }
}

/// Result of admitting a task into the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Every dependency already succeeded.
    Ready,
    /// At least one dependency is still outstanding.
    Waiting,
    /// A dependency already failed or was cancelled; the task can never run.
    Blocked { ancestor: TaskId },
}

/// Internal node structure: stores immediate deps and dependents.
#[derive(Debug, Clone)]
struct DagNode {
    index: NodeIndex,
    status: NodeStatus,
    /// Submission order, used to release dependents deterministically.
    seq: u64,
    /// Direct dependencies: tasks that must succeed before this one can run.
    deps: Vec<TaskId>,
    /// Direct dependents: tasks that depend on this one.
    dependents: Vec<TaskId>,
    /// Number of dependencies that have not succeeded yet.
    unmet: usize,
}

/// Dependency DAG keyed by task id.
///
/// Nodes live in an arena keyed by id; edges are id references mirrored into
/// a `petgraph` graph (edge direction: dependency -> dependent) so that cycle
/// checks are plain reachability queries.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    policy: CascadePolicy,
    nodes: HashMap<TaskId, DagNode>,
    graph: DiGraph<TaskId, ()>,
}

impl DependencyGraph {
    pub fn new(policy: CascadePolicy) -> Self {
        Self {
            policy,
            nodes: HashMap::new(),
            graph: DiGraph::new(),
        }
    }

    pub fn policy(&self) -> CascadePolicy {
        self.policy
    }

    /// Whether `id` has been submitted (placeholders do not count).
    pub fn contains(&self, id: &str) -> bool {
        self.nodes
            .get(id)
            .is_some_and(|n| n.status != NodeStatus::Placeholder)
    }

    /// Number of submitted tasks.
    pub fn len(&self) -> usize {
        self.nodes
            .values()
            .filter(|n| n.status != NodeStatus::Placeholder)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn status_of(&self, id: &str) -> Option<NodeStatus> {
        self.nodes.get(id).map(|n| n.status)
    }

    /// Immediate dependencies of a task.
    pub fn dependencies_of(&self, id: &str) -> &[TaskId] {
        self.nodes
            .get(id)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate dependents of a task.
    pub fn dependents_of(&self, id: &str) -> &[TaskId] {
        self.nodes
            .get(id)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    /// Number of dependencies of `id` that have not succeeded yet.
    pub fn unmet_dependencies(&self, id: &str) -> Option<usize> {
        self.nodes.get(id).map(|n| n.unmet)
    }

    /// Admit a task with the given dependencies.
    ///
    /// Fails without touching the graph if the id was already submitted or if
    /// the new edges would close a cycle. A cycle is only possible when the id
    /// was referenced earlier as a forward dependency, in which case existing
    /// dependents of it may already reach one of the new dependencies.
    pub fn add_task(&mut self, id: &str, deps: &[TaskId], seq: u64) -> Result<Admission> {
        if self.contains(id) {
            return Err(SchedulerError::DuplicateTaskId(id.to_string()));
        }

        let mut unique: Vec<TaskId> = Vec::with_capacity(deps.len());
        let mut seen: HashSet<&str> = HashSet::new();
        for dep in deps {
            if dep == id {
                return Err(SchedulerError::CyclicDependency {
                    task: id.to_string(),
                    via: dep.clone(),
                });
            }
            if seen.insert(dep.as_str()) {
                unique.push(dep.clone());
            }
        }

        if let Some(existing) = self.nodes.get(id) {
            for dep in &unique {
                if let Some(dep_node) = self.nodes.get(dep) {
                    if has_path_connecting(&self.graph, existing.index, dep_node.index, None) {
                        return Err(SchedulerError::CyclicDependency {
                            task: id.to_string(),
                            via: dep.clone(),
                        });
                    }
                }
            }
        }

        // Checks passed; from here on the graph is mutated.
        let index = self.ensure_node(id);
        let mut unmet = 0;
        let mut blocked_by: Option<TaskId> = None;

        for dep in &unique {
            let dep_index = self.ensure_node(dep);
            self.graph.add_edge(dep_index, index, ());

            if let Some(dep_node) = self.nodes.get_mut(dep) {
                dep_node.dependents.push(id.to_string());
                match dep_node.status {
                    NodeStatus::Succeeded => {}
                    NodeStatus::Failed | NodeStatus::Cancelled => {
                        unmet += 1;
                        if blocked_by.is_none() {
                            blocked_by = Some(dep.clone());
                        }
                    }
                    _ => unmet += 1,
                }
            }
        }

        let status = if unmet == 0 {
            NodeStatus::Released
        } else {
            NodeStatus::Waiting
        };

        if let Some(node) = self.nodes.get_mut(id) {
            node.status = status;
            node.seq = seq;
            node.deps = unique;
            node.unmet = unmet;
        }

        debug!(task = %id, unmet, "task admitted into dependency graph");

        Ok(match blocked_by {
            Some(ancestor) => Admission::Blocked { ancestor },
            None if unmet == 0 => Admission::Ready,
            None => Admission::Waiting,
        })
    }

    /// Record that `id` succeeded and return the dependents that just had
    /// their last dependency satisfied, in submission order.
    pub fn mark_succeeded(&mut self, id: &str) -> Vec<TaskId> {
        let dependents = match self.nodes.get_mut(id) {
            Some(node) => {
                node.status = NodeStatus::Succeeded;
                node.dependents.clone()
            }
            None => return Vec::new(),
        };

        let mut released: Vec<(u64, TaskId)> = Vec::new();
        for dep_id in dependents {
            if let Some(node) = self.nodes.get_mut(&dep_id) {
                if node.status != NodeStatus::Waiting {
                    continue;
                }
                node.unmet = node.unmet.saturating_sub(1);
                if node.unmet == 0 {
                    node.status = NodeStatus::Released;
                    released.push((node.seq, dep_id));
                }
            }
        }

        released.sort();
        released.into_iter().map(|(_, id)| id).collect()
    }

    /// Record that `id` failed for good and cascade according to the policy.
    ///
    /// Returns every task that must now be cancelled, with its reason. The
    /// failed task itself is not included.
    pub fn mark_failed(&mut self, id: &str) -> Vec<(TaskId, CancelReason)> {
        if let Some(node) = self.nodes.get_mut(id) {
            node.status = NodeStatus::Failed;
        }

        let mut cancelled = self.cancel_descendants(id, CancelReason::AncestorFailed(id.to_string()));

        if self.policy == CascadePolicy::Strict {
            let mut rest: Vec<(u64, TaskId)> = self
                .nodes
                .iter()
                .filter(|(_, n)| n.status.is_unresolved())
                .map(|(other, n)| (n.seq, other.clone()))
                .collect();
            rest.sort();

            for (_, other) in rest {
                if let Some(node) = self.nodes.get_mut(&other) {
                    node.status = NodeStatus::Cancelled;
                }
                cancelled.push((other, CancelReason::FailFast(id.to_string())));
            }
        }

        cancelled
    }

    /// Record that `id` was cancelled and cancel every unresolved descendant.
    pub fn mark_cancelled(&mut self, id: &str) -> Vec<(TaskId, CancelReason)> {
        if let Some(node) = self.nodes.get_mut(id) {
            node.status = NodeStatus::Cancelled;
        }
        self.cancel_descendants(id, CancelReason::AncestorCancelled(id.to_string()))
    }

    fn cancel_descendants(&mut self, root: &str, reason: CancelReason) -> Vec<(TaskId, CancelReason)> {
        let mut stack: Vec<TaskId> = self.dependents_of(root).to_vec();
        let mut cancelled = Vec::new();

        while let Some(name) = stack.pop() {
            if let Some(node) = self.nodes.get_mut(&name) {
                if !node.status.is_unresolved() {
                    continue;
                }
                node.status = NodeStatus::Cancelled;
                debug!(task = %name, root = %root, "cancelling dependent after upstream cascade");
                stack.extend(node.dependents.iter().cloned());
                cancelled.push((name, reason.clone()));
            }
        }

        cancelled
    }

    fn ensure_node(&mut self, id: &str) -> NodeIndex {
        if let Some(node) = self.nodes.get(id) {
            return node.index;
        }
        let index = self.graph.add_node(id.to_string());
        self.nodes.insert(
            id.to_string(),
            DagNode {
                index,
                status: NodeStatus::Placeholder,
                seq: u64::MAX,
                deps: Vec::new(),
                dependents: Vec::new(),
                unmet: 0,
            },
        );
        index
    }
}
