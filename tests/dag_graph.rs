// tests/dag_graph.rs

use std::collections::{HashMap, HashSet};

use proptest::prelude::*;

use dagpool::dag::{Admission, DependencyGraph, NodeStatus};
use dagpool::errors::{CancelReason, SchedulerError};
use dagpool::types::{CascadePolicy, TaskId};

fn ids(names: &[&str]) -> Vec<TaskId> {
    names.iter().map(|s| s.to_string()).collect()
}

#[test]
fn root_task_is_ready_and_dependent_waits() {
    let mut g = DependencyGraph::new(CascadePolicy::Branch);

    assert_eq!(g.add_task("A", &[], 0).unwrap(), Admission::Ready);
    assert_eq!(g.add_task("B", &ids(&["A"]), 1).unwrap(), Admission::Waiting);

    assert_eq!(g.status_of("A"), Some(NodeStatus::Released));
    assert_eq!(g.status_of("B"), Some(NodeStatus::Waiting));
    assert_eq!(g.unmet_dependencies("B"), Some(1));
    assert_eq!(g.dependents_of("A"), ids(&["B"]).as_slice());
}

#[test]
fn dependency_on_succeeded_task_is_already_met() {
    let mut g = DependencyGraph::new(CascadePolicy::Branch);
    g.add_task("A", &[], 0).unwrap();
    assert!(g.mark_succeeded("A").is_empty());

    assert_eq!(g.add_task("B", &ids(&["A"]), 1).unwrap(), Admission::Ready);
}

#[test]
fn duplicate_id_is_rejected_without_touching_the_graph() {
    let mut g = DependencyGraph::new(CascadePolicy::Branch);
    g.add_task("A", &[], 0).unwrap();
    g.add_task("B", &[], 1).unwrap();

    let err = g.add_task("A", &ids(&["B"]), 2).unwrap_err();
    assert!(matches!(err, SchedulerError::DuplicateTaskId(ref id) if id == "A"));

    assert_eq!(g.len(), 2);
    assert!(g.dependencies_of("A").is_empty());
    assert!(g.dependents_of("B").is_empty());
}

#[test]
fn self_dependency_is_a_cycle() {
    let mut g = DependencyGraph::new(CascadePolicy::Branch);

    let err = g.add_task("A", &ids(&["A"]), 0).unwrap_err();
    assert!(matches!(err, SchedulerError::CyclicDependency { .. }));
    assert!(!g.contains("A"));
    assert!(g.is_empty());
}

#[test]
fn forward_reference_that_closes_a_cycle_is_rejected() {
    let mut g = DependencyGraph::new(CascadePolicy::Branch);

    // A waits on B, which does not exist yet.
    assert_eq!(g.add_task("A", &ids(&["B"]), 0).unwrap(), Admission::Waiting);
    assert!(!g.contains("B"));
    assert_eq!(g.status_of("B"), Some(NodeStatus::Placeholder));

    // B -> A would close the loop A -> B -> A.
    let err = g.add_task("B", &ids(&["A"]), 1).unwrap_err();
    match err {
        SchedulerError::CyclicDependency { task, via } => {
            assert_eq!(task, "B");
            assert_eq!(via, "A");
        }
        other => panic!("expected CyclicDependency, got {other:?}"),
    }

    // Nothing changed: B is still only a placeholder, A still waits on it.
    assert!(!g.contains("B"));
    assert_eq!(g.status_of("A"), Some(NodeStatus::Waiting));
    assert_eq!(g.unmet_dependencies("A"), Some(1));

    // B can still be submitted without the offending edge.
    assert_eq!(g.add_task("B", &[], 2).unwrap(), Admission::Ready);
    assert_eq!(g.mark_succeeded("B"), ids(&["A"]));
}

#[test]
fn longer_forward_cycle_is_rejected() {
    let mut g = DependencyGraph::new(CascadePolicy::Branch);
    g.add_task("B", &ids(&["C"]), 0).unwrap();
    g.add_task("A", &ids(&["B"]), 1).unwrap();

    // C -> A closes C -> B -> A -> C.
    assert!(matches!(
        g.add_task("C", &ids(&["A"]), 2),
        Err(SchedulerError::CyclicDependency { .. })
    ));
    assert_eq!(g.len(), 2);
}

#[test]
fn mark_succeeded_releases_only_fully_satisfied_dependents_in_submission_order() {
    let mut g = DependencyGraph::new(CascadePolicy::Branch);
    g.add_task("root", &[], 0).unwrap();
    g.add_task("other", &[], 1).unwrap();
    g.add_task("late", &ids(&["root"]), 5).unwrap();
    g.add_task("early", &ids(&["root"]), 2).unwrap();
    g.add_task("both", &ids(&["root", "other"]), 3).unwrap();

    assert_eq!(g.mark_succeeded("root"), ids(&["early", "late"]));
    assert_eq!(g.unmet_dependencies("both"), Some(1));

    assert_eq!(g.mark_succeeded("other"), ids(&["both"]));
}

#[test]
fn duplicate_dependencies_count_once() {
    let mut g = DependencyGraph::new(CascadePolicy::Branch);
    g.add_task("A", &[], 0).unwrap();
    g.add_task("B", &ids(&["A", "A"]), 1).unwrap();

    assert_eq!(g.unmet_dependencies("B"), Some(1));
    assert_eq!(g.mark_succeeded("A"), ids(&["B"]));
}

#[test]
fn branch_failure_cancels_only_descendants() {
    let mut g = DependencyGraph::new(CascadePolicy::Branch);
    g.add_task("A", &[], 0).unwrap();
    g.add_task("B", &ids(&["A"]), 1).unwrap();
    g.add_task("C", &ids(&["B"]), 2).unwrap();
    g.add_task("X", &[], 3).unwrap();

    let cancelled: HashMap<TaskId, CancelReason> = g.mark_failed("A").into_iter().collect();

    assert_eq!(cancelled.len(), 2);
    assert_eq!(cancelled["B"], CancelReason::AncestorFailed("A".into()));
    assert_eq!(cancelled["C"], CancelReason::AncestorFailed("A".into()));
    assert_eq!(g.status_of("X"), Some(NodeStatus::Released));
}

#[test]
fn strict_failure_cancels_every_unresolved_task() {
    let mut g = DependencyGraph::new(CascadePolicy::Strict);
    g.add_task("A", &[], 0).unwrap();
    g.add_task("B", &ids(&["A"]), 1).unwrap();
    g.add_task("X", &[], 2).unwrap();
    g.add_task("Y", &ids(&["X"]), 3).unwrap();
    g.add_task("done", &[], 4).unwrap();
    g.mark_succeeded("done");

    let cancelled: HashMap<TaskId, CancelReason> = g.mark_failed("A").into_iter().collect();

    assert_eq!(cancelled["B"], CancelReason::AncestorFailed("A".into()));
    assert_eq!(cancelled["X"], CancelReason::FailFast("A".into()));
    assert_eq!(cancelled["Y"], CancelReason::FailFast("A".into()));
    assert!(!cancelled.contains_key("done"));
    assert_eq!(g.status_of("done"), Some(NodeStatus::Succeeded));
}

#[test]
fn cancelling_a_task_cascades_with_ancestor_cancelled() {
    let mut g = DependencyGraph::new(CascadePolicy::Strict);
    g.add_task("A", &[], 0).unwrap();
    g.add_task("B", &ids(&["A"]), 1).unwrap();
    g.add_task("X", &[], 2).unwrap();

    let cancelled = g.mark_cancelled("A");

    // Cancellation never fails fast, even under the strict policy.
    assert_eq!(cancelled, vec![("B".to_string(), CancelReason::AncestorCancelled("A".into()))]);
    assert_eq!(g.status_of("X"), Some(NodeStatus::Released));
}

#[test]
fn task_added_after_its_dependency_failed_is_blocked() {
    let mut g = DependencyGraph::new(CascadePolicy::Branch);
    g.add_task("A", &[], 0).unwrap();
    g.mark_failed("A");

    assert_eq!(
        g.add_task("B", &ids(&["A"]), 1).unwrap(),
        Admission::Blocked {
            ancestor: "A".into()
        }
    );
}

/// Reference model: does `to` reach `from` through accepted edges?
fn reaches(edges: &HashMap<usize, Vec<usize>>, from: usize, to: usize) -> bool {
    let mut stack = vec![from];
    let mut seen = HashSet::new();
    while let Some(n) = stack.pop() {
        if n == to {
            return true;
        }
        if seen.insert(n) {
            if let Some(next) = edges.get(&n) {
                stack.extend(next.iter().copied());
            }
        }
    }
    false
}

fn submissions_strategy() -> impl Strategy<Value = Vec<(usize, Vec<usize>)>> {
    proptest::collection::vec(
        (0..8usize, proptest::collection::vec(0..8usize, 0..4)),
        1..24,
    )
}

proptest! {
    /// Submissions in arbitrary order (forward references included) are
    /// accepted exactly when they neither repeat an id nor close a cycle,
    /// and rejected ones leave the graph as it was.
    #[test]
    fn admission_matches_reference_model(submissions in submissions_strategy()) {
        let mut g = DependencyGraph::new(CascadePolicy::Branch);
        let mut submitted: HashSet<usize> = HashSet::new();
        // Edge direction: dependency -> dependent.
        let mut edges: HashMap<usize, Vec<usize>> = HashMap::new();

        for (seq, (id, deps)) in submissions.into_iter().enumerate() {
            let name = format!("t{id}");
            let dep_names: Vec<TaskId> = deps.iter().map(|d| format!("t{d}")).collect();
            let before = g.len();

            let duplicate = submitted.contains(&id);
            let cyclic = deps.iter().any(|&d| d == id || reaches(&edges, id, d));

            let result = g.add_task(&name, &dep_names, seq as u64);

            if duplicate {
                prop_assert!(
                    matches!(result, Err(SchedulerError::DuplicateTaskId(_))),
                    "expected duplicate rejection"
                );
                prop_assert_eq!(g.len(), before);
            } else if cyclic {
                prop_assert!(
                    matches!(result, Err(SchedulerError::CyclicDependency { .. })),
                    "expected cycle rejection"
                );
                prop_assert_eq!(g.len(), before);
                prop_assert!(!g.contains(&name));
            } else {
                prop_assert!(result.is_ok(), "unexpected rejection: {:?}", result);
                prop_assert_eq!(g.len(), before + 1);
                submitted.insert(id);
                for d in deps {
                    edges.entry(d).or_default().push(id);
                }
            }
        }
    }

    /// Completing tasks in release order eventually succeeds every task
    /// whose dependencies were all submitted.
    #[test]
    fn releasing_in_order_drains_a_layered_dag(
        raw in proptest::collection::vec(proptest::collection::vec(any::<usize>(), 0..3), 1..12)
    ) {
        let mut g = DependencyGraph::new(CascadePolicy::Branch);
        let mut ready: Vec<TaskId> = Vec::new();

        for (i, potential) in raw.iter().enumerate() {
            let deps: Vec<TaskId> = if i == 0 {
                Vec::new()
            } else {
                potential.iter().map(|d| format!("t{}", d % i)).collect()
            };
            if g.add_task(&format!("t{i}"), &deps, i as u64).unwrap() == Admission::Ready {
                ready.push(format!("t{i}"));
            }
        }

        let mut done = 0;
        while let Some(next) = ready.pop() {
            done += 1;
            ready.extend(g.mark_succeeded(&next));
        }
        prop_assert_eq!(done, raw.len());
    }
}
