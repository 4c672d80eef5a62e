// tests/core_scheduling.rs

use dagpool::dag::{TaskSpec, TaskState};
use dagpool::errors::{CancelReason, SchedulerError};
use dagpool_test_utils::builders::test_scheduler_config;
use dagpool_test_utils::harness::{CoreHarness, executes, only_execute};
use dagpool_test_utils::init_tracing;

fn harness() -> CoreHarness {
    init_tracing();
    CoreHarness::new(test_scheduler_config())
}

#[test]
fn dependency_gates_higher_priority_dependent() {
    let mut h = harness();
    h.register("w1");
    h.register("w2");

    let step = h.submit(TaskSpec::new("A", "a").priority(5)).unwrap();
    let (worker_a, dispatch_a) = only_execute(&step);
    assert_eq!(dispatch_a.task, "A");
    assert_eq!(dispatch_a.attempt, 1);

    // B outranks A but must wait for it, even with an idle worker around.
    let step = h
        .submit(TaskSpec::new("B", "b").priority(10).after("A"))
        .unwrap();
    assert!(executes(&step).is_empty());
    assert_eq!(h.state("B"), TaskState::Pending);

    let step = h.succeed(&worker_a, &dispatch_a);
    assert_eq!(h.state("A"), TaskState::Succeeded);
    let (_, dispatch_b) = only_execute(&step);
    assert_eq!(dispatch_b.task, "B");
    assert!(dispatch_b.epoch > dispatch_a.epoch);
}

#[test]
fn ready_tasks_dispatch_by_priority_then_submission_order() {
    let mut h = harness();

    h.submit(TaskSpec::new("a", "a").priority(1)).unwrap();
    h.submit(TaskSpec::new("b", "b").priority(5)).unwrap();
    h.submit(TaskSpec::new("c", "c").priority(5)).unwrap();
    h.submit(TaskSpec::new("d", "d").priority(1)).unwrap();
    assert_eq!(h.state("a"), TaskState::Ready);

    let mut order = Vec::new();
    let mut step = h.register("w1");
    for _ in 0..4 {
        let (worker, dispatch) = only_execute(&step);
        order.push(dispatch.task.clone());
        step = h.succeed(&worker, &dispatch);
    }
    assert!(executes(&step).is_empty());
    assert_eq!(order, vec!["b", "c", "a", "d"]);
}

#[test]
fn idle_worker_that_waited_longest_gets_the_next_task() {
    let mut h = harness();
    h.register("w2");
    h.advance(std::time::Duration::from_millis(10));
    h.register("w1");

    let step = h.submit(TaskSpec::new("A", "a")).unwrap();
    let (worker, _) = only_execute(&step);
    assert_eq!(worker, "w2");
}

#[test]
fn diamond_runs_join_only_after_both_branches() {
    let mut h = harness();
    for w in ["w1", "w2", "w3"] {
        h.register(w);
    }

    let step = h.submit(TaskSpec::new("root", "r")).unwrap();
    let (w, d) = only_execute(&step);
    h.submit(TaskSpec::new("left", "l").after("root")).unwrap();
    h.submit(TaskSpec::new("right", "r").after("root")).unwrap();
    h.submit(TaskSpec::new("join", "j").after("left").after("right"))
        .unwrap();

    let step = h.succeed(&w, &d);
    let branches = executes(&step);
    let names: Vec<_> = branches.iter().map(|(_, d)| d.task.as_str()).collect();
    assert_eq!(names, vec!["left", "right"]);

    let step = h.succeed(&branches[0].0, &branches[0].1);
    assert!(executes(&step).is_empty());
    assert_eq!(h.state("join"), TaskState::Pending);

    let step = h.succeed(&branches[1].0, &branches[1].1);
    let (_, d) = only_execute(&step);
    assert_eq!(d.task, "join");
}

#[test]
fn cancelling_a_pending_task_means_it_never_runs() {
    let mut h = harness();

    h.submit(TaskSpec::new("A", "a")).unwrap();
    h.submit(TaskSpec::new("B", "b").after("A")).unwrap();
    h.submit(TaskSpec::new("C", "c").after("B")).unwrap();

    h.cancel("B").unwrap();
    assert_eq!(h.state("B"), TaskState::Cancelled);
    assert_eq!(
        h.snapshot("B").cancel_reason(),
        Some(&CancelReason::Requested)
    );
    assert_eq!(
        h.snapshot("C").cancel_reason(),
        Some(&CancelReason::AncestorCancelled("B".into()))
    );

    let step = h.register("w1");
    let (w, d) = only_execute(&step);
    assert_eq!(d.task, "A");

    let step = h.succeed(&w, &d);
    assert!(executes(&step).is_empty());
    assert_eq!(h.state("B"), TaskState::Cancelled);
}

#[test]
fn cancelling_a_ready_task_drops_it_from_the_queue() {
    let mut h = harness();

    h.submit(TaskSpec::new("A", "a").priority(9)).unwrap();
    h.submit(TaskSpec::new("B", "b")).unwrap();
    h.cancel("A").unwrap();

    let step = h.register("w1");
    let (_, d) = only_execute(&step);
    assert_eq!(d.task, "B");
    assert_eq!(h.core.metrics(h.now).queue_depth, 0);
}

#[test]
fn cancel_of_finished_task_is_a_no_op_and_unknown_task_is_an_error() {
    let mut h = harness();
    h.register("w1");

    let step = h.submit(TaskSpec::new("A", "a")).unwrap();
    let (w, d) = only_execute(&step);
    h.succeed(&w, &d);

    h.cancel("A").unwrap();
    assert_eq!(h.state("A"), TaskState::Succeeded);

    assert!(matches!(
        h.cancel("nope"),
        Err(SchedulerError::TaskNotFound(ref id)) if id == "nope"
    ));
}

#[test]
fn duplicate_submission_is_rejected_and_changes_nothing() {
    let mut h = harness();

    h.submit(TaskSpec::new("A", "a").priority(1)).unwrap();
    let err = h
        .submit(TaskSpec::new("A", "other").priority(9).after("X"))
        .unwrap_err();
    assert!(matches!(err, SchedulerError::DuplicateTaskId(ref id) if id == "A"));

    let snapshot = h.snapshot("A");
    assert_eq!(snapshot.priority, 1);
    assert!(snapshot.dependencies.is_empty());
    assert_eq!(snapshot.state, TaskState::Ready);
    assert_eq!(h.core.graph().len(), 1);
    assert_eq!(h.core.metrics(h.now).totals.submitted, 1);
}

#[test]
fn cyclic_submission_is_rejected_and_leaves_no_trace() {
    let mut h = harness();

    h.submit(TaskSpec::new("A", "a").after("B")).unwrap();
    assert_eq!(h.state("A"), TaskState::Pending);

    let err = h.submit(TaskSpec::new("B", "b").after("A")).unwrap_err();
    assert!(matches!(err, SchedulerError::CyclicDependency { .. }));
    assert!(matches!(
        h.core.status("B"),
        Err(SchedulerError::TaskNotFound(_))
    ));

    let err = h.submit(TaskSpec::new("C", "c").after("C")).unwrap_err();
    assert!(matches!(err, SchedulerError::CyclicDependency { .. }));

    // B without the back edge is fine and releases A.
    h.submit(TaskSpec::new("B", "b")).unwrap();
    let step = h.register("w1");
    let (w, d) = only_execute(&step);
    assert_eq!(d.task, "B");
    let step = h.succeed(&w, &d);
    assert_eq!(only_execute(&step).1.task, "A");
}

#[test]
fn task_submitted_after_its_dependency_failed_is_cancelled_on_admission() {
    let mut h = harness();
    h.register("w1");

    let step = h.submit(TaskSpec::new("A", "a")).unwrap();
    let (w, d) = only_execute(&step);
    h.fail(&w, &d, "boom");
    assert_eq!(h.state("A"), TaskState::Failed);

    h.submit(TaskSpec::new("B", "b").after("A")).unwrap();
    assert_eq!(h.state("B"), TaskState::Cancelled);
    assert_eq!(
        h.snapshot("B").cancel_reason(),
        Some(&CancelReason::AncestorFailed("A".into()))
    );
}

#[test]
fn waiting_on_unsubmitted_dependency_counts_as_quiescent() {
    let mut h = harness();
    h.register("w1");

    h.submit(TaskSpec::new("A", "a").after("later")).unwrap();
    assert!(h.core.is_quiescent());

    let step = h.submit(TaskSpec::new("later", "l")).unwrap();
    assert!(!h.core.is_quiescent());
    let (w, d) = only_execute(&step);
    let step = h.succeed(&w, &d);
    let (w, d) = only_execute(&step);
    h.succeed(&w, &d);
    assert!(h.core.is_quiescent());
}

#[test]
fn metrics_count_states_and_recent_throughput() {
    let mut h = harness();
    h.register("w1");

    let step = h.submit(TaskSpec::new("A", "a")).unwrap();
    let (w, d) = only_execute(&step);
    h.submit(TaskSpec::new("B", "b")).unwrap();
    h.submit(TaskSpec::new("C", "c").after("A")).unwrap();

    let m = h.core.metrics(h.now);
    assert_eq!(m.count(TaskState::Running), 1);
    assert_eq!(m.count(TaskState::Ready), 1);
    assert_eq!(m.count(TaskState::Pending), 1);
    assert_eq!(m.queue_depth, 1);
    assert_eq!(m.workers.len(), 1);
    assert_eq!(m.workers[0].current_task.as_deref(), Some("A"));

    h.succeed(&w, &d);
    let m = h.core.metrics(h.now);
    assert_eq!(m.count(TaskState::Succeeded), 1);
    assert_eq!(m.completed_in_window, 1);
    assert!((m.throughput - 1.0 / 60.0).abs() < 1e-9);
    assert_eq!(m.totals.dispatched, 2);

    // Completions age out of the window.
    h.advance(std::time::Duration::from_secs(61));
    assert_eq!(h.core.metrics(h.now).completed_in_window, 0);
}
