// tests/core_failures.rs

use std::time::Duration;

use dagpool::dag::{TaskSpec, TaskState};
use dagpool::engine::Command;
use dagpool::errors::{CancelReason, TaskFailure};
use dagpool::pool::{ResultStatus, WorkerStatus};
use dagpool::types::CascadePolicy;
use dagpool_test_utils::builders::test_scheduler_config;
use dagpool_test_utils::harness::{
    CoreHarness, backoff_delay, cancels, executes, only_execute, stopped,
};
use dagpool_test_utils::init_tracing;

fn harness() -> CoreHarness {
    init_tracing();
    CoreHarness::new(test_scheduler_config())
}

#[test]
fn timeouts_retry_with_growing_backoff_then_fail_and_cascade() {
    let mut h = harness();
    h.register("w1");

    let step = h
        .submit(
            TaskSpec::new("T", "t")
                .max_retries(3)
                .timeout(Duration::from_secs(1)),
        )
        .unwrap();
    h.submit(TaskSpec::new("D", "d").after("T")).unwrap();
    let (worker, mut dispatch) = only_execute(&step);

    let mut delays = Vec::new();
    for attempt in 1..=3u32 {
        h.advance(Duration::from_secs(1));
        let step = h.time_out("T", dispatch.epoch);
        assert_eq!(h.state("T"), TaskState::TimedOut);
        assert_eq!(
            cancels(&step),
            vec![(worker.clone(), "T".to_string(), dispatch.epoch)]
        );
        let delay = backoff_delay(&step).expect("retry should arm a backoff timer");
        delays.push(delay);

        // The worker acknowledges; the task itself is already past this attempt.
        let step = h.report(&worker, &dispatch, ResultStatus::Cancelled);
        assert!(executes(&step).is_empty());
        assert_eq!(h.state("T"), TaskState::TimedOut);

        h.advance(delay);
        let step = h.backoff_elapsed("T", dispatch.epoch);
        let (_, next) = only_execute(&step);
        assert_eq!(next.attempt, attempt + 1);
        assert!(next.epoch > dispatch.epoch);
        dispatch = next;
    }

    assert_eq!(
        delays,
        vec![
            Duration::from_millis(100),
            Duration::from_millis(200),
            Duration::from_millis(400)
        ]
    );

    h.advance(Duration::from_secs(1));
    let step = h.time_out("T", dispatch.epoch);
    assert!(backoff_delay(&step).is_none());

    let snapshot = h.snapshot("T");
    assert_eq!(snapshot.state, TaskState::Failed);
    assert_eq!(snapshot.retry_count, 3);
    assert_eq!(
        snapshot.failure(),
        Some(&TaskFailure::MaxRetriesExceeded {
            attempts: 4,
            last: Box::new(TaskFailure::WorkerTimeout),
        })
    );
    assert_eq!(
        h.snapshot("D").cancel_reason(),
        Some(&CancelReason::AncestorFailed("T".into()))
    );
}

#[test]
fn reported_failure_retries_in_retrying_state() {
    let mut h = harness();
    h.register("w1");

    let step = h.submit(TaskSpec::new("T", "t").max_retries(1)).unwrap();
    let (w, d) = only_execute(&step);

    let step = h.fail(&w, &d, "exit code 2");
    assert_eq!(h.state("T"), TaskState::Retrying);
    assert_eq!(backoff_delay(&step), Some(Duration::from_millis(100)));
    // Worker is free again right away.
    assert_eq!(
        h.core.registry().get("w1").map(|w| w.status),
        Some(WorkerStatus::Idle)
    );

    h.advance(Duration::from_millis(100));
    let step = h.backoff_elapsed("T", d.epoch);
    let (w, d) = only_execute(&step);
    assert_eq!(d.attempt, 2);

    h.succeed(&w, &d);
    let snapshot = h.snapshot("T");
    assert_eq!(snapshot.state, TaskState::Succeeded);
    assert_eq!(snapshot.retry_count, 1);
    assert_eq!(snapshot.result().map(|p| p.to_text()), Some("T done".to_string()));
}

#[test]
fn zero_retries_fails_on_first_error() {
    let mut h = harness();
    h.register("w1");

    let step = h.submit(TaskSpec::new("T", "t")).unwrap();
    let (w, d) = only_execute(&step);
    h.fail(&w, &d, "nope");

    assert_eq!(
        h.snapshot("T").failure(),
        Some(&TaskFailure::MaxRetriesExceeded {
            attempts: 1,
            last: Box::new(TaskFailure::Reported("nope".into())),
        })
    );
}

#[test]
fn silent_worker_is_declared_dead_and_its_task_moves_elsewhere() {
    let mut h = harness();
    h.register("w1");
    h.register("w2");

    let step = h.submit(TaskSpec::new("T", "t").max_retries(1)).unwrap();
    let (first_worker, first) = only_execute(&step);
    assert_eq!(first_worker, "w1");

    // w2 keeps heartbeating, w1 goes quiet.
    h.advance(Duration::from_millis(1500));
    h.heartbeat("w2");
    h.advance(Duration::from_millis(1000));

    let step = h.step(Command::HeartbeatSweep);
    assert_eq!(stopped(&step), vec!["w1".to_string()]);
    assert_eq!(
        h.core.registry().get("w1").map(|w| w.status),
        Some(WorkerStatus::Dead)
    );

    let snapshot = h.snapshot("T");
    assert_eq!(snapshot.state, TaskState::Retrying);
    assert_eq!(snapshot.retry_count, 1);
    let delay = backoff_delay(&step).unwrap();

    h.advance(delay);
    let step = h.backoff_elapsed("T", first.epoch);
    let (second_worker, second) = only_execute(&step);
    assert_eq!(second_worker, "w2");

    // w1 comes back from the dead with a stale result: ignored.
    let step = h.succeed("w1", &first);
    assert!(executes(&step).is_empty());
    assert_eq!(h.state("T"), TaskState::Running);

    h.succeed(&second_worker, &second);
    assert_eq!(h.state("T"), TaskState::Succeeded);
}

#[test]
fn heartbeat_within_two_intervals_keeps_worker_alive() {
    let mut h = harness();
    h.register("w1");

    h.advance(Duration::from_secs(2));
    let step = h.step(Command::HeartbeatSweep);
    assert!(stopped(&step).is_empty());

    // A timestamp from the future is clamped to now.
    let future = h.now + Duration::from_secs(60);
    h.step(Command::Heartbeat {
        worker: "w1".into(),
        timestamp: future,
    });
    h.advance(Duration::from_millis(2001));
    let step = h.step(Command::HeartbeatSweep);
    assert_eq!(stopped(&step), vec!["w1".to_string()]);
}

#[test]
fn late_result_from_timed_out_attempt_is_discarded_but_frees_the_worker() {
    let mut h = harness();
    h.register("w1");
    h.register("w2");

    let step = h
        .submit(
            TaskSpec::new("T", "t")
                .max_retries(1)
                .timeout(Duration::from_secs(1)),
        )
        .unwrap();
    let (slow, first) = only_execute(&step);

    h.advance(Duration::from_secs(1));
    let step = h.time_out("T", first.epoch);
    h.advance(backoff_delay(&step).unwrap());
    let step = h.backoff_elapsed("T", first.epoch);
    let (fast, second) = only_execute(&step);
    assert_ne!(slow, fast);

    // The first attempt finishes after all.
    h.succeed(&slow, &first);
    assert_eq!(h.state("T"), TaskState::Running);
    assert_eq!(h.snapshot("T").epoch, Some(second.epoch));
    assert_eq!(
        h.core.registry().get(&slow).map(|w| w.status),
        Some(WorkerStatus::Idle)
    );

    h.succeed(&fast, &second);
    assert_eq!(h.state("T"), TaskState::Succeeded);
}

#[test]
fn stale_timeout_and_backoff_timers_are_ignored() {
    let mut h = harness();
    h.register("w1");

    let step = h.submit(TaskSpec::new("T", "t")).unwrap();
    let (w, d) = only_execute(&step);
    h.succeed(&w, &d);

    let step = h.time_out("T", d.epoch);
    assert!(step.actions.is_empty());
    h.backoff_elapsed("T", d.epoch);
    assert_eq!(h.state("T"), TaskState::Succeeded);
}

#[test]
fn strict_cascade_cancels_everything_unresolved() {
    init_tracing();
    let mut config = test_scheduler_config();
    config.cascade = CascadePolicy::Strict;
    let mut h = CoreHarness::new(config);
    h.register("w1");
    h.register("w2");

    let step = h.submit(TaskSpec::new("A", "a")).unwrap();
    let (wa, da) = only_execute(&step);
    let step = h.submit(TaskSpec::new("B", "b")).unwrap();
    let (wb, db) = only_execute(&step);
    h.submit(TaskSpec::new("C", "c").after("A")).unwrap();
    h.submit(TaskSpec::new("E", "e")).unwrap();
    assert_eq!(h.state("E"), TaskState::Ready);

    let step = h.fail(&wa, &da, "boom");
    assert!(executes(&step).is_empty());
    assert_eq!(cancels(&step), vec![(wb.clone(), "B".to_string(), db.epoch)]);

    assert_eq!(h.state("A"), TaskState::Failed);
    assert_eq!(
        h.snapshot("C").cancel_reason(),
        Some(&CancelReason::AncestorFailed("A".into()))
    );
    assert_eq!(
        h.snapshot("E").cancel_reason(),
        Some(&CancelReason::FailFast("A".into()))
    );
    // B is still running until its worker acknowledges.
    assert_eq!(h.state("B"), TaskState::Running);

    h.report(&wb, &db, ResultStatus::Cancelled);
    assert_eq!(
        h.snapshot("B").cancel_reason(),
        Some(&CancelReason::FailFast("A".into()))
    );
}

#[test]
fn branch_cascade_leaves_independent_work_alone() {
    let mut h = harness();
    h.register("w1");
    h.register("w2");

    let step = h.submit(TaskSpec::new("A", "a")).unwrap();
    let (wa, da) = only_execute(&step);
    h.submit(TaskSpec::new("B", "b")).unwrap();
    h.submit(TaskSpec::new("C", "c").after("A")).unwrap();
    h.submit(TaskSpec::new("E", "e")).unwrap();

    let step = h.fail(&wa, &da, "boom");
    assert!(cancels(&step).is_empty());
    let (_, d) = only_execute(&step);
    assert_eq!(d.task, "E");
    assert_eq!(h.state("B"), TaskState::Running);
    assert_eq!(h.state("C"), TaskState::Cancelled);
}

#[test]
fn cancel_of_running_task_waits_for_acknowledgement() {
    let mut h = harness();
    h.register("w1");

    let step = h.submit(TaskSpec::new("A", "a")).unwrap();
    let (w, d) = only_execute(&step);
    h.submit(TaskSpec::new("B", "b").after("A")).unwrap();

    let step = h.cancel("A").unwrap();
    assert_eq!(cancels(&step), vec![(w.clone(), "A".to_string(), d.epoch)]);
    assert_eq!(h.state("A"), TaskState::Running);

    // Even a success that crosses the cancel on the wire ends as cancelled.
    h.succeed(&w, &d);
    assert_eq!(h.snapshot("A").cancel_reason(), Some(&CancelReason::Requested));
    assert_eq!(
        h.snapshot("B").cancel_reason(),
        Some(&CancelReason::AncestorCancelled("A".into()))
    );
    assert_eq!(
        h.core.registry().get(&w).map(|w| w.status),
        Some(WorkerStatus::Idle)
    );
}

#[test]
fn unacknowledged_cancel_abandons_the_worker_after_grace() {
    let mut h = harness();
    h.register("w1");

    let step = h.submit(TaskSpec::new("A", "a")).unwrap();
    let (w, d) = only_execute(&step);
    h.cancel("A").unwrap();

    h.advance(Duration::from_millis(500));
    let step = h.step(Command::CancelGraceExpired {
        worker: w.clone(),
        task: "A".into(),
        epoch: d.epoch,
    });
    assert_eq!(stopped(&step), vec![w.clone()]);
    assert_eq!(h.state("A"), TaskState::Cancelled);
    assert_eq!(
        h.core.registry().get(&w).map(|w| w.status),
        Some(WorkerStatus::Dead)
    );

    // Whatever it says now is too late.
    h.succeed(&w, &d);
    assert_eq!(h.state("A"), TaskState::Cancelled);
}

#[test]
fn cancel_during_backoff_is_immediate() {
    let mut h = harness();
    h.register("w1");

    let step = h.submit(TaskSpec::new("T", "t").max_retries(2)).unwrap();
    let (w, d) = only_execute(&step);
    h.fail(&w, &d, "flaky");
    assert_eq!(h.state("T"), TaskState::Retrying);

    let step = h.cancel("T").unwrap();
    assert!(cancels(&step).is_empty());
    assert_eq!(h.state("T"), TaskState::Cancelled);

    // The backoff timer may still fire; it finds nothing to do.
    let step = h.backoff_elapsed("T", d.epoch);
    assert!(executes(&step).is_empty());
}
