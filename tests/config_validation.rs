// tests/config_validation.rs

use std::io::Write;
use std::time::Duration;

use tempfile::NamedTempFile;

use dagpool::config::{ConfigFile, load_and_validate, parse_duration};
use dagpool::errors::SchedulerError;
use dagpool::types::CascadePolicy;
use dagpool_test_utils::builders::{ConfigFileBuilder, TaskConfigBuilder};

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    file
}

/// Builder with a single trivial task, so section checks are reached.
fn one_task() -> ConfigFileBuilder {
    ConfigFileBuilder::new().with_task("A", TaskConfigBuilder::new("echo A").build())
}

fn expect_config_error(result: Result<ConfigFile, SchedulerError>) -> String {
    match result {
        Err(SchedulerError::ConfigError(msg)) => msg,
        Err(e) => panic!("Expected ConfigError, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn full_file_loads_with_defaults_applied() {
    let file = write_config(
        r#"
[scheduler]
cascade = "strict"
cancel_grace = "2s"

[pool]
initial_workers = 2
min_workers = 1
max_workers = 4
heartbeat_interval = "500ms"

[retry]
base_delay = "50ms"
max_delay = "10s"
jitter = 0.1

[default]
priority = 3
max_retries = 2
timeout = "30s"

[task.fetch]
cmd = "echo fetch"

[task.load]
cmd = "echo load"
after = ["fetch"]
priority = 10
timeout = "5m"
"#,
    );

    let cfg = load_and_validate(file.path()).unwrap();
    assert_eq!(cfg.scheduler.cascade, CascadePolicy::Strict);

    let settings = cfg.scheduler_config().unwrap();
    assert_eq!(settings.cancel_grace, Duration::from_secs(2));
    assert_eq!(settings.pool.heartbeat_interval, Duration::from_millis(500));
    assert_eq!(settings.retry.base_delay, Duration::from_millis(50));
    assert!(settings.scaler.enabled);

    let specs = cfg.task_specs().unwrap();
    let fetch = specs.iter().find(|s| s.id == "fetch").unwrap();
    assert_eq!(fetch.priority, 3);
    assert_eq!(fetch.max_retries, 2);
    assert_eq!(fetch.timeout, Duration::from_secs(30));
    assert_eq!(fetch.payload.to_text(), "echo fetch");

    let load = specs.iter().find(|s| s.id == "load").unwrap();
    assert_eq!(load.priority, 10);
    assert_eq!(load.dependencies, vec!["fetch".to_string()]);
    assert_eq!(load.timeout, Duration::from_secs(300));
}

#[test]
fn file_without_tasks_is_rejected() {
    let file = write_config("[pool]\nmax_workers = 2\n");
    let msg = expect_config_error(load_and_validate(file.path()));
    assert!(msg.contains("at least one [task.<id>]"));
}

#[test]
fn dag_cycle_returns_structured_error() {
    let file = write_config(
        r#"
[task.A]
cmd = "echo A"
after = ["B"]

[task.B]
cmd = "echo B"
after = ["A"]
"#,
    );

    match load_and_validate(file.path()) {
        Err(SchedulerError::CyclicDependency { task, via }) => {
            assert!(task == "A" || task == "B");
            assert!(via == "A" || via == "B");
        }
        Err(e) => panic!("Expected CyclicDependency error, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn unknown_dependency_returns_config_error() {
    let file = write_config(
        r#"
[task.A]
cmd = "echo A"
after = ["NonExistent"]
"#,
    );

    let msg = expect_config_error(load_and_validate(file.path()));
    assert!(msg.contains("unknown dependency"));
    assert!(msg.contains("NonExistent"));
}

#[test]
fn malformed_toml_is_a_toml_error() {
    let file = write_config("[task.A\ncmd = ");
    assert!(matches!(
        load_and_validate(file.path()),
        Err(SchedulerError::TomlError(_))
    ));
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        load_and_validate(dir.path().join("nope.toml")),
        Err(SchedulerError::IoError(_))
    ));
}

#[test]
fn self_dependency_is_rejected() {
    let raw = ConfigFileBuilder::new()
        .with_task("A", TaskConfigBuilder::new("echo A").after("A").build())
        .raw();

    let msg = expect_config_error(ConfigFile::try_from(raw));
    assert!(msg.contains("cannot depend on itself"));
}

#[test]
fn pool_bounds_are_checked() {
    let msg = expect_config_error(ConfigFile::try_from(
        one_task().with_pool(1, 3, 2).raw(),
    ));
    assert!(msg.contains("min_workers"));

    let msg = expect_config_error(ConfigFile::try_from(
        one_task().with_pool(5, 1, 4).raw(),
    ));
    assert!(msg.contains("initial_workers"));

    let msg = expect_config_error(ConfigFile::try_from(
        one_task().with_pool(0, 0, 0).raw(),
    ));
    assert!(msg.contains("max_workers"));

    // min_workers = 0 is allowed: the pool may shrink to nothing.
    one_task().with_pool(0, 0, 2).build();
}

#[test]
fn jitter_must_be_a_fraction() {
    let msg = expect_config_error(ConfigFile::try_from(
        one_task().with_jitter(1.0).raw(),
    ));
    assert!(msg.contains("jitter"));

    expect_config_error(ConfigFile::try_from(
        one_task().with_jitter(-0.1).raw(),
    ));
    one_task().with_jitter(0.0).build();
}

#[test]
fn bad_task_timeout_names_the_task() {
    let raw = ConfigFileBuilder::new()
        .with_task("slow", TaskConfigBuilder::new("sleep 1").timeout("5 parsecs").build())
        .raw();

    let msg = expect_config_error(ConfigFile::try_from(raw));
    assert!(msg.contains("[task.slow].timeout"));
}

#[test]
fn empty_command_is_rejected() {
    let raw = ConfigFileBuilder::new()
        .with_task("blank", TaskConfigBuilder::new("   ").build())
        .raw();

    let msg = expect_config_error(ConfigFile::try_from(raw));
    assert!(msg.contains("empty `cmd`"));
}

#[test]
fn cascade_policy_accepts_the_long_name() {
    let file = write_config("[scheduler]\ncascade = \"failed_branch\"\n\n[task.A]\ncmd = \"echo A\"\n");
    let cfg = load_and_validate(file.path()).unwrap();
    assert_eq!(cfg.scheduler.cascade, CascadePolicy::Branch);
}

#[test]
fn duration_strings() {
    assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
    assert_eq!(parse_duration(" 3s "), Ok(Duration::from_secs(3)));
    assert_eq!(parse_duration("2m"), Ok(Duration::from_secs(120)));
    assert_eq!(parse_duration("1h"), Ok(Duration::from_secs(3600)));
    assert!(parse_duration("").is_err());
    assert!(parse_duration("10").is_err());
    assert!(parse_duration("5d").is_err());
}

#[test]
fn oversized_durations_are_rejected_instead_of_overflowing() {
    let huge = format!("{}h", u64::MAX / 60);
    let err = parse_duration(&huge).unwrap_err();
    assert!(err.contains("too large"), "{err}");
    assert!(parse_duration(&format!("{}m", u64::MAX)).is_err());
    assert_eq!(
        parse_duration(&format!("{}s", u64::MAX)),
        Ok(Duration::from_secs(u64::MAX))
    );

    let raw = ConfigFileBuilder::new()
        .with_task("slow", TaskConfigBuilder::new("sleep 1").timeout(&huge).build())
        .raw();
    let msg = expect_config_error(ConfigFile::try_from(raw));
    assert!(msg.contains("[task.slow].timeout"));
}
