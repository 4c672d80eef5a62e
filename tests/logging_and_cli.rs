// tests/logging_and_cli.rs

use clap::Parser;
use tracing::Level;

use dagpool::cli::{CliArgs, LogLevel};
use dagpool::logging::{parse_level_str, resolve_level};

#[test]
fn cli_flag_wins_over_environment() {
    assert_eq!(resolve_level(Some(LogLevel::Debug), Some("error")), Level::DEBUG);
    assert_eq!(resolve_level(Some(LogLevel::Trace), None), Level::TRACE);
}

#[test]
fn environment_is_used_without_a_flag() {
    assert_eq!(resolve_level(None, Some("warn")), Level::WARN);
    assert_eq!(resolve_level(None, Some(" DEBUG ")), Level::DEBUG);
}

#[test]
fn unknown_or_missing_level_falls_back_to_info() {
    assert_eq!(resolve_level(None, Some("loud")), Level::INFO);
    assert_eq!(resolve_level(None, None), Level::INFO);
}

#[test]
fn level_names() {
    assert_eq!(parse_level_str("warning"), Some(Level::WARN));
    assert_eq!(parse_level_str("Error"), Some(Level::ERROR));
    assert_eq!(parse_level_str("verbose"), None);
}

#[test]
fn cli_defaults_and_flags() {
    let args = CliArgs::try_parse_from(["dagpool"]).unwrap();
    assert_eq!(args.config, "Dagpool.toml");
    assert!(!args.dry_run);
    assert!(args.workers.is_none());
    assert!(args.log_level.is_none());

    let args = CliArgs::try_parse_from([
        "dagpool",
        "--config",
        "jobs.toml",
        "--log-level",
        "trace",
        "--workers",
        "3",
        "--dry-run",
    ])
    .unwrap();
    assert_eq!(args.config, "jobs.toml");
    assert!(args.dry_run);
    assert_eq!(args.workers, Some(3));
    assert!(matches!(args.log_level, Some(LogLevel::Trace)));

    assert!(CliArgs::try_parse_from(["dagpool", "--log-level", "loud"]).is_err());
}
