// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod logging;
pub mod pool;
pub mod types;

use anyhow::{Result, bail};
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::dag::{TaskOutcome, TaskState};
use crate::engine::{SchedulerHandle, spawn_scheduler};
use crate::errors::SchedulerError;
use crate::pool::ProcessWorkerFactory;
use crate::types::ShutdownMode;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - the scheduler with a subprocess worker pool
/// - task submission from the job file
/// - Ctrl-C handling (graceful shutdown)
/// - the final report on stdout
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_and_validate(&args.config)?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    let mut config = cfg.scheduler_config()?;
    if let Some(n) = args.workers {
        config.pool.initial_workers = n;
    }
    let specs = cfg.task_specs()?;

    let factory = ProcessWorkerFactory::new(config.pool.heartbeat_interval);
    let (handle, join) = spawn_scheduler(config, factory);

    // Ctrl-C → graceful shutdown.
    {
        let handle = handle.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            info!("Ctrl+C received; shutting down gracefully");
            let _ = handle.shutdown(ShutdownMode::Graceful).await;
        });
    }

    info!(tasks = specs.len(), "submitting tasks");
    for spec in specs {
        handle.submit(spec).await?;
    }

    match handle.wait_idle().await {
        Ok(()) | Err(SchedulerError::SchedulerShutdown) => {}
        Err(e) => return Err(e.into()),
    }

    let failed = report(&handle, &cfg).await;

    if let Err(e) = handle.shutdown(ShutdownMode::Graceful).await {
        debug!(error = %e, "scheduler already stopped");
    }
    join.await??;

    if failed > 0 {
        bail!("{failed} task(s) did not succeed");
    }
    Ok(())
}

/// Print per-task outcomes and metrics. Returns how many tasks did not
/// succeed.
async fn report(handle: &SchedulerHandle, cfg: &ConfigFile) -> usize {
    let mut failed = 0;

    println!("tasks:");
    for id in cfg.task.keys() {
        let snapshot = match handle.status(id.as_str()).await {
            Ok(s) => s,
            Err(e) => {
                warn!(task = %id, error = %e, "no status available");
                failed += 1;
                continue;
            }
        };
        if snapshot.state != TaskState::Succeeded {
            failed += 1;
        }

        match &snapshot.outcome {
            Some(TaskOutcome::Succeeded(output)) => {
                println!("  {id}: succeeded (retries: {})", snapshot.retry_count);
                let text = output.to_text();
                for line in text.lines() {
                    println!("      | {line}");
                }
            }
            Some(TaskOutcome::Failed(failure)) => println!("  {id}: failed: {failure}"),
            Some(TaskOutcome::Cancelled(reason)) => println!("  {id}: cancelled: {reason}"),
            None => println!("  {id}: {:?}", snapshot.state),
        }
    }

    match handle.metrics().await {
        Ok(metrics) => {
            println!();
            println!("{metrics}");
        }
        Err(e) => debug!(error = %e, "metrics unavailable"),
    }

    failed
}

/// Simple dry-run output: print pool settings and tasks.
fn print_dry_run(cfg: &ConfigFile) {
    println!("dagpool dry-run");
    println!("  scheduler.cascade = {:?}", cfg.scheduler.cascade);
    println!(
        "  pool = {} initial, {}..={} workers, heartbeat every {}",
        cfg.pool.initial_workers, cfg.pool.min_workers, cfg.pool.max_workers, cfg.pool.heartbeat_interval
    );
    println!(
        "  retry = base {}, max {}, jitter {}",
        cfg.retry.base_delay, cfg.retry.max_delay, cfg.retry.jitter
    );
    println!();

    println!("tasks ({}):", cfg.task.len());
    for (id, task) in cfg.task.iter() {
        println!("  - {id}");
        println!("      cmd: {}", task.cmd);
        if !task.after.is_empty() {
            println!("      after: {:?}", task.after);
        }
        println!("      priority: {}", task.effective_priority(&cfg.default));
        println!("      max_retries: {}", task.effective_max_retries(&cfg.default));
        println!("      timeout: {}", task.effective_timeout(&cfg.default));
    }

    debug!("dry-run complete (no execution)");
}
