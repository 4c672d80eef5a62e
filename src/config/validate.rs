// src/config/validate.rs

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::duration::parse_duration;
use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{Result, SchedulerError};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = SchedulerError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_tasks(cfg)?;
    validate_scheduler_section(cfg)?;
    validate_pool_section(cfg)?;
    validate_retry_section(cfg)?;
    validate_scaler_section(cfg)?;
    validate_task_fields(cfg)?;
    validate_task_dependencies(cfg)?;
    validate_dag(cfg)?;
    Ok(())
}

fn config_error(msg: impl Into<String>) -> SchedulerError {
    SchedulerError::ConfigError(msg.into())
}

fn check_duration(field: &str, value: &str, allow_zero: bool) -> Result<()> {
    let d = parse_duration(value).map_err(|e| config_error(format!("{field}: {e}")))?;
    if !allow_zero && d.is_zero() {
        return Err(config_error(format!("{field} must be greater than zero")));
    }
    Ok(())
}

fn ensure_has_tasks(cfg: &RawConfigFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(config_error(
            "config must contain at least one [task.<id>] section",
        ));
    }
    Ok(())
}

fn validate_scheduler_section(cfg: &RawConfigFile) -> Result<()> {
    if cfg.scheduler.command_buffer == 0 {
        return Err(config_error(
            "[scheduler].command_buffer must be >= 1 (got 0)",
        ));
    }
    check_duration("[scheduler].cancel_grace", &cfg.scheduler.cancel_grace, true)?;
    check_duration(
        "[scheduler].throughput_window",
        &cfg.scheduler.throughput_window,
        false,
    )?;
    Ok(())
}

fn validate_pool_section(cfg: &RawConfigFile) -> Result<()> {
    let pool = &cfg.pool;
    if pool.max_workers == 0 {
        return Err(config_error("[pool].max_workers must be >= 1 (got 0)"));
    }
    if pool.min_workers > pool.max_workers {
        return Err(config_error(format!(
            "[pool].min_workers ({}) exceeds max_workers ({})",
            pool.min_workers, pool.max_workers
        )));
    }
    if pool.initial_workers < pool.min_workers || pool.initial_workers > pool.max_workers {
        return Err(config_error(format!(
            "[pool].initial_workers ({}) must lie within [{}, {}]",
            pool.initial_workers, pool.min_workers, pool.max_workers
        )));
    }
    check_duration("[pool].heartbeat_interval", &pool.heartbeat_interval, false)?;
    Ok(())
}

fn validate_retry_section(cfg: &RawConfigFile) -> Result<()> {
    let retry = &cfg.retry;
    check_duration("[retry].base_delay", &retry.base_delay, true)?;
    check_duration("[retry].max_delay", &retry.max_delay, true)?;
    if !(0.0..1.0).contains(&retry.jitter) {
        return Err(config_error(format!(
            "[retry].jitter must be in [0, 1) (got {})",
            retry.jitter
        )));
    }
    Ok(())
}

fn validate_scaler_section(cfg: &RawConfigFile) -> Result<()> {
    let scaler = &cfg.scaler;
    check_duration("[scaler].interval", &scaler.interval, false)?;
    check_duration("[scaler].window", &scaler.window, true)?;
    if scaler.step == 0 {
        return Err(config_error("[scaler].step must be >= 1 (got 0)"));
    }
    Ok(())
}

fn validate_task_fields(cfg: &RawConfigFile) -> Result<()> {
    check_duration("[default].timeout", &cfg.default.timeout, false)?;
    for (name, task) in cfg.task.iter() {
        if task.cmd.trim().is_empty() {
            return Err(config_error(format!("task '{}' has an empty `cmd`", name)));
        }
        if let Some(ref timeout) = task.timeout {
            check_duration(&format!("[task.{name}].timeout"), timeout, false)?;
        }
    }
    Ok(())
}

fn validate_task_dependencies(cfg: &RawConfigFile) -> Result<()> {
    for (name, task) in cfg.task.iter() {
        for dep in task.after.iter() {
            if dep == name {
                return Err(config_error(format!(
                    "task '{}' cannot depend on itself in `after`",
                    name
                )));
            }
            if !cfg.task.contains_key(dep) {
                return Err(config_error(format!(
                    "task '{}' has unknown dependency '{}' in `after`",
                    name, dep
                )));
            }
        }
    }
    Ok(())
}

fn validate_dag(cfg: &RawConfigFile) -> Result<()> {
    // Edge direction: dep -> task
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in cfg.task.keys() {
        graph.add_node(name.as_str());
    }

    for (name, task) in cfg.task.iter() {
        for dep in task.after.iter() {
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
    }

    // A topological sort will fail if there is a cycle.
    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => {
            let node = cycle.node_id();
            Err(SchedulerError::CyclicDependency {
                task: node.to_string(),
                via: cfg
                    .task
                    .get(node)
                    .and_then(|t| t.after.first().cloned())
                    .unwrap_or_default(),
            })
        }
    }
}
