// src/config/settings.rs

//! Runtime settings with parsed durations.
//!
//! These are what the scheduler actually consumes. They can be built from a
//! validated [`ConfigFile`] or directly in code (every struct has a
//! `Default`).

use std::time::Duration;

use crate::config::duration::parse_duration;
use crate::config::model::ConfigFile;
use crate::dag::TaskSpec;
use crate::errors::{Result, SchedulerError};
use crate::types::{CascadePolicy, Payload};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub cascade: CascadePolicy,
    pub command_buffer: usize,
    pub cancel_grace: Duration,
    pub throughput_window: Duration,
    pub pool: PoolConfig,
    pub retry: RetryPolicy,
    pub scaler: ScalerConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cascade: CascadePolicy::default(),
            command_buffer: 256,
            cancel_grace: Duration::from_secs(5),
            throughput_window: Duration::from_secs(60),
            pool: PoolConfig::default(),
            retry: RetryPolicy::default(),
            scaler: ScalerConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub initial_workers: usize,
    pub min_workers: usize,
    pub max_workers: usize,
    pub heartbeat_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_workers: 2,
            min_workers: 1,
            max_workers: 8,
            heartbeat_interval: Duration::from_secs(1),
        }
    }
}

impl PoolConfig {
    /// Clamp a requested worker count into `[min_workers, max_workers]`.
    pub fn clamp(&self, count: usize) -> usize {
        count.clamp(self.min_workers, self.max_workers)
    }
}

/// Exponential backoff with jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the delay added as uniform random jitter, in `[0, 1)`.
    pub jitter: f64,
    /// Fixed RNG seed; `None` seeds from OS entropy.
    pub seed: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            jitter: 0.2,
            seed: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScalerConfig {
    pub enabled: bool,
    pub interval: Duration,
    pub queue_threshold: usize,
    pub idle_threshold: usize,
    pub window: Duration,
    pub step: usize,
}

impl Default for ScalerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(1),
            queue_threshold: 4,
            idle_threshold: 2,
            window: Duration::from_secs(5),
            step: 1,
        }
    }
}

fn duration_field(name: &str, value: &str) -> Result<Duration> {
    parse_duration(value).map_err(|e| SchedulerError::ConfigError(format!("{name}: {e}")))
}

impl ConfigFile {
    /// Scheduler settings described by this file.
    pub fn scheduler_config(&self) -> Result<SchedulerConfig> {
        Ok(SchedulerConfig {
            cascade: self.scheduler.cascade,
            command_buffer: self.scheduler.command_buffer,
            cancel_grace: duration_field("[scheduler].cancel_grace", &self.scheduler.cancel_grace)?,
            throughput_window: duration_field(
                "[scheduler].throughput_window",
                &self.scheduler.throughput_window,
            )?,
            pool: PoolConfig {
                initial_workers: self.pool.initial_workers,
                min_workers: self.pool.min_workers,
                max_workers: self.pool.max_workers,
                heartbeat_interval: duration_field(
                    "[pool].heartbeat_interval",
                    &self.pool.heartbeat_interval,
                )?,
            },
            retry: RetryPolicy {
                base_delay: duration_field("[retry].base_delay", &self.retry.base_delay)?,
                max_delay: duration_field("[retry].max_delay", &self.retry.max_delay)?,
                jitter: self.retry.jitter,
                seed: None,
            },
            scaler: ScalerConfig {
                enabled: self.scaler.enabled,
                interval: duration_field("[scaler].interval", &self.scaler.interval)?,
                queue_threshold: self.scaler.queue_threshold,
                idle_threshold: self.scaler.idle_threshold,
                window: duration_field("[scaler].window", &self.scaler.window)?,
                step: self.scaler.step,
            },
        })
    }

    /// One [`TaskSpec`] per `[task.<id>]`, payload = the shell command.
    pub fn task_specs(&self) -> Result<Vec<TaskSpec>> {
        self.task
            .iter()
            .map(|(id, tc)| {
                let timeout = duration_field(
                    &format!("[task.{id}].timeout"),
                    tc.effective_timeout(&self.default),
                )?;
                Ok(TaskSpec {
                    id: id.clone(),
                    priority: tc.effective_priority(&self.default),
                    dependencies: tc.after.clone(),
                    payload: Payload::from(tc.cmd.as_str()),
                    max_retries: tc.effective_max_retries(&self.default),
                    timeout,
                })
            })
            .collect()
    }
}
