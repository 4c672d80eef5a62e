#![allow(dead_code)]

use std::collections::BTreeMap;
use std::time::Duration;

use dagpool::config::{
    ConfigFile, DefaultSection, PoolConfig, PoolSection, RawConfigFile, RetryPolicy,
    RetrySection, ScalerConfig, ScalerSection, SchedulerConfig, SchedulerSection, TaskConfig,
};
use dagpool::types::CascadePolicy;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                scheduler: SchedulerSection::default(),
                pool: PoolSection::default(),
                retry: RetrySection::default(),
                scaler: ScalerSection::default(),
                default: DefaultSection::default(),
                task: BTreeMap::new(),
            },
        }
    }

    pub fn with_task(mut self, name: &str, task: TaskConfig) -> Self {
        self.config.task.insert(name.to_string(), task);
        self
    }

    pub fn with_cascade(mut self, cascade: CascadePolicy) -> Self {
        self.config.scheduler.cascade = cascade;
        self
    }

    pub fn with_pool(mut self, initial: usize, min: usize, max: usize) -> Self {
        self.config.pool.initial_workers = initial;
        self.config.pool.min_workers = min;
        self.config.pool.max_workers = max;
        self
    }

    pub fn with_default_max_retries(mut self, n: u32) -> Self {
        self.config.default.max_retries = n;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.config.retry.jitter = jitter;
        self
    }

    /// The raw (unvalidated) config, for validation tests.
    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `TaskConfig`.
pub struct TaskConfigBuilder {
    task: TaskConfig,
}

impl TaskConfigBuilder {
    pub fn new(cmd: &str) -> Self {
        Self {
            task: TaskConfig {
                cmd: cmd.to_string(),
                after: vec![],
                priority: None,
                max_retries: None,
                timeout: None,
            },
        }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.after.push(dep.to_string());
        self
    }

    pub fn priority(mut self, priority: i64) -> Self {
        self.task.priority = Some(priority);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.task.max_retries = Some(n);
        self
    }

    pub fn timeout(mut self, timeout: &str) -> Self {
        self.task.timeout = Some(timeout.to_string());
        self
    }

    pub fn build(self) -> TaskConfig {
        self.task
    }
}

/// Scheduler settings suited to tests: deterministic backoff (no jitter,
/// fixed seed), scaler off, no initial workers.
pub fn test_scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        cascade: CascadePolicy::Branch,
        command_buffer: 64,
        cancel_grace: Duration::from_millis(500),
        throughput_window: Duration::from_secs(60),
        pool: PoolConfig {
            initial_workers: 0,
            min_workers: 0,
            max_workers: 4,
            heartbeat_interval: Duration::from_secs(1),
        },
        retry: RetryPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            jitter: 0.0,
            seed: Some(7),
        },
        scaler: ScalerConfig {
            enabled: false,
            ..ScalerConfig::default()
        },
    }
}
