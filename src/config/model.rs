// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::types::CascadePolicy;

/// Top-level configuration as read from a TOML file, before validation.
///
/// ```toml
/// [scheduler]
/// cascade = "branch"
///
/// [pool]
/// min_workers = 1
/// max_workers = 4
///
/// [task.fetch]
/// cmd = "curl -sO https://example.com/data.csv"
///
/// [task.load]
/// cmd = "./load.sh data.csv"
/// after = ["fetch"]
/// priority = 10
/// ```
///
/// All sections are optional and have reasonable defaults. Use
/// `ConfigFile::try_from` (or [`crate::config::load_and_validate`]) to get a
/// validated [`ConfigFile`].
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub scheduler: SchedulerSection,

    #[serde(default)]
    pub pool: PoolSection,

    #[serde(default)]
    pub retry: RetrySection,

    #[serde(default)]
    pub scaler: ScalerSection,

    /// Defaults applied to tasks that do not override them.
    #[serde(default)]
    pub default: DefaultSection,

    /// All tasks from `[task.<id>]`, keyed by task id.
    #[serde(default)]
    pub task: BTreeMap<String, TaskConfig>,
}

/// Validated configuration. Only constructible through validation.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub scheduler: SchedulerSection,
    pub pool: PoolSection,
    pub retry: RetrySection,
    pub scaler: ScalerSection,
    pub default: DefaultSection,
    pub task: BTreeMap<String, TaskConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            scheduler: raw.scheduler,
            pool: raw.pool,
            retry: raw.retry,
            scaler: raw.scaler,
            default: raw.default,
            task: raw.task,
        }
    }
}

/// `[scheduler]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSection {
    /// `"branch"` (default) or `"strict"`.
    #[serde(default)]
    pub cascade: CascadePolicy,

    /// Capacity of the command channel feeding the scheduler core.
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,

    /// How long a worker gets to honour a cancel before it is abandoned.
    #[serde(default = "default_cancel_grace")]
    pub cancel_grace: String,

    /// Trailing window over which throughput is reported.
    #[serde(default = "default_throughput_window")]
    pub throughput_window: String,
}

fn default_command_buffer() -> usize {
    256
}

fn default_cancel_grace() -> String {
    "5s".to_string()
}

fn default_throughput_window() -> String {
    "60s".to_string()
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            cascade: CascadePolicy::default(),
            command_buffer: default_command_buffer(),
            cancel_grace: default_cancel_grace(),
            throughput_window: default_throughput_window(),
        }
    }
}

/// `[pool]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolSection {
    #[serde(default = "default_initial_workers")]
    pub initial_workers: usize,

    #[serde(default = "default_min_workers")]
    pub min_workers: usize,

    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Expected heartbeat period `H`; two missed periods mark a worker dead.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: String,
}

fn default_initial_workers() -> usize {
    2
}

fn default_min_workers() -> usize {
    1
}

fn default_max_workers() -> usize {
    8
}

fn default_heartbeat_interval() -> String {
    "1s".to_string()
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            initial_workers: default_initial_workers(),
            min_workers: default_min_workers(),
            max_workers: default_max_workers(),
            heartbeat_interval: default_heartbeat_interval(),
        }
    }
}

/// `[retry]` section: exponential backoff with jitter.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_base_delay")]
    pub base_delay: String,

    #[serde(default = "default_max_delay")]
    pub max_delay: String,

    /// Fraction of the computed delay added as random jitter, in `[0, 1)`.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_base_delay() -> String {
    "100ms".to_string()
}

fn default_max_delay() -> String {
    "30s".to_string()
}

fn default_jitter() -> f64 {
    0.2
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            jitter: default_jitter(),
        }
    }
}

/// `[scaler]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ScalerSection {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// How often the scaler samples load.
    #[serde(default = "default_scaler_interval")]
    pub interval: String,

    /// Scale up while more than this many tasks are waiting.
    #[serde(default = "default_queue_threshold")]
    pub queue_threshold: usize,

    /// Scale down while more than this many workers are idle.
    #[serde(default = "default_idle_threshold")]
    pub idle_threshold: usize,

    /// How long a condition must hold before the scaler acts on it.
    #[serde(default = "default_window")]
    pub window: String,

    /// Workers added or removed per decision.
    #[serde(default = "default_step")]
    pub step: usize,
}

fn default_true() -> bool {
    true
}

fn default_scaler_interval() -> String {
    "1s".to_string()
}

fn default_queue_threshold() -> usize {
    4
}

fn default_idle_threshold() -> usize {
    2
}

fn default_window() -> String {
    "5s".to_string()
}

fn default_step() -> usize {
    1
}

impl Default for ScalerSection {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            interval: default_scaler_interval(),
            queue_threshold: default_queue_threshold(),
            idle_threshold: default_idle_threshold(),
            window: default_window(),
            step: default_step(),
        }
    }
}

/// `[default]` section: per-task defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct DefaultSection {
    #[serde(default)]
    pub priority: i64,

    #[serde(default)]
    pub max_retries: u32,

    #[serde(default = "default_task_timeout")]
    pub timeout: String,
}

fn default_task_timeout() -> String {
    "60s".to_string()
}

impl Default for DefaultSection {
    fn default() -> Self {
        Self {
            priority: 0,
            max_retries: 0,
            timeout: default_task_timeout(),
        }
    }
}

/// `[task.<id>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    /// Shell command the process worker runs. Becomes the task payload.
    pub cmd: String,

    /// Dependency list: this task waits for all tasks listed here to succeed.
    #[serde(default)]
    pub after: Vec<String>,

    /// Higher runs first. Falls back to `default.priority`.
    #[serde(default)]
    pub priority: Option<i64>,

    /// Falls back to `default.max_retries`.
    #[serde(default)]
    pub max_retries: Option<u32>,

    /// Per-attempt timeout, e.g. `"30s"`. Falls back to `default.timeout`.
    #[serde(default)]
    pub timeout: Option<String>,
}

impl TaskConfig {
    pub fn effective_priority(&self, defaults: &DefaultSection) -> i64 {
        self.priority.unwrap_or(defaults.priority)
    }

    pub fn effective_max_retries(&self, defaults: &DefaultSection) -> u32 {
        self.max_retries.unwrap_or(defaults.max_retries)
    }

    pub fn effective_timeout<'a>(&'a self, defaults: &'a DefaultSection) -> &'a str {
        self.timeout.as_deref().unwrap_or(&defaults.timeout)
    }
}
