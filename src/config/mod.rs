// src/config/mod.rs

//! Configuration loading and validation for dagpool.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Turn it into runtime settings with real durations (`settings.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate basic invariants like DAG correctness and pool bounds
//!   (`validate.rs`).

pub mod duration;
pub mod loader;
pub mod model;
pub mod settings;
pub mod validate;

pub use duration::parse_duration;
pub use loader::{load_and_validate, load_from_path};
pub use model::{
    ConfigFile, DefaultSection, PoolSection, RawConfigFile, RetrySection, ScalerSection,
    SchedulerSection, TaskConfig,
};
pub use settings::{PoolConfig, RetryPolicy, ScalerConfig, SchedulerConfig};
