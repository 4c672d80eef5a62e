// src/dag/mod.rs

//! Tasks and their dependency graph.
//!
//! - [`task`] defines what clients submit ([`TaskSpec`]), what the core
//!   tracks ([`Task`]) and the read-only view handed out ([`TaskSnapshot`]).
//! - [`graph`] holds the dependency DAG: admission with cycle checks,
//!   release of dependents, and cascade on failure or cancellation.

pub mod graph;
pub mod task;

pub use graph::{Admission, DependencyGraph, NodeStatus};
pub use task::{DEFAULT_TIMEOUT, Task, TaskOutcome, TaskSnapshot, TaskSpec, TaskState};
