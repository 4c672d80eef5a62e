// src/pool/mod.rs

//! Worker pool.
//!
//! - [`registry`] is the liveness and assignment bookkeeping the scheduler
//!   core owns (status, heartbeats, retiring workers, pending spawns).
//! - [`worker`] defines the [`Worker`] capability the core dispatches
//!   through, plus the [`WorkerFactory`] used for scaling.
//! - [`protocol`] holds the message shapes exchanged with workers.
//! - [`local`], [`process`] and [`channel`] are the worker variants:
//!   in-process handler, subprocess, and a remote peer behind a channel.
//! - [`heartbeat`] is the shared heartbeat loop for local and process
//!   workers.

pub mod channel;
pub mod heartbeat;
pub mod local;
pub mod process;
pub mod protocol;
pub mod registry;
pub mod worker;

pub use channel::{ChannelWorker, WorkerInstruction};
pub use local::{LocalWorker, LocalWorkerFactory, TaskHandler};
pub use process::{ProcessWorker, ProcessWorkerFactory};
pub use protocol::{Dispatch, ResultStatus, WorkerResult};
pub use registry::{
    Assignment, DEAD_WORKERS_KEPT, Release, WorkerRegistry, WorkerSnapshot, WorkerStatus,
};
pub use worker::{Worker, WorkerFactory, WorkerLink};
