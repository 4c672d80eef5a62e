// src/pool/channel.rs

//! Remote-style worker: every call becomes a [`WorkerInstruction`] sent over
//! an mpsc channel. Whatever sits on the other end (a network bridge, a test
//! peer) executes the task and reports back through its own
//! [`crate::engine::SchedulerHandle`], including heartbeats.
//!
//! Instructions are handed off with `try_send`: a peer that stops draining
//! its channel gets dispatch errors and missed cancels, and is eventually
//! declared dead by the heartbeat sweep.

use anyhow::anyhow;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

use crate::errors::{Result, SchedulerError};
use crate::pool::protocol::Dispatch;
use crate::pool::worker::{Worker, WorkerFuture};
use crate::types::{DispatchEpoch, TaskId, WorkerId};

#[derive(Debug, Clone)]
pub enum WorkerInstruction {
    Execute(Dispatch),
    Cancel { task: TaskId, epoch: DispatchEpoch },
    Stop,
}

pub struct ChannelWorker {
    id: WorkerId,
    tx: mpsc::Sender<WorkerInstruction>,
}

impl ChannelWorker {
    pub fn new(id: impl Into<WorkerId>, tx: mpsc::Sender<WorkerInstruction>) -> Self {
        Self { id: id.into(), tx }
    }

    /// Convenience: build the worker together with the peer's receiving end.
    pub fn pair(
        id: impl Into<WorkerId>,
        buffer: usize,
    ) -> (Self, mpsc::Receiver<WorkerInstruction>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self::new(id, tx), rx)
    }

    /// Queue an instruction without waiting for buffer space.
    fn offer(&self, instruction: WorkerInstruction) -> Result<()> {
        self.tx.try_send(instruction).map_err(|e| match e {
            TrySendError::Full(_) => {
                SchedulerError::Other(anyhow!("peer '{}' is not draining its instructions", self.id))
            }
            TrySendError::Closed(_) => {
                SchedulerError::Other(anyhow!("peer '{}' disconnected", self.id))
            }
        })
    }

    fn send(&self, instruction: WorkerInstruction) -> WorkerFuture<'_> {
        let sent = self.offer(instruction);
        Box::pin(async move { sent })
    }
}

impl Worker for ChannelWorker {
    fn id(&self) -> &str {
        &self.id
    }

    fn execute(&mut self, dispatch: Dispatch) -> WorkerFuture<'_> {
        self.send(WorkerInstruction::Execute(dispatch))
    }

    fn cancel(&mut self, task: TaskId, epoch: DispatchEpoch) -> WorkerFuture<'_> {
        self.send(WorkerInstruction::Cancel { task, epoch })
    }

    fn stop(&mut self) -> WorkerFuture<'_> {
        // Best effort. Dropping the worker closes the channel either way.
        if let Err(e) = self.offer(WorkerInstruction::Stop) {
            debug!(worker = %self.id, error = %e, "stop not delivered to peer");
        }
        Box::pin(async { Ok(()) })
    }
}
