// src/pool/heartbeat.rs

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::engine::SchedulerHandle;
use crate::types::WorkerId;

/// Spawn the heartbeat loop for a worker. The loop ends on its own once the
/// scheduler stops accepting messages; otherwise abort the returned handle.
pub fn spawn_heartbeat(
    worker: WorkerId,
    handle: SchedulerHandle,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if handle.heartbeat(&worker).await.is_err() {
                debug!(worker = %worker, "scheduler gone; heartbeat loop exiting");
                break;
            }
        }
    })
}
