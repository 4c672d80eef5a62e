#![allow(dead_code)]

//! A fake remote worker: a [`ChannelWorker`] whose peer end follows a
//! script instead of running anything.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use dagpool::engine::SchedulerHandle;
use dagpool::pool::{ChannelWorker, Dispatch, WorkerInstruction, WorkerResult};
use dagpool::types::{DispatchEpoch, Payload, TaskId};

/// What the peer does with one dispatch.
#[derive(Debug, Clone)]
pub enum Reply {
    Succeed(Payload),
    Fail(String),
    /// Never report anything for this attempt.
    Hang,
}

pub type Script = Arc<dyn Fn(&Dispatch) -> Reply + Send + Sync>;

/// Script that succeeds every attempt with `"<task> ok"`.
pub fn always_succeed() -> Script {
    Arc::new(|d: &Dispatch| Reply::Succeed(Payload::from(format!("{} ok", d.task))))
}

#[derive(Debug, Clone)]
pub struct PeerOptions {
    /// `None` disables heartbeats entirely.
    pub heartbeat: Option<Duration>,
    /// Acknowledge cancel instructions with a `Cancelled` result.
    pub honour_cancel: bool,
}

impl Default for PeerOptions {
    fn default() -> Self {
        Self {
            heartbeat: Some(Duration::from_millis(200)),
            honour_cancel: true,
        }
    }
}

#[derive(Debug, Default)]
struct PeerLog {
    executed: Vec<Dispatch>,
    cancels: Vec<(TaskId, DispatchEpoch)>,
    stopped: bool,
}

/// Test-side view of a scripted peer.
pub struct ScriptedPeer {
    pub id: String,
    log: Arc<Mutex<PeerLog>>,
    alive: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl ScriptedPeer {
    /// Build the worker, hand it to the scheduler and start the peer loop.
    pub async fn attach(
        handle: &SchedulerHandle,
        id: &str,
        script: Script,
        options: PeerOptions,
    ) -> Self {
        let (worker, mut rx) = ChannelWorker::pair(id, 64);
        handle
            .register_worker(Box::new(worker))
            .await
            .expect("scheduler gone");

        let log = Arc::new(Mutex::new(PeerLog::default()));
        let alive = Arc::new(AtomicBool::new(true));
        let mut tasks = Vec::new();

        if let Some(every) = options.heartbeat {
            let handle = handle.clone();
            let alive = Arc::clone(&alive);
            let worker_id = id.to_string();
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(every);
                loop {
                    ticker.tick().await;
                    if !alive.load(Ordering::SeqCst) || handle.heartbeat(&worker_id).await.is_err() {
                        break;
                    }
                }
            }));
        }

        {
            let handle = handle.clone();
            let log = Arc::clone(&log);
            let alive = Arc::clone(&alive);
            let worker_id = id.to_string();
            tasks.push(tokio::spawn(async move {
                while let Some(instruction) = rx.recv().await {
                    if !alive.load(Ordering::SeqCst) {
                        continue;
                    }
                    match instruction {
                        WorkerInstruction::Execute(dispatch) => {
                            log.lock().unwrap().executed.push(dispatch.clone());
                            let result = match script(&dispatch) {
                                Reply::Succeed(payload) => {
                                    Some(WorkerResult::succeeded(&dispatch, &worker_id, payload))
                                }
                                Reply::Fail(error) => {
                                    Some(WorkerResult::failed(&dispatch, &worker_id, error))
                                }
                                Reply::Hang => None,
                            };
                            if let Some(result) = result {
                                let _ = handle.report(result).await;
                            }
                        }
                        WorkerInstruction::Cancel { task, epoch } => {
                            log.lock().unwrap().cancels.push((task.clone(), epoch));
                            if options.honour_cancel {
                                let _ = handle
                                    .report(WorkerResult::cancelled(&task, epoch, &worker_id))
                                    .await;
                            }
                        }
                        WorkerInstruction::Stop => {
                            log.lock().unwrap().stopped = true;
                            break;
                        }
                    }
                }
            }));
        }

        Self {
            id: id.to_string(),
            log,
            alive,
            tasks,
        }
    }

    /// Simulate a crash: stop heartbeating and ignore every instruction.
    pub fn crash(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub fn executed(&self) -> Vec<Dispatch> {
        self.log.lock().unwrap().executed.clone()
    }

    pub fn executed_tasks(&self) -> Vec<TaskId> {
        self.executed().into_iter().map(|d| d.task).collect()
    }

    pub fn cancels(&self) -> Vec<(TaskId, DispatchEpoch)> {
        self.log.lock().unwrap().cancels.clone()
    }

    pub fn was_stopped(&self) -> bool {
        self.log.lock().unwrap().stopped
    }
}

impl Drop for ScriptedPeer {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
