// src/engine/runtime.rs

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::errors::{Result, SchedulerError};
use crate::pool::{Dispatch, Worker, WorkerFactory, WorkerLink, WorkerResult};
use crate::types::WorkerId;

use super::core::SchedulerCore;
use super::handle::SchedulerHandle;
use super::{Command, CoreAction, Message, Query, TimerKey};

/// Drives the scheduler core in response to channel messages, and performs
/// the actions it returns against workers and timers.
///
/// This is a pure IO shell around [`SchedulerCore`], which contains all the
/// scheduling semantics. This struct owns the worker capability objects,
/// the timer tasks and the periodic tickers; it never changes task or
/// worker state itself.
pub struct Runtime<F: WorkerFactory> {
    core: SchedulerCore,
    rx: mpsc::Receiver<Message>,
    handle: SchedulerHandle,
    factory: F,
    workers: HashMap<WorkerId, Box<dyn Worker>>,
    timers: HashMap<TimerKey, AbortHandle>,
    /// Commands generated by the shell itself (registrations after a spawn,
    /// failed dispatches). Processed before the next channel message.
    backlog: VecDeque<Command>,
    idle_waiters: Vec<oneshot::Sender<Result<()>>>,
    tickers: Vec<JoinHandle<()>>,
}

impl<F: WorkerFactory> fmt::Debug for Runtime<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .field("workers", &self.workers.keys().collect::<Vec<_>>())
            .field("timers", &self.timers.len())
            .finish_non_exhaustive()
    }
}

impl<F: WorkerFactory> Runtime<F> {
    pub fn new(
        core: SchedulerCore,
        rx: mpsc::Receiver<Message>,
        handle: SchedulerHandle,
        factory: F,
    ) -> Self {
        Self {
            core,
            rx,
            handle,
            factory,
            workers: HashMap::new(),
            timers: HashMap::new(),
            backlog: VecDeque::new(),
            idle_waiters: Vec::new(),
            tickers: Vec::new(),
        }
    }

    /// Main loop.
    ///
    /// - Spawns the initial pool and the periodic tickers.
    /// - Consumes messages from the channel one at a time.
    /// - Feeds commands into the core and performs the returned actions.
    /// - Stops once the core says so (after a shutdown has drained).
    pub async fn run(mut self) -> Result<()> {
        info!("dagpool scheduler started");

        self.start_tickers();
        let bootstrap = self.core.bootstrap();
        self.perform(bootstrap.actions).await;

        let mut keep_running = true;
        while keep_running {
            keep_running = match self.backlog.pop_front() {
                Some(command) => self.apply(command, None).await,
                None => match self.rx.recv().await {
                    Some(message) => self.handle_message(message).await,
                    None => {
                        info!("scheduler channel closed; exiting");
                        false
                    }
                },
            };
            self.notify_idle_waiters();
        }

        self.teardown().await;
        info!("scheduler exiting");
        Ok(())
    }

    async fn handle_message(&mut self, message: Message) -> bool {
        match message {
            Message::Command { command, ack } => self.apply(command, ack).await,
            Message::Timer(key) => {
                self.timers.remove(&key);
                self.apply(key.into_command(), None).await
            }
            Message::Attach(WorkerLink(worker)) => self.attach(worker).await,
            Message::Query(query) => {
                self.answer(query);
                true
            }
        }
    }

    /// Feed one command to the core and perform the resulting actions.
    async fn apply(&mut self, command: Command, ack: Option<oneshot::Sender<Result<()>>>) -> bool {
        debug!(?command, "scheduler received command");
        let now = tokio::time::Instant::now().into_std();

        match self.core.step(command, now) {
            Ok(step) => {
                if let Some(ack) = ack {
                    let _ = ack.send(Ok(()));
                }
                self.perform(step.actions).await;
                step.keep_running
            }
            Err(err) => {
                debug!(error = %err, "command rejected");
                if let Some(ack) = ack {
                    let _ = ack.send(Err(err));
                }
                true
            }
        }
    }

    async fn attach(&mut self, mut worker: Box<dyn Worker>) -> bool {
        let id = worker.id().to_string();

        if self.workers.contains_key(&id) {
            warn!(worker = %id, "a worker with this id is already attached; stopping the newcomer");
            if let Err(e) = worker.stop().await {
                debug!(worker = %id, error = %e, "stopping duplicate worker failed");
            }
            let timestamp = tokio::time::Instant::now().into_std();
            return self
                .apply(Command::Heartbeat { worker: id, timestamp }, None)
                .await;
        }

        self.workers.insert(id.clone(), worker);
        self.apply(Command::WorkerRegistered { worker: id }, None)
            .await
    }

    fn answer(&mut self, query: Query) {
        match query {
            Query::Status { task, reply } => {
                let _ = reply.send(self.core.status(&task));
            }
            Query::Metrics { reply } => {
                let now = tokio::time::Instant::now().into_std();
                let _ = reply.send(self.core.metrics(now));
            }
            Query::WaitIdle { reply } => {
                if self.core.is_quiescent() {
                    let _ = reply.send(Ok(()));
                } else {
                    self.idle_waiters.push(reply);
                }
            }
        }
    }

    fn notify_idle_waiters(&mut self) {
        if self.idle_waiters.is_empty() || !self.core.is_quiescent() {
            return;
        }
        for waiter in self.idle_waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
    }

    /// Perform actions from the core, in order.
    async fn perform(&mut self, actions: Vec<CoreAction>) {
        for action in actions {
            match action {
                CoreAction::Execute { worker, dispatch } => self.execute(worker, dispatch).await,
                CoreAction::CancelOnWorker {
                    worker,
                    task,
                    epoch,
                } => match self.workers.get_mut(&worker) {
                    Some(w) => {
                        if let Err(e) = w.cancel(task.clone(), epoch).await {
                            // The grace timer takes care of an unreachable worker.
                            warn!(worker = %worker, task = %task, epoch, error = %e, "failed to deliver cancel");
                        }
                    }
                    None => debug!(worker = %worker, task = %task, "cancel for detached worker dropped"),
                },
                CoreAction::ArmTimer { key, delay } => self.arm_timer(key, delay),
                CoreAction::DisarmTimer { key } => {
                    if let Some(timer) = self.timers.remove(&key) {
                        timer.abort();
                    }
                }
                CoreAction::SpawnWorker { worker } => self.spawn_worker(worker),
                CoreAction::StopWorker { worker } => self.stop_worker(&worker).await,
            }
        }
    }

    async fn execute(&mut self, worker: WorkerId, dispatch: Dispatch) {
        let outcome = match self.workers.get_mut(&worker) {
            Some(w) => w.execute(dispatch.clone()).await,
            None => Err(SchedulerError::Other(anyhow!(
                "worker '{worker}' is not attached"
            ))),
        };

        if let Err(err) = outcome {
            warn!(
                worker = %worker,
                task = %dispatch.task,
                epoch = dispatch.epoch,
                error = %err,
                "dispatch failed"
            );
            self.backlog
                .push_back(Command::ResultReported(WorkerResult::failed(
                    &dispatch,
                    &worker,
                    format!("dispatch failed: {err}"),
                )));
        }
    }

    fn arm_timer(&mut self, key: TimerKey, delay: Duration) {
        if let Some(previous) = self.timers.remove(&key) {
            previous.abort();
        }

        let handle = self.handle.clone();
        let fired = key.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if handle.fire(fired).await.is_err() {
                debug!("scheduler gone before timer fired");
            }
        });
        self.timers.insert(key, timer.abort_handle());
    }

    fn spawn_worker(&mut self, id: WorkerId) {
        match self.factory.spawn(id.clone(), self.handle.clone()) {
            Ok(worker) => {
                debug!(worker = %id, "worker spawned");
                self.workers.insert(id.clone(), worker);
                self.backlog
                    .push_back(Command::WorkerRegistered { worker: id });
            }
            Err(err) => {
                warn!(worker = %id, error = %err, "worker factory failed");
                self.backlog.push_back(Command::SpawnFailed { worker: id });
            }
        }
    }

    async fn stop_worker(&mut self, id: &str) {
        if let Some(mut worker) = self.workers.remove(id) {
            info!(worker = %id, "stopping worker");
            if let Err(e) = worker.stop().await {
                warn!(worker = %id, error = %e, "worker did not stop cleanly");
            }
        }
    }

    fn start_tickers(&mut self) {
        let sweep_every = (self.core.config().pool.heartbeat_interval / 2).max(Duration::from_millis(1));
        self.tickers.push(spawn_ticker(
            self.handle.clone(),
            sweep_every,
            Command::HeartbeatSweep,
        ));

        let scaler = &self.core.config().scaler;
        if scaler.enabled {
            let every = scaler.interval.max(Duration::from_millis(1));
            self.tickers
                .push(spawn_ticker(self.handle.clone(), every, Command::ScaleTick));
        }
    }

    async fn teardown(&mut self) {
        for ticker in self.tickers.drain(..) {
            ticker.abort();
        }
        for (_, timer) in self.timers.drain() {
            timer.abort();
        }
        for (id, mut worker) in self.workers.drain() {
            if let Err(e) = worker.stop().await {
                warn!(worker = %id, error = %e, "worker did not stop cleanly");
            }
        }
        for waiter in self.idle_waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
    }
}

/// Send `command` into the scheduler every `every`, starting one period
/// from now.
fn spawn_ticker(handle: SchedulerHandle, every: Duration, command: Command) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if handle.notify(command.clone()).await.is_err() {
                break;
            }
        }
    })
}

/// Start a scheduler on the current Tokio runtime.
///
/// Returns the client handle and the join handle of the scheduler task; the
/// latter resolves once the scheduler has shut down.
pub fn spawn_scheduler<F>(
    config: SchedulerConfig,
    factory: F,
) -> (SchedulerHandle, JoinHandle<Result<()>>)
where
    F: WorkerFactory + 'static,
{
    let (tx, rx) = mpsc::channel(config.command_buffer.max(1));
    let handle = SchedulerHandle::new(tx);
    let core = SchedulerCore::new(config);
    let runtime = Runtime::new(core, rx, handle.clone(), factory);
    let join = tokio::spawn(runtime.run());
    (handle, join)
}
