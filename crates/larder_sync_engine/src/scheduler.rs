//! Background scheduling of sync cycles.
//!
//! The scheduler owns a task that runs cycles on a timer and on demand.
//! At most one cycle runs at a time; triggers that arrive while a cycle is
//! running collapse into a single follow-up cycle.

use crate::adapter::EntityAdapter;
use crate::config::{RetryConfig, SyncConfig};
use crate::coordinator::SyncCoordinator;
use crate::error::{ErrorClass, SyncError, SyncResult};
use crate::service::EntitySyncService;
use crate::state::CycleReport;
use crate::transport::RemoteGateway;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Something that can run sync cycles.
#[async_trait]
pub trait CycleRunner: Send + Sync + 'static {
    /// Resource name, for logging.
    fn resource(&self) -> &'static str;

    /// Runs one cycle.
    async fn run_cycle(&self) -> SyncResult<CycleReport>;

    /// Cancels the running cycle.
    fn cancel(&self);
}

#[async_trait]
impl<A: EntityAdapter, G: RemoteGateway + 'static> CycleRunner for SyncCoordinator<A, G> {
    fn resource(&self) -> &'static str {
        A::RESOURCE
    }

    async fn run_cycle(&self) -> SyncResult<CycleReport> {
        SyncCoordinator::run_cycle(self).await
    }

    fn cancel(&self) {
        SyncCoordinator::cancel(self);
    }
}

#[async_trait]
impl<A: EntityAdapter, G: RemoteGateway + 'static> CycleRunner for EntitySyncService<A, G> {
    fn resource(&self) -> &'static str {
        A::RESOURCE
    }

    async fn run_cycle(&self) -> SyncResult<CycleReport> {
        self.sync().await
    }

    fn cancel(&self) {
        EntitySyncService::cancel(self);
    }
}

/// The latest scheduler outcome, published on a watch channel.
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    /// No cycle has finished yet.
    Idle,
    /// A cycle completed.
    Completed(Arc<CycleReport>),
    /// A cycle failed.
    Failed {
        /// Error class.
        class: ErrorClass,
        /// Error message.
        message: String,
        /// Consecutive retryable failures so far.
        attempt: u32,
    },
    /// Credentials were rejected; automatic cycles are paused until
    /// [`SyncScheduler::resume`].
    Suspended(String),
    /// The scheduler stopped.
    Stopped,
}

#[derive(Debug)]
enum Command {
    Trigger,
    Resume,
    Stop,
}

/// Handle to a running scheduler task.
pub struct SyncScheduler {
    runner: Arc<dyn CycleRunner>,
    commands: mpsc::Sender<Command>,
    events: watch::Receiver<SchedulerEvent>,
    suspended: Arc<AtomicBool>,
    stopping: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl SyncScheduler {
    /// Spawns the scheduler task. Must be called within a Tokio runtime.
    ///
    /// With no `sync_interval` in `config`, cycles run only on
    /// [`SyncScheduler::trigger`] and as backoff retries.
    pub fn start(runner: Arc<dyn CycleRunner>, config: &SyncConfig) -> Self {
        let (commands, receiver) = mpsc::channel(8);
        let (events_tx, events) = watch::channel(SchedulerEvent::Idle);
        let suspended = Arc::new(AtomicBool::new(false));
        let stopping = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn(run_loop(
            Arc::clone(&runner),
            config.sync_interval,
            config.retry.clone(),
            receiver,
            events_tx,
            Arc::clone(&suspended),
            Arc::clone(&stopping),
        ));

        Self {
            runner,
            commands,
            events,
            suspended,
            stopping,
            task,
        }
    }

    /// Requests a cycle as soon as possible.
    pub fn trigger(&self) {
        // A full queue already holds a trigger.
        let _ = self.commands.try_send(Command::Trigger);
    }

    /// Clears a suspension after credentials were refreshed, and runs a
    /// cycle.
    pub fn resume(&self) {
        let _ = self.commands.try_send(Command::Resume);
    }

    /// Returns true while suspended by an authorization failure.
    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    /// Subscribes to scheduler events.
    pub fn events(&self) -> watch::Receiver<SchedulerEvent> {
        self.events.clone()
    }

    /// Cancels the running cycle and stops the task. No further cycle is
    /// started, including follow-ups already queued.
    pub async fn shutdown(self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.runner.cancel();
        if self.commands.send(Command::Stop).await.is_err() {
            tracing::debug!("scheduler task already stopped");
        }
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "scheduler task failed");
        }
    }
}

async fn run_loop(
    runner: Arc<dyn CycleRunner>,
    interval: Option<Duration>,
    retry: RetryConfig,
    mut commands: mpsc::Receiver<Command>,
    events: watch::Sender<SchedulerEvent>,
    suspended: Arc<AtomicBool>,
    stopping: Arc<AtomicBool>,
) {
    let resource = runner.resource();
    let mut failures: u32 = 0;
    let mut rerun = false;

    'outer: loop {
        if !rerun {
            let wait = next_wait(interval, &retry, failures);
            let paused = suspended.load(Ordering::SeqCst);
            let run = tokio::select! {
                command = commands.recv() => match command {
                    None | Some(Command::Stop) => break 'outer,
                    Some(Command::Trigger) => !paused,
                    Some(Command::Resume) => {
                        suspended.store(false, Ordering::SeqCst);
                        failures = 0;
                        true
                    }
                },
                _ = sleep_for(wait), if !paused => true,
            };
            if !run {
                continue;
            }
        }

        if stopping.load(Ordering::SeqCst) {
            break 'outer;
        }
        match runner.run_cycle().await {
            Ok(report) => {
                failures = 0;
                events.send_replace(SchedulerEvent::Completed(Arc::new(report)));
            }
            Err(SyncError::CycleInProgress(_)) => {
                tracing::debug!(resource, "cycle already running elsewhere");
            }
            Err(e) => {
                let class = e.class();
                if class == ErrorClass::Unauthorized {
                    tracing::warn!(resource, error = %e, "suspending sync until re-authentication");
                    events.send_replace(SchedulerEvent::Suspended(e.to_string()));
                    suspended.store(true, Ordering::SeqCst);
                } else {
                    if e.is_retryable() {
                        failures = failures.saturating_add(1);
                    } else {
                        failures = 0;
                    }
                    events.send_replace(SchedulerEvent::Failed {
                        class,
                        message: e.to_string(),
                        attempt: failures,
                    });
                }
            }
        }

        // Collapse everything queued during the cycle into one follow-up.
        rerun = false;
        while let Ok(command) = commands.try_recv() {
            match command {
                Command::Trigger => rerun = true,
                Command::Resume => {
                    suspended.store(false, Ordering::SeqCst);
                    failures = 0;
                    rerun = true;
                }
                Command::Stop => break 'outer,
            }
        }
        rerun &= !suspended.load(Ordering::SeqCst);
    }

    tracing::debug!(resource, "scheduler stopped");
    events.send_replace(SchedulerEvent::Stopped);
}

fn next_wait(interval: Option<Duration>, retry: &RetryConfig, failures: u32) -> Option<Duration> {
    if failures > 0 && failures <= retry.max_attempts {
        Some(retry.delay_for_attempt(failures))
    } else {
        interval
    }
}

async fn sleep_for(wait: Option<Duration>) {
    match wait {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}
