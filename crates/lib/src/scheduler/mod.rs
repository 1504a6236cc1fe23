//! Periodic build-and-reconcile driver.
//!
//! [`SyncScheduler`] runs the cycle `Idle → Building → Reconciling → Idle`:
//! build a fresh [`GroupTree`] from the directory, publish it, then reconcile
//! grants against it. Cycles never overlap; a tick or request that arrives
//! while a cycle is running is dropped, not queued.
//!
//! The scheduler becomes ready after the first cycle that reaches a
//! reconciliation summary. Directory failures, permission fetch failures and
//! timeouts are reported and retried on the next tick.

use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::{
    Result,
    clock::{Clock, SystemClock},
    directory::DirectoryClient,
    membership::GroupTree,
    permission::PermissionClient,
    reconcile::{CycleStatus, ReconciliationEngine},
};

pub mod errors;
pub mod state;

pub use errors::SchedulerError;
pub use state::{CycleOutcome, CycleReport, SchedulerStatus, SyncState, TreeHandle};

/// Timing for the background loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSchedulerConfig {
    /// Time between cycle starts.
    pub interval: Duration,
    /// A cycle running longer than this is abandoned.
    pub cycle_timeout: Duration,
}

impl Default for SyncSchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            cycle_timeout: Duration::from_secs(600),
        }
    }
}

#[derive(Debug)]
struct Progress {
    state: SyncState,
    cycles_started: u64,
    cycles_completed: u64,
    consecutive_failures: u32,
    last_report: Option<CycleReport>,
}

struct Inner {
    directory: Arc<dyn DirectoryClient>,
    permissions: Arc<dyn PermissionClient>,
    engine: ReconciliationEngine,
    config: SyncSchedulerConfig,
    clock: Arc<dyn Clock>,
    tree: TreeHandle,
    in_flight: AtomicBool,
    ready: AtomicBool,
    progress: Mutex<Progress>,
}

impl Inner {
    fn progress(&self) -> std::sync::MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: SyncState) {
        self.progress().state = state;
    }
}

/// Single-flight guard: at most one cycle holds it at a time. Dropping it
/// returns the state machine to `Idle`, including when a cycle times out.
struct CycleGuard<'a> {
    inner: &'a Inner,
}

impl<'a> CycleGuard<'a> {
    fn acquire(inner: &'a Inner) -> Option<Self> {
        inner
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { inner })
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.inner.set_state(SyncState::Idle);
        self.inner.in_flight.store(false, Ordering::Release);
    }
}

/// Drives sync cycles and owns the published membership snapshot.
///
/// Cloning is cheap; clones share the same state.
#[derive(Clone)]
pub struct SyncScheduler {
    inner: Arc<Inner>,
}

impl SyncScheduler {
    /// Create a scheduler using the system clock.
    pub fn new(
        directory: Arc<dyn DirectoryClient>,
        permissions: Arc<dyn PermissionClient>,
        engine: ReconciliationEngine,
        config: SyncSchedulerConfig,
    ) -> Self {
        Self::with_clock(directory, permissions, engine, config, Arc::new(SystemClock))
    }

    /// Create a scheduler stamping reports with `clock`.
    pub fn with_clock(
        directory: Arc<dyn DirectoryClient>,
        permissions: Arc<dyn PermissionClient>,
        engine: ReconciliationEngine,
        config: SyncSchedulerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                directory,
                permissions,
                engine,
                config,
                clock,
                tree: TreeHandle::new(),
                in_flight: AtomicBool::new(false),
                ready: AtomicBool::new(false),
                progress: Mutex::new(Progress {
                    state: SyncState::Idle,
                    cycles_started: 0,
                    cycles_completed: 0,
                    consecutive_failures: 0,
                    last_report: None,
                }),
            }),
        }
    }

    /// Handle to the published membership snapshot.
    pub fn tree_handle(&self) -> TreeHandle {
        self.inner.tree.clone()
    }

    /// True once a cycle has completed a reconciliation pass.
    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Acquire)
    }

    /// True while a cycle is running.
    pub fn is_busy(&self) -> bool {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Current phase of the state machine.
    pub fn state(&self) -> SyncState {
        self.inner.progress().state
    }

    /// Snapshot of state, readiness and the last report.
    pub fn status(&self) -> SchedulerStatus {
        let tree = self.inner.tree.current();
        let progress = self.inner.progress();
        SchedulerStatus {
            state: progress.state,
            ready: self.is_ready(),
            cycles_completed: progress.cycles_completed,
            consecutive_failures: progress.consecutive_failures,
            groups: tree.as_ref().map(|t| t.group_count()),
            users: tree.as_ref().map(|t| t.user_count()),
            last_report: progress.last_report.clone(),
        }
    }

    /// Run one cycle now.
    ///
    /// Returns [`SchedulerError::CycleInProgress`] without doing anything if
    /// another cycle holds the single-flight guard. Cycle failures are not
    /// errors here; they are described by the report's outcome.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let _guard = CycleGuard::acquire(&self.inner).ok_or(SchedulerError::CycleInProgress)?;

        let cycle = {
            let mut progress = self.inner.progress();
            progress.cycles_started += 1;
            progress.cycles_started
        };
        let started_at = self.inner.clock.now_rfc3339();
        let timeout = self.inner.config.cycle_timeout;

        let outcome = match tokio::time::timeout(timeout, self.execute_cycle())
            .instrument(info_span!("sync_cycle", cycle))
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(cycle, "{}", SchedulerError::CycleTimedOut { timeout_ms });
                CycleOutcome::TimedOut { timeout_ms }
            }
        };

        let report = CycleReport {
            cycle,
            started_at,
            finished_at: self.inner.clock.now_rfc3339(),
            outcome,
        };
        self.record(&report);
        Ok(report)
    }

    async fn execute_cycle(&self) -> CycleOutcome {
        self.inner.set_state(SyncState::Building);
        let tree = match GroupTree::build(self.inner.directory.as_ref()).await {
            Ok(tree) => self.inner.tree.publish(tree),
            Err(e) => {
                error!("Failed to build group tree: {e}");
                return CycleOutcome::BuildFailed {
                    error: e.to_string(),
                };
            }
        };

        self.inner.set_state(SyncState::Reconciling);
        match self
            .inner
            .engine
            .reconcile(&tree, self.inner.permissions.as_ref())
            .await
        {
            Ok(summary) => {
                match summary.status {
                    CycleStatus::Success => info!(
                        added = summary.added,
                        removed = summary.removed,
                        "Sync cycle completed"
                    ),
                    _ => warn!(
                        added = summary.added,
                        removed = summary.removed,
                        failed = summary.failed,
                        "Sync cycle completed with grant failures"
                    ),
                }
                CycleOutcome::Completed { summary }
            }
            Err(e) => {
                error!("Reconciliation aborted: {e}");
                CycleOutcome::ReconcileFailed {
                    error: e.to_string(),
                }
            }
        }
    }

    fn record(&self, report: &CycleReport) {
        let mut progress = self.inner.progress();
        if report.outcome.counts_toward_readiness() {
            progress.cycles_completed += 1;
            progress.consecutive_failures = 0;
            if !self.inner.ready.swap(true, Ordering::AcqRel) {
                info!(cycle = report.cycle, "Scheduler is ready");
            }
        } else {
            progress.consecutive_failures += 1;
        }
        progress.last_report = Some(report.clone());
    }

    /// Spawn the background loop on the current tokio runtime.
    ///
    /// The first cycle starts immediately; later ones follow the configured
    /// interval.
    pub fn start(&self) -> SchedulerHandle {
        let (tx, rx) = mpsc::channel(16);
        let task = tokio::spawn(self.clone().run(rx));
        SchedulerHandle {
            scheduler: self.clone(),
            commands: tx,
            task,
        }
    }

    async fn run(self, mut commands: mpsc::Receiver<SchedulerCommand>) {
        async move {
            let period = self.inner.config.interval;
            info!(interval_secs = period.as_secs(), "Starting sync scheduler");
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    command = commands.recv() => match command {
                        Some(SchedulerCommand::RunNow { response }) => {
                            if self.is_busy() {
                                let _ = response.send(Err(SchedulerError::CycleInProgress.into()));
                            } else {
                                let scheduler = self.clone();
                                tokio::spawn(async move {
                                    let _ = response.send(scheduler.run_cycle().await);
                                });
                            }
                        }
                        Some(SchedulerCommand::Shutdown) | None => {
                            info!("Sync scheduler shutting down");
                            break;
                        }
                    },

                    _ = ticker.tick() => {
                        if self.is_busy() {
                            debug!("Sync cycle still running, dropping tick");
                            continue;
                        }
                        let scheduler = self.clone();
                        tokio::spawn(async move {
                            if let Err(e) = scheduler.run_cycle().await {
                                debug!("Scheduled cycle skipped: {e}");
                            }
                        });
                    }
                }
            }
        }
        .instrument(info_span!("sync_scheduler"))
        .await
    }
}

/// Commands accepted by the background loop.
#[derive(Debug)]
enum SchedulerCommand {
    /// Start a cycle immediately and report its result.
    RunNow {
        response: oneshot::Sender<Result<CycleReport>>,
    },
    /// Stop the loop. Cycles already running finish on their own.
    Shutdown,
}

/// Control handle for a running background loop.
pub struct SchedulerHandle {
    scheduler: SyncScheduler,
    commands: mpsc::Sender<SchedulerCommand>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// The scheduler driven by this loop.
    pub fn scheduler(&self) -> &SyncScheduler {
        &self.scheduler
    }

    /// Ask the loop to run a cycle now and wait for its report.
    pub async fn run_now(&self) -> Result<CycleReport> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(SchedulerCommand::RunNow { response: tx })
            .await
            .map_err(|e| SchedulerError::CommandSendError(e.to_string()))?;
        rx.await
            .map_err(|e| SchedulerError::CommandSendError(format!("Response channel error: {e}")))?
    }

    /// Stop the loop and wait for it to exit.
    pub async fn shutdown(self) -> Result<()> {
        // A closed channel means the loop already exited.
        let _ = self.commands.send(SchedulerCommand::Shutdown).await;
        self.task
            .await
            .map_err(|e| SchedulerError::TaskFailed(e.to_string()))?;
        Ok(())
    }
}
