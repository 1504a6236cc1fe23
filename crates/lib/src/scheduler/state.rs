//! Scheduler state, published snapshots and cycle reports.

use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;

use crate::{membership::GroupTree, reconcile::CycleSummary};

/// Phase of the sync state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Building,
    Reconciling,
}

/// Shared reference to the most recently published [`GroupTree`].
///
/// The lock is held only to swap or clone the `Arc`, never while a tree is
/// built or queried, so readers always see a complete snapshot.
#[derive(Debug, Clone, Default)]
pub struct TreeHandle {
    current: Arc<RwLock<Option<Arc<GroupTree>>>>,
}

impl TreeHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current snapshot, if one has been published.
    pub fn current(&self) -> Option<Arc<GroupTree>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Publish `tree`, replacing the previous snapshot, and return it.
    ///
    /// Readers holding the previous snapshot keep using it until they drop it.
    pub fn publish(&self, tree: GroupTree) -> Arc<GroupTree> {
        let tree = Arc::new(tree);
        *self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(tree.clone());
        tree
    }

    /// True once a snapshot has been published.
    pub fn is_loaded(&self) -> bool {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

/// How a cycle ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CycleOutcome {
    /// The tree was built and a reconciliation pass ran.
    Completed { summary: CycleSummary },
    /// The directory could not be read or returned invalid data.
    BuildFailed { error: String },
    /// The current grants could not be read.
    ReconcileFailed { error: String },
    /// The cycle exceeded its timeout and was abandoned.
    TimedOut { timeout_ms: u64 },
}

impl CycleOutcome {
    /// True if this outcome makes the scheduler ready.
    pub fn counts_toward_readiness(&self) -> bool {
        matches!(self, CycleOutcome::Completed { .. })
    }

    /// The reconciliation summary, if the cycle got that far.
    pub fn summary(&self) -> Option<&CycleSummary> {
        match self {
            CycleOutcome::Completed { summary } => Some(summary),
            _ => None,
        }
    }
}

/// Record of one finished cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Sequence number, starting at 1.
    pub cycle: u64,
    pub started_at: String,
    pub finished_at: String,
    pub outcome: CycleOutcome,
}

/// Point-in-time view of the scheduler, served on `/admin/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerStatus {
    pub state: SyncState,
    pub ready: bool,
    pub cycles_completed: u64,
    pub consecutive_failures: u32,
    pub groups: Option<usize>,
    pub users: Option<usize>,
    pub last_report: Option<CycleReport>,
}
