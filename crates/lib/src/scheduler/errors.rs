//! Error types for the sync scheduler.

use thiserror::Error as ThisError;

use crate::Error;

/// Errors reported by [`SyncScheduler`](super::SyncScheduler) and its handle.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum SchedulerError {
    /// A cycle was requested while another one is still running.
    #[error("A sync cycle is already in progress")]
    CycleInProgress,

    /// A cycle ran longer than the configured cycle timeout and was abandoned.
    #[error("Sync cycle exceeded its {timeout_ms}ms timeout")]
    CycleTimedOut { timeout_ms: u64 },

    /// No group tree has been published yet.
    #[error("Membership data not loaded yet")]
    TreeNotReady,

    /// The background loop is gone and cannot receive commands.
    #[error("Failed to send command to sync scheduler: {0}")]
    CommandSendError(String),

    /// The background loop task panicked or was cancelled.
    #[error("Sync scheduler task failed: {0}")]
    TaskFailed(String),
}

impl SchedulerError {
    /// Check if the request was rejected because a cycle is running.
    pub fn is_busy(&self) -> bool {
        matches!(self, SchedulerError::CycleInProgress)
    }

    /// Check if a cycle was abandoned after its timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, SchedulerError::CycleTimedOut { .. })
    }

    /// Check if membership data is not available yet.
    pub fn is_not_ready(&self) -> bool {
        matches!(self, SchedulerError::TreeNotReady)
    }
}

impl From<SchedulerError> for Error {
    fn from(err: SchedulerError) -> Self {
        Error::Scheduler(err)
    }
}
