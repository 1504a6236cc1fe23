//! Error types for directory access.

use thiserror::Error as ThisError;

use crate::Error;

/// Errors that can occur while reading groups from the directory.
///
/// Every variant means the current cycle could not obtain a complete view
/// of the directory; the scheduler retries on the next tick.
#[non_exhaustive]
#[derive(Debug, ThisError)]
pub enum DirectoryError {
    /// A request to the directory failed.
    #[error("Directory {operation} failed: {reason}")]
    FetchFailed {
        /// The operation being performed
        operation: String,
        /// Description of the failure
        reason: String,
    },

    /// The directory kept rejecting requests with rate-limit responses.
    #[error("Directory {operation} still rate limited after {attempts} attempts")]
    RateLimited {
        /// The operation being performed
        operation: String,
        /// Number of attempts made
        attempts: u32,
    },

    /// The directory answered with a body that could not be decoded.
    #[error("Invalid directory response for {operation}: {reason}")]
    InvalidResponse {
        /// The operation being performed
        operation: String,
        /// Description of the decoding problem
        reason: String,
    },

    /// A snapshot file could not be read.
    #[error("Failed to read directory snapshot {path}: {reason}")]
    SnapshotRead {
        /// Path of the snapshot
        path: String,
        /// Description of the failure
        reason: String,
    },
}

impl DirectoryError {
    /// Every directory error aborts the build of the current snapshot.
    pub fn is_fetch_failure(&self) -> bool {
        true
    }

    /// Check if this error came from rate limiting.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, DirectoryError::RateLimited { .. })
    }

    /// Check if the directory response could not be decoded.
    pub fn is_invalid_response(&self) -> bool {
        matches!(self, DirectoryError::InvalidResponse { .. })
    }
}

impl From<DirectoryError> for Error {
    fn from(err: DirectoryError) -> Self {
        Error::Directory(err)
    }
}
