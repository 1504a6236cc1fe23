//! Error types for the permission system client.

use thiserror::Error as ThisError;

use super::Grant;
use crate::Error;

/// Errors raised while reading or changing grants in the permission system.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum PermissionError {
    /// Current grants could not be read; no diff can be computed.
    #[error("Failed to fetch current grants: {reason}")]
    FetchFailed {
        /// Description of the failure
        reason: String,
    },

    /// A single grant or revoke operation failed.
    #[error("Grant operation failed for {grant}: {reason}")]
    GrantOperationFailed {
        /// The grant that could not be applied or revoked
        grant: Grant,
        /// Description of the failure
        reason: String,
    },

    /// The scope named by a grant does not exist in the permission system.
    #[error("Scope not found: {scope}")]
    ScopeNotFound {
        /// The missing scope
        scope: String,
    },
}

impl PermissionError {
    /// Check if this error prevented reading the current state.
    pub fn is_fetch_failure(&self) -> bool {
        matches!(self, PermissionError::FetchFailed { .. })
    }

    /// Check if this error is a failed grant or revoke.
    pub fn is_grant_operation_failure(&self) -> bool {
        matches!(
            self,
            PermissionError::GrantOperationFailed { .. } | PermissionError::ScopeNotFound { .. }
        )
    }

    /// Check if this error is a missing scope.
    pub fn is_not_found(&self) -> bool {
        matches!(self, PermissionError::ScopeNotFound { .. })
    }
}

impl From<PermissionError> for Error {
    fn from(err: PermissionError) -> Self {
        Error::Permission(err)
    }
}
