//! Error types for building and querying a [`GroupTree`](super::GroupTree).

use thiserror::Error as ThisError;

use crate::Error;

/// Errors raised while building or querying the membership graph.
///
/// # Stability
///
/// - New variants may be added in minor versions (enum is `#[non_exhaustive]`)
/// - Helper methods like `is_*()` provide stable APIs
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum MembershipError {
    /// The queried group is not part of the current snapshot.
    #[error("Group not found: {group}")]
    GroupNotFound {
        /// Identifier that was looked up
        group: String,
    },

    /// The directory returned data that cannot form a valid snapshot.
    #[error("Invalid directory data: {reason}")]
    InvalidData {
        /// What was wrong with the data
        reason: String,
    },
}

impl MembershipError {
    /// Check if this error is a missing group.
    pub fn is_not_found(&self) -> bool {
        matches!(self, MembershipError::GroupNotFound { .. })
    }

    /// Check if this error is caused by malformed directory data.
    pub fn is_invalid_data(&self) -> bool {
        matches!(self, MembershipError::InvalidData { .. })
    }

    /// Get the group identifier if this error is about a missing group.
    pub fn group(&self) -> Option<&str> {
        match self {
            MembershipError::GroupNotFound { group } => Some(group),
            _ => None,
        }
    }
}

impl From<MembershipError> for Error {
    fn from(err: MembershipError) -> Self {
        Error::Membership(err)
    }
}
