//!
//! Permsync: keeps Grafana organization roles in line with directory group membership.
//!
//! ## Core Concepts
//!
//! * **GroupTree (`membership::GroupTree`)**: An immutable snapshot of the directory's
//!   groups and their direct members, answering "who is in group G" (directly or
//!   transitively) and "which groups is user U in". Nested groups may form cycles;
//!   every traversal visits each group at most once.
//! * **Rules (`rules::Rule`)**: Declarative mappings from group or user patterns to a
//!   role in a set of scopes (Grafana organizations).
//! * **ReconciliationEngine (`reconcile::ReconciliationEngine`)**: Expands rules against a
//!   GroupTree into the desired grants, diffs them against the grants the permission
//!   system reports, and applies the minimal set of additions and removals.
//! * **SyncScheduler (`scheduler::SyncScheduler`)**: Periodically builds a fresh GroupTree,
//!   publishes it atomically, and reconciles. Cycles never overlap.
//! * **QueryService (`query::QueryService`)**: Read-only queries over the last published
//!   GroupTree, exposed over HTTP by `server::router`.
//! * **Clients (`directory::DirectoryClient`, `permission::PermissionClient`)**: The two
//!   external systems, with HTTP implementations for Google Workspace and Grafana and
//!   in-memory implementations for tests and dry runs.

pub mod clock;
pub mod config;
pub mod directory;
pub mod membership;
pub mod permission;
pub mod query;
pub mod reconcile;
pub mod rules;
pub mod scheduler;
pub mod server;

#[cfg(any(test, feature = "testing"))]
pub use clock::FixedClock;
pub use clock::{Clock, SystemClock};
pub use config::{Config, ConfigError};
pub use membership::{GroupTree, MembershipError};
pub use permission::Grant;
pub use query::QueryService;
pub use reconcile::{CycleStatus, CycleSummary, ReconcilePlan, ReconciliationEngine};
pub use scheduler::{SchedulerHandle, SyncScheduler, SyncSchedulerConfig};

/// Result type used throughout the Permsync library.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for the Permsync library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Structured membership errors from the membership module
    #[error(transparent)]
    Membership(membership::MembershipError),

    /// Structured directory errors from the directory module
    #[error(transparent)]
    Directory(directory::DirectoryError),

    /// Structured permission-system errors from the permission module
    #[error(transparent)]
    Permission(permission::PermissionError),

    /// Structured scheduler errors from the scheduler module
    #[error(transparent)]
    Scheduler(scheduler::SchedulerError),

    /// Configuration errors from the config module
    #[error(transparent)]
    Config(config::ConfigError),
}

impl Error {
    /// Get the originating module for this error.
    pub fn module(&self) -> &'static str {
        match self {
            Error::Membership(_) => "membership",
            Error::Directory(_) => "directory",
            Error::Permission(_) => "permission",
            Error::Scheduler(_) => "scheduler",
            Error::Config(_) => "config",
        }
    }

    /// Check if this error indicates a resource was not found.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Membership(membership_err) => membership_err.is_not_found(),
            Error::Permission(permission_err) => permission_err.is_not_found(),
            _ => false,
        }
    }

    /// Check if the directory could not be read.
    pub fn is_directory_fetch_failed(&self) -> bool {
        match self {
            Error::Directory(directory_err) => directory_err.is_fetch_failure(),
            _ => false,
        }
    }

    /// Check if the directory returned data a GroupTree cannot be built from.
    pub fn is_invalid_data(&self) -> bool {
        match self {
            Error::Membership(membership_err) => membership_err.is_invalid_data(),
            _ => false,
        }
    }

    /// Check if the current grants could not be read.
    pub fn is_permission_fetch_failed(&self) -> bool {
        match self {
            Error::Permission(permission_err) => permission_err.is_fetch_failure(),
            _ => false,
        }
    }

    /// Check if a single grant or revoke failed.
    pub fn is_grant_operation_failed(&self) -> bool {
        match self {
            Error::Permission(permission_err) => permission_err.is_grant_operation_failure(),
            _ => false,
        }
    }

    /// Check if a request was rejected because a sync cycle is running.
    pub fn is_cycle_in_progress(&self) -> bool {
        match self {
            Error::Scheduler(scheduler_err) => scheduler_err.is_busy(),
            _ => false,
        }
    }

    /// Check if membership data has not been loaded yet.
    pub fn is_not_ready(&self) -> bool {
        match self {
            Error::Scheduler(scheduler_err) => scheduler_err.is_not_ready(),
            _ => false,
        }
    }

    /// Check if a sync cycle was abandoned after its timeout.
    pub fn is_timeout_error(&self) -> bool {
        match self {
            Error::Scheduler(scheduler_err) => scheduler_err.is_timeout(),
            _ => false,
        }
    }

    /// Check if this error is configuration-related.
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::Config(_))
    }
}
