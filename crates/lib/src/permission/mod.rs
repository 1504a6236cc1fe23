//! Access to the target permission system.
//!
//! Grants are `(subject, role, scope)` triples. The reconciliation engine reads
//! the current set through [`PermissionClient::list_current_grants`] and
//! changes it one grant at a time.

use std::{collections::BTreeSet, fmt};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

pub mod errors;
pub mod grafana;
pub mod memory;

pub use errors::PermissionError;
pub use grafana::{GrafanaAuth, GrafanaClient};
pub use memory::InMemoryPermissions;

/// A role held by a subject within a scope.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Grant {
    pub subject: String,
    pub role: String,
    pub scope: String,
}

impl Grant {
    pub fn new(
        subject: impl Into<String>,
        role: impl Into<String>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            role: role.into(),
            scope: scope.into(),
        }
    }
}

impl fmt::Display for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.subject, self.role, self.scope)
    }
}

/// Read and write access to grants in the target system.
#[async_trait]
pub trait PermissionClient: Send + Sync {
    /// Read every grant currently held in the target system.
    ///
    /// Failures must be reported as [`PermissionError::FetchFailed`].
    async fn list_current_grants(&self) -> Result<BTreeSet<Grant>>;

    /// Give `grant.subject` the role `grant.role` in `grant.scope`.
    async fn apply_grant(&self, grant: &Grant) -> Result<()>;

    /// Take the role `grant.role` in `grant.scope` away from `grant.subject`.
    async fn revoke_grant(&self, grant: &Grant) -> Result<()>;
}
