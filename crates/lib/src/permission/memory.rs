//! In-memory permission store.

use std::{
    collections::BTreeSet,
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;

use super::{Grant, PermissionClient, PermissionError};
use crate::Result;

/// [`PermissionClient`] that keeps grants in memory.
///
/// Individual grants can be marked as failing and the whole store can be made
/// unreachable, which lets tests drive the engine through its failure paths.
#[derive(Debug, Default)]
pub struct InMemoryPermissions {
    grants: Mutex<BTreeSet<Grant>>,
    failing_grants: Mutex<BTreeSet<Grant>>,
    unreachable: AtomicBool,
    applied: Mutex<Vec<Grant>>,
    revoked: Mutex<Vec<Grant>>,
}

impl InMemoryPermissions {
    /// Create a store holding `grants`.
    pub fn new(grants: impl IntoIterator<Item = Grant>) -> Self {
        Self {
            grants: Mutex::new(grants.into_iter().collect()),
            ..Default::default()
        }
    }

    /// Snapshot of the grants currently held.
    pub fn grants(&self) -> BTreeSet<Grant> {
        self.grants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Make every apply or revoke of `grant` fail.
    pub fn fail_on(&self, grant: Grant) {
        self.failing_grants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(grant);
    }

    /// Make `list_current_grants` fail while `unreachable` is set.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Grants successfully applied so far, in call order.
    pub fn applied(&self) -> Vec<Grant> {
        self.applied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Grants successfully revoked so far, in call order.
    pub fn revoked(&self) -> Vec<Grant> {
        self.revoked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn check_failing(&self, grant: &Grant) -> Result<()> {
        let failing = self
            .failing_grants
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if failing.contains(grant) {
            return Err(PermissionError::GrantOperationFailed {
                grant: grant.clone(),
                reason: "injected failure".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl PermissionClient for InMemoryPermissions {
    async fn list_current_grants(&self) -> Result<BTreeSet<Grant>> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(PermissionError::FetchFailed {
                reason: "permission system unreachable".to_string(),
            }
            .into());
        }
        Ok(self.grants())
    }

    async fn apply_grant(&self, grant: &Grant) -> Result<()> {
        self.check_failing(grant)?;
        self.grants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(grant.clone());
        self.applied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(grant.clone());
        Ok(())
    }

    async fn revoke_grant(&self, grant: &Grant) -> Result<()> {
        self.check_failing(grant)?;
        self.grants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(grant);
        self.revoked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(grant.clone());
        Ok(())
    }
}
