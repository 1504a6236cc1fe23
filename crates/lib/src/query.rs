//! Read-only membership queries over the published [`GroupTree`].

use std::sync::Arc;

use crate::{
    Result,
    membership::GroupTree,
    scheduler::{SchedulerError, TreeHandle},
};

/// Answers membership queries from the latest published snapshot.
///
/// Each query clones the snapshot `Arc` once and runs without holding any
/// lock, so a concurrent publish never affects a query in progress.
#[derive(Debug, Clone)]
pub struct QueryService {
    tree: TreeHandle,
}

impl QueryService {
    pub fn new(tree: TreeHandle) -> Self {
        Self { tree }
    }

    fn snapshot(&self) -> Result<Arc<GroupTree>> {
        self.tree
            .current()
            .ok_or_else(|| SchedulerError::TreeNotReady.into())
    }

    /// Members of `group`, sorted. Recursive queries return users only.
    ///
    /// Fails with `GroupNotFound` for unknown groups and `TreeNotReady` before
    /// the first snapshot is published.
    pub fn list_group_members(&self, group: &str, recurse: bool) -> Result<Vec<String>> {
        Ok(self.snapshot()?.list_group_members(group, recurse)?)
    }

    /// Groups `user` belongs to, directly or through nesting, sorted.
    ///
    /// An unknown user has no groups; that is not an error.
    pub fn list_user_groups(&self, user: &str) -> Result<Vec<String>> {
        Ok(self.snapshot()?.list_user_groups(user))
    }

    /// True once a snapshot is available.
    pub fn is_loaded(&self) -> bool {
        self.tree.is_loaded()
    }
}
