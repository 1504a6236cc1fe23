//! In-memory directory.
//!
//! [`StaticDirectory`] serves a set of groups, either constructed in code or
//! loaded from a JSON snapshot file. A file-backed directory re-reads the file
//! at the start of every build, so edits show up on the next sync cycle:
//!
//! ```json
//! { "groups": [ { "id": "eng@example.com", "members": ["bob@example.com"] } ] }
//! ```
//!
//! It also supports injected failures and latency so sync cycles can be
//! exercised without a network.

use std::{
    path::{Path, PathBuf},
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{DirectoryClient, DirectoryError};
use crate::Result;

/// One group in a snapshot file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotGroup {
    pub id: String,
    #[serde(default)]
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Snapshot {
    groups: Vec<SnapshotGroup>,
}

/// Directory backed by an in-memory list of groups.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    groups: Mutex<Vec<SnapshotGroup>>,
    /// Snapshot file re-read by every `list_groups` call.
    source: Option<PathBuf>,
    failing: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl StaticDirectory {
    /// Create a directory serving `groups` as `(id, direct members)` pairs.
    pub fn new<I>(groups: I) -> Self
    where
        I: IntoIterator<Item = (String, Vec<String>)>,
    {
        let groups = groups
            .into_iter()
            .map(|(id, members)| SnapshotGroup { id, members })
            .collect();
        Self {
            groups: Mutex::new(groups),
            ..Default::default()
        }
    }

    /// Load a directory snapshot from a JSON file.
    ///
    /// The file is read now, failing early if it is missing or malformed, and
    /// again whenever a new tree is built.
    pub async fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let groups = read_snapshot(&path).await?;
        Ok(Self {
            groups: Mutex::new(groups),
            source: Some(path),
            ..Default::default()
        })
    }

    /// Replace the served groups; the next build sees the new data.
    pub fn replace_groups<I>(&self, groups: I)
    where
        I: IntoIterator<Item = (String, Vec<String>)>,
    {
        *self.groups.lock().unwrap_or_else(PoisonError::into_inner) = groups
            .into_iter()
            .map(|(id, members)| SnapshotGroup { id, members })
            .collect();
    }

    /// Make every subsequent request fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Delay every `list_groups` call by `delay`.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    fn check_failing(&self, operation: &str) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DirectoryError::FetchFailed {
                operation: operation.to_string(),
                reason: "directory unavailable".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

async fn read_snapshot(path: &Path) -> Result<Vec<SnapshotGroup>> {
    let read_err = |reason: String| DirectoryError::SnapshotRead {
        path: path.display().to_string(),
        reason,
    };
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| read_err(e.to_string()))?;
    let snapshot: Snapshot = serde_json::from_str(&raw).map_err(|e| read_err(e.to_string()))?;
    Ok(snapshot.groups)
}

#[async_trait]
impl DirectoryClient for StaticDirectory {
    async fn list_groups(&self) -> Result<Vec<String>> {
        let delay = *self.delay.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check_failing("list groups")?;
        if let Some(path) = &self.source {
            let fresh = read_snapshot(path).await?;
            *self.groups.lock().unwrap_or_else(PoisonError::into_inner) = fresh;
        }
        let groups = self.groups.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(groups.iter().map(|g| g.id.clone()).collect())
    }

    async fn list_direct_members(&self, group: &str) -> Result<Vec<String>> {
        self.check_failing("list members")?;
        let groups = self.groups.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(groups
            .iter()
            .filter(|g| g.id == group)
            .flat_map(|g| g.members.iter().cloned())
            .collect())
    }
}
