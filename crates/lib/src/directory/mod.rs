//! Read access to the organization directory.
//!
//! The [`DirectoryClient`] trait is the only way the rest of the crate sees the
//! directory. Implementations return fully paginated results; pagination,
//! rate limiting and authentication stay inside the client.

use async_trait::async_trait;

use crate::Result;

pub mod errors;
pub mod google;
pub mod memory;

pub use errors::DirectoryError;
pub use google::{GoogleAuth, GoogleDirectory};
pub use memory::StaticDirectory;

/// Paginated read access to groups and their direct members.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// List the identifiers of every group in the directory.
    async fn list_groups(&self) -> Result<Vec<String>>;

    /// List the direct members of a group, users and groups alike.
    async fn list_direct_members(&self, group: &str) -> Result<Vec<String>>;
}
