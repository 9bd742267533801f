//! Seam to the node's local tree-head database.

use async_trait::async_trait;
use std::fmt::Debug;

use crate::SignedTreeHead;

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("database corrupt: {0}")]
    Corrupt(String),
    #[error("database I/O failed: {0}")]
    Io(String),
}

/// The local, durable record of tree heads this node has accepted.
///
/// Backed by the node's on-disk database; the storage engine is not this
/// crate's concern.
#[async_trait]
pub trait TreeHeadDatabase: Debug + Send + Sync {
    /// The most recent tree head stored locally, or `None` if this node
    /// has never stored one (a freshly provisioned node).
    async fn latest_tree_head(&self) -> Result<Option<SignedTreeHead>, DatabaseError>;

    /// Durably record a tree head. Callers only write heads that advance
    /// on the currently stored one.
    async fn write_tree_head(&self, sth: &SignedTreeHead) -> Result<(), DatabaseError>;
}
