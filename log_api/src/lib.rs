//! Shared data model for the log cluster: tree heads, per-node state, and
//! cluster-wide policy. These are the values that flow through the
//! consistent store and between the coordination components.

use core::fmt;
use serde::{Deserialize, Serialize};

pub mod database;

/// Identifies a node within the cluster.
///
/// Node ids are assigned by the consistent store (they are the keys under
/// which node states are published) and are opaque to everything else.
#[derive(Clone, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct NodeId(pub String);

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        NodeId(String::from(value))
    }
}

/// Identifies the log that signed a tree head: the SHA-256 hash of the
/// log's public key.
#[derive(Copy, Clone, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct KeyId(pub [u8; 32]);

impl fmt::Debug for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// The SHA-256 root hash of the Merkle tree over the log's entries.
#[derive(Copy, Clone, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct RootHash(pub [u8; 32]);

impl fmt::Debug for RootHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x")?;
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Version of the tree head structure.
#[derive(Copy, Clone, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum Version {
    #[default]
    V1,
}

/// A signed commitment to the state of the Merkle tree at a point in time.
///
/// Tree heads are minted and signed by the cluster's master and are
/// immutable once produced. The `timestamp` doubles as a monotonic
/// identifier: within one log, a tree head with a larger timestamp is
/// strictly newer.
#[derive(Clone, Deserialize, Eq, PartialEq, Serialize)]
pub struct SignedTreeHead {
    pub version: Version,
    /// Milliseconds since the Unix epoch, as minted by the signer.
    pub timestamp: u64,
    /// Number of entries committed to by this tree head.
    pub tree_size: u64,
    pub sha256_root_hash: RootHash,
    /// Signature over the tree head, opaque to the cluster machinery.
    pub signature: Vec<u8>,
    pub key_id: KeyId,
}

impl fmt::Debug for SignedTreeHead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignedTreeHead")
            .field("version", &self.version)
            .field("timestamp", &self.timestamp)
            .field("tree_size", &self.tree_size)
            .field("sha256_root_hash", &self.sha256_root_hash)
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

/// The state one node publishes to the rest of the cluster.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ClusterNodeState {
    pub hostname: String,
    pub log_port: u16,
    /// The newest tree head this node holds a full replica for. Absent
    /// until the node has completed its first round of replication.
    pub newest_sth: Option<SignedTreeHead>,
}

impl ClusterNodeState {
    pub fn host_port(&self) -> (&str, u16) {
        (&self.hostname, self.log_port)
    }
}

/// Cluster-wide serving policy.
///
/// A tree head may only be advertised as the serving STH once enough
/// nodes, both in absolute count and as a fraction of the cluster, can
/// serve queries at its size.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ClusterConfig {
    pub minimum_serving_nodes: u64,
    pub minimum_serving_fraction: f64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            minimum_serving_nodes: 1,
            minimum_serving_fraction: 1.0,
        }
    }
}
