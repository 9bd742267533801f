//! Contract for the consistent store that coordinates the cluster.
//!
//! The store keeps three pieces of shared state: the per-node
//! [`ClusterNodeState`] records (keyed by [`NodeId`]), the singleton
//! [`ClusterConfig`], and the singleton serving [`SignedTreeHead`]. Each is
//! observable through a watch subscription, and the node-state and
//! serving-STH entries are writable. Backends (etcd and friends) implement
//! [`ConsistentStore`]; everything above it is backend-agnostic.

use async_trait::async_trait;
use std::fmt::Debug;
use tokio::sync::mpsc;

use log_api::{ClusterConfig, ClusterNodeState, NodeId, SignedTreeHead};

/// One change to the keyed node-state map.
///
/// A watcher receives `Joined` both when a node first publishes its state
/// and when it re-publishes an updated one. `Left` is only emitted for a
/// key the store previously reported as present.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NodeStateUpdate {
    Joined {
        node_id: NodeId,
        state: ClusterNodeState,
    },
    Left {
        node_id: NodeId,
    },
}

impl NodeStateUpdate {
    pub fn node_id(&self) -> &NodeId {
        match self {
            NodeStateUpdate::Joined { node_id, .. } => node_id,
            NodeStateUpdate::Left { node_id } => node_id,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The write lost a compare-and-set race or hit a stale revision.
    #[error("store precondition failed: {0}")]
    Precondition(String),
    /// The store was unreachable or the request timed out.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// A strongly consistent coordination store.
///
/// Watch subscriptions deliver the current value (or key set) first, then
/// every subsequent change in the order the store commits them. Ordering
/// holds within one subscription only; deliveries on different
/// subscriptions are not mutually ordered. A subscription ends when the
/// receiver is dropped.
#[async_trait]
pub trait ConsistentStore: Debug + Send + Sync {
    /// Observe the per-node state map. Each delivery is a batch of changes
    /// committed together.
    fn watch_node_states(&self) -> mpsc::Receiver<Vec<NodeStateUpdate>>;

    /// Observe the cluster configuration. `None` means no configuration
    /// has been published yet.
    fn watch_cluster_config(&self) -> mpsc::Receiver<Option<ClusterConfig>>;

    /// Observe the cluster's serving STH. `None` means the cluster has
    /// no serving STH (not yet bootstrapped, or the entry was removed).
    fn watch_serving_sth(&self) -> mpsc::Receiver<Option<SignedTreeHead>>;

    /// Publish this node's state under its node id.
    async fn set_cluster_node_state(&self, state: &ClusterNodeState) -> Result<(), StoreError>;

    /// Publish a new serving STH for the whole cluster. Only the current
    /// master should call this.
    async fn set_serving_sth(&self, sth: &SignedTreeHead) -> Result<(), StoreError>;
}
