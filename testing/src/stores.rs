use async_trait::async_trait;
use std::sync::Mutex;
use tokio::sync::mpsc;

use log_api::{ClusterConfig, ClusterNodeState, SignedTreeHead};
use store::{ConsistentStore, NodeStateUpdate, StoreError};

/// An in-memory [`ConsistentStore`].
///
/// Watch deliveries are explicit: nothing is echoed back automatically
/// when a test writes through `set_cluster_node_state` /
/// `set_serving_sth`, so tests stay in control of event ordering. Writes
/// are recorded for assertions and can be made to fail.
#[derive(Debug, Default)]
pub struct FakeStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    node_state_subs: Vec<mpsc::Sender<Vec<NodeStateUpdate>>>,
    config_subs: Vec<mpsc::Sender<Option<ClusterConfig>>>,
    serving_sth_subs: Vec<mpsc::Sender<Option<SignedTreeHead>>>,
    node_state_writes: Vec<ClusterNodeState>,
    serving_sth_writes: Vec<SignedTreeHead>,
    fail_writes: bool,
}

impl FakeStore {
    pub fn new() -> Self {
        FakeStore::default()
    }

    /// Deliver a batch of node-state changes to every subscriber.
    pub async fn publish_node_updates(&self, batch: Vec<NodeStateUpdate>) {
        let subs = self.inner.lock().unwrap().node_state_subs.clone();
        for sub in subs {
            // A closed subscription just means the watcher shut down.
            _ = sub.send(batch.clone()).await;
        }
    }

    pub async fn publish_cluster_config(&self, config: Option<ClusterConfig>) {
        let subs = self.inner.lock().unwrap().config_subs.clone();
        for sub in subs {
            _ = sub.send(config.clone()).await;
        }
    }

    pub async fn publish_serving_sth(&self, sth: Option<SignedTreeHead>) {
        let subs = self.inner.lock().unwrap().serving_sth_subs.clone();
        for sub in subs {
            _ = sub.send(sth.clone()).await;
        }
    }

    /// Make subsequent writes fail with [`StoreError::Unavailable`].
    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.lock().unwrap().fail_writes = fail;
    }

    /// Every node state written through the store, oldest first.
    pub fn node_state_writes(&self) -> Vec<ClusterNodeState> {
        self.inner.lock().unwrap().node_state_writes.clone()
    }

    /// Every serving STH written through the store, oldest first.
    pub fn serving_sth_writes(&self) -> Vec<SignedTreeHead> {
        self.inner.lock().unwrap().serving_sth_writes.clone()
    }
}

#[async_trait]
impl ConsistentStore for FakeStore {
    fn watch_node_states(&self) -> mpsc::Receiver<Vec<NodeStateUpdate>> {
        let (tx, rx) = mpsc::channel(32);
        self.inner.lock().unwrap().node_state_subs.push(tx);
        rx
    }

    fn watch_cluster_config(&self) -> mpsc::Receiver<Option<ClusterConfig>> {
        let (tx, rx) = mpsc::channel(32);
        self.inner.lock().unwrap().config_subs.push(tx);
        rx
    }

    fn watch_serving_sth(&self) -> mpsc::Receiver<Option<SignedTreeHead>> {
        let (tx, rx) = mpsc::channel(32);
        self.inner.lock().unwrap().serving_sth_subs.push(tx);
        rx
    }

    async fn set_cluster_node_state(&self, state: &ClusterNodeState) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_writes {
            return Err(StoreError::Unavailable(String::from("fake store is down")));
        }
        inner.node_state_writes.push(state.clone());
        Ok(())
    }

    async fn set_serving_sth(&self, sth: &SignedTreeHead) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_writes {
            return Err(StoreError::Unavailable(String::from("fake store is down")));
        }
        inner.serving_sth_writes.push(sth.clone());
        Ok(())
    }
}
