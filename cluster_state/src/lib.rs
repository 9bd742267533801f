//! Per-node coordination for the log cluster.
//!
//! Every node runs one [`ClusterStateController`]. It publishes the local
//! node's state (endpoint plus newest locally replicated tree head) to the
//! consistent store, watches every other node's state and the cluster
//! configuration, computes the tree head the cluster as a whole should be
//! serving, and joins or leaves the master election according to whether
//! this node's replica is caught up enough to mint new tree heads. While
//! this node is master, a dedicated worker pushes the computed serving STH
//! back into the store for the rest of the cluster to follow.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, trace, warn};

use election::MasterElection;
use log_api::database::TreeHeadDatabase;
use log_api::{ClusterConfig, ClusterNodeState, NodeId, SignedTreeHead};
use observability::logging::Spew;
use store::{ConsistentStore, NodeStateUpdate};

pub mod peers;
mod serving;

pub use peers::ClusterPeer;

static SET_NODE_STATE_SPEW: Spew = Spew::new();

/// Coordinates this node with the rest of the cluster.
///
/// One controller exists per process. The handle is cheap to clone; all
/// clones share the same state. Construction must happen on a tokio
/// runtime (the controller spawns its watch and publisher tasks there),
/// and [`shutdown`](ClusterStateController::shutdown) stops them again.
#[derive(Clone, Debug)]
pub struct ClusterStateController(Arc<Inner>);

#[derive(Debug)]
struct Inner {
    store: Arc<dyn ConsistentStore>,
    election: Arc<dyn MasterElection>,
    database: Arc<dyn TreeHeadDatabase>,
    state: Mutex<State>,
    /// Coalescing wakeup for the publisher task; the payload carries no
    /// information, the flags in `State` do.
    publish_tx: watch::Sender<()>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// All controller state, under the one controller mutex.
///
/// Lock order: this mutex before any peer's inner lock, never the
/// reverse. The mutex is never held across an await.
#[derive(Debug, Default)]
struct State {
    local_node_state: ClusterNodeState,
    /// Every known peer, this node included once its state has been
    /// published and echoed back by the store.
    all_peers: BTreeMap<NodeId, Arc<ClusterPeer>>,
    /// `None` until the store delivers a configuration.
    cluster_config: Option<ClusterConfig>,
    /// The serving STH currently in the store.
    actual_serving_sth: Option<SignedTreeHead>,
    /// The serving STH this node computed most recently.
    calculated_serving_sth: Option<SignedTreeHead>,
    update_required: bool,
    exiting: bool,
}

impl ClusterStateController {
    pub fn new(
        store: Arc<dyn ConsistentStore>,
        election: Arc<dyn MasterElection>,
        database: Arc<dyn TreeHeadDatabase>,
    ) -> Self {
        let (publish_tx, publish_rx) = watch::channel(());
        let (shutdown_tx, _) = broadcast::channel(1);

        // Subscribe before spawning anything so the store's initial
        // replay of current state is not missed.
        let node_states_rx = store.watch_node_states();
        let config_rx = store.watch_cluster_config();
        let serving_sth_rx = store.watch_serving_sth();

        let controller = ClusterStateController(Arc::new(Inner {
            store,
            election,
            database,
            state: Mutex::new(State::default()),
            publish_tx,
            shutdown_tx: shutdown_tx.clone(),
            tasks: Mutex::new(Vec::new()),
        }));

        let tasks = vec![
            tokio::spawn(
                controller
                    .clone()
                    .node_states_watcher(node_states_rx, shutdown_tx.subscribe()),
            ),
            tokio::spawn(
                controller
                    .clone()
                    .cluster_config_watcher(config_rx, shutdown_tx.subscribe()),
            ),
            tokio::spawn(
                controller
                    .clone()
                    .serving_sth_watcher(serving_sth_rx, shutdown_tx.subscribe()),
            ),
            tokio::spawn(controller.clone().serving_sth_publisher(publish_rx)),
        ];
        *controller.0.tasks.lock().unwrap() = tasks;
        controller
    }

    /// Stops the watchers and the publisher and waits for them to finish.
    ///
    /// After this returns no further callbacks run and nothing more is
    /// written to the store. Idempotent.
    pub async fn shutdown(&self) {
        self.0.state.lock().unwrap().exiting = true;
        // No receivers just means every task already finished.
        _ = self.0.shutdown_tx.send(());
        self.0.publish_tx.send_replace(());
        let tasks = std::mem::take(&mut *self.0.tasks.lock().unwrap());
        for task in tasks {
            _ = task.await;
        }
    }

    /// Record a tree head newly produced or replicated by this node, and
    /// publish the updated node state to the cluster.
    ///
    /// Local tree heads never go backwards: a timestamp below the
    /// previously recorded one means local state is corrupt, and aborts.
    pub async fn new_tree_head(&self, sth: SignedTreeHead) {
        let local = {
            let mut state = self.0.state.lock().unwrap();
            if let Some(prior) = &state.local_node_state.newest_sth {
                assert!(
                    sth.timestamp >= prior.timestamp,
                    "local tree head timestamp went backwards ({} < {})",
                    sth.timestamp,
                    prior.timestamp,
                );
            }
            state.local_node_state.newest_sth = Some(sth);
            // Catching up on replication may qualify this node for
            // mastership again.
            self.determine_election_participation(&state);
            state.local_node_state.clone()
        };
        self.push_local_node_state(&local).await;
    }

    /// Set the endpoint this node advertises to its peers, and publish
    /// the updated node state to the cluster.
    pub async fn set_node_host_port(&self, host: String, port: u16) {
        let local = {
            let mut state = self.0.state.lock().unwrap();
            state.local_node_state.hostname = host;
            state.local_node_state.log_port = port;
            self.determine_election_participation(&state);
            state.local_node_state.clone()
        };
        self.push_local_node_state(&local).await;
    }

    pub fn get_local_node_state(&self) -> ClusterNodeState {
        self.0.state.lock().unwrap().local_node_state.clone()
    }

    /// The serving STH this node most recently computed, if any.
    pub fn get_calculated_serving_sth(&self) -> Option<SignedTreeHead> {
        self.0
            .state
            .lock()
            .unwrap()
            .calculated_serving_sth
            .clone()
    }

    /// Snapshot of the current peer registry, for the replication
    /// machinery to poll peers through.
    pub fn peers(&self) -> Vec<(NodeId, Arc<ClusterPeer>)> {
        let state = self.0.state.lock().unwrap();
        state
            .all_peers
            .iter()
            .map(|(node_id, peer)| (node_id.clone(), peer.clone()))
            .collect()
    }

    async fn push_local_node_state(&self, local: &ClusterNodeState) {
        // Best effort: the next state change re-publishes anyway.
        if let Err(err) = self.0.store.set_cluster_node_state(local).await {
            if let Some(suppressed) = SET_NODE_STATE_SPEW.ok() {
                warn!(%err, suppressed, "could not publish local node state");
            }
        }
    }

    async fn node_states_watcher(
        self,
        mut rx: mpsc::Receiver<Vec<NodeStateUpdate>>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => return,
                batch = rx.recv() => match batch {
                    Some(batch) => self.on_node_states_updated(batch),
                    None => return,
                },
            }
        }
    }

    async fn cluster_config_watcher(
        self,
        mut rx: mpsc::Receiver<Option<ClusterConfig>>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => return,
                update = rx.recv() => match update {
                    Some(update) => self.on_cluster_config_updated(update),
                    None => return,
                },
            }
        }
    }

    async fn serving_sth_watcher(
        self,
        mut rx: mpsc::Receiver<Option<SignedTreeHead>>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => return,
                update = rx.recv() => match update {
                    Some(update) => self.on_serving_sth_updated(update).await,
                    None => return,
                },
            }
        }
    }

    fn on_node_states_updated(&self, updates: Vec<NodeStateUpdate>) {
        let mut state = self.0.state.lock().unwrap();
        for update in updates {
            match update {
                NodeStateUpdate::Joined {
                    node_id,
                    state: node_state,
                } => {
                    trace!(%node_id, "node joined");
                    // An endpoint change invalidates the client handle:
                    // drop the entry so it is recreated below.
                    let stale = state.all_peers.get(&node_id).is_some_and(|peer| {
                        let (host, port) = peer.host_port();
                        (host.as_str(), port) != node_state.host_port()
                    });
                    if stale {
                        info!(%node_id, "peer endpoint changed, rebinding client");
                        state.all_peers.remove(&node_id);
                    }
                    match state.all_peers.get(&node_id) {
                        Some(peer) => peer.update_state(node_state),
                        None => {
                            state
                                .all_peers
                                .insert(node_id, Arc::new(ClusterPeer::new(node_state)));
                        }
                    }
                }
                NodeStateUpdate::Left { node_id } => {
                    trace!(%node_id, "node left");
                    assert!(
                        state.all_peers.remove(&node_id).is_some(),
                        "store reported unknown node {node_id} leaving"
                    );
                }
            }
        }
        self.calculate_serving_sth(&mut state);
    }

    fn on_cluster_config_updated(&self, update: Option<ClusterConfig>) {
        let Some(config) = update else {
            warn!("no cluster config exists");
            return;
        };
        let mut state = self.0.state.lock().unwrap();
        info!(?config, "received new cluster config");
        state.cluster_config = Some(config);
        // The policy change may alter which tree head has quorum.
        self.calculate_serving_sth(&mut state);
    }

    async fn on_serving_sth_updated(&self, update: Option<SignedTreeHead>) {
        let sth = {
            let mut state = self.0.state.lock().unwrap();
            match update {
                None => {
                    warn!("cluster has no serving STH");
                    state.actual_serving_sth = None;
                    None
                }
                Some(sth) => {
                    if sth.timestamp == 0 {
                        warn!("ignoring invalid serving STH update");
                        return;
                    }
                    info!(?sth, "received new serving STH");
                    state.actual_serving_sth = Some(sth.clone());
                    Some(sth)
                }
            }
        };

        // Reconcile the new serving STH with the local database, outside
        // the lock. This watcher is the only writer of tree heads, so the
        // read-check-write below does not race.
        if let Some(sth) = sth {
            self.reconcile_database(&sth).await;
        }

        // The new serving STH may be ahead of our replica, in which case
        // this node must not be master.
        let state = self.0.state.lock().unwrap();
        self.determine_election_participation(&state);
    }

    /// The serving STH must be newer than, or identical to, the newest
    /// tree head in the local database. Anything else means this node
    /// disagrees with the cluster about the log's history, which is not
    /// survivable.
    async fn reconcile_database(&self, sth: &SignedTreeHead) {
        let write_sth = match self.0.database.latest_tree_head().await {
            Ok(Some(db_sth)) => {
                assert_eq!(
                    sth.key_id, db_sth.key_id,
                    "serving STH was signed by a different log"
                );
                assert_eq!(
                    sth.version, db_sth.version,
                    "serving STH version differs from local database"
                );
                if sth.timestamp == db_sth.timestamp {
                    assert_eq!(
                        sth.tree_size, db_sth.tree_size,
                        "serving STH diverges from local database at the same timestamp"
                    );
                    assert_eq!(
                        sth.sha256_root_hash, db_sth.sha256_root_hash,
                        "serving STH diverges from local database at the same timestamp"
                    );
                    // Already stored.
                    false
                } else {
                    assert!(
                        sth.timestamp > db_sth.timestamp,
                        "serving STH timestamp regressed below local database ({} < {})",
                        sth.timestamp,
                        db_sth.timestamp,
                    );
                    assert!(
                        sth.tree_size >= db_sth.tree_size,
                        "serving STH tree size regressed below local database ({} < {})",
                        sth.tree_size,
                        db_sth.tree_size,
                    );
                    true
                }
            }
            Ok(None) => {
                warn!("local database has no tree head, new node?");
                true
            }
            Err(err) => panic!("failed to look up local database's newest tree head: {err}"),
        };
        if write_sth {
            if let Err(err) = self.0.database.write_tree_head(sth).await {
                panic!("failed to write serving STH to local database: {err}");
            }
        }
    }

    fn calculate_serving_sth(&self, state: &mut State) {
        trace!("calculating new serving STH");
        match serving::next_serving_sth(state) {
            Some(sth) => {
                state.calculated_serving_sth = Some(sth);
                // Push it out to the cluster if we're master.
                if self.0.election.is_master() {
                    state.update_required = true;
                    self.0.publish_tx.send_replace(());
                }
            }
            None => warn!("failed to determine a suitable serving STH"),
        }
    }

    /// Join the election only while this node could act as a correct
    /// master: it must hold a replica at least as large as the tree the
    /// cluster currently serves.
    fn determine_election_participation(&self, state: &State) {
        let Some(actual) = &state.actual_serving_sth else {
            // Cluster not bootstrapped yet; leave election state alone.
            warn!("cluster has no serving STH, not touching election participation");
            return;
        };
        match &state.local_node_state.newest_sth {
            None => {
                info!("no local tree head, leaving election");
                self.0.election.stop_election();
            }
            Some(local) if local.tree_size < actual.tree_size => {
                info!(
                    serving_tree_size = actual.tree_size,
                    local_tree_size = local.tree_size,
                    "local replication too far behind to be master, leaving election"
                );
                self.0.election.stop_election();
            }
            Some(_) => self.0.election.start_election(),
        }
    }

    /// Publisher worker: whenever a recomputation promotes a new serving
    /// STH and this node is master, write it to the store. Wakeups
    /// coalesce; only the latest calculated value is ever written.
    async fn serving_sth_publisher(self, mut publish_rx: watch::Receiver<()>) {
        loop {
            let sth = {
                let mut state = self.0.state.lock().unwrap();
                if state.exiting {
                    return;
                }
                if state.update_required {
                    state.update_required = false;
                    Some(
                        state
                            .calculated_serving_sth
                            .clone()
                            .expect("update_required implies a calculated serving STH"),
                    )
                } else {
                    None
                }
            };
            match sth {
                Some(sth) => {
                    if self.0.election.is_master() {
                        if let Err(err) = self.0.store.set_serving_sth(&sth).await {
                            warn!(%err, "could not publish serving STH");
                        }
                    }
                }
                None => {
                    if publish_rx.changed().await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}
