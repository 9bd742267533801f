use std::sync::Arc;

use cluster_state::ClusterStateController;
use log_api::{ClusterConfig, ClusterNodeState, KeyId, NodeId, RootHash, SignedTreeHead, Version};
use store::NodeStateUpdate;
use testing::{wait_for, ElectionCall, FakeDatabase, FakeElection, FakeStore};

fn sth(timestamp: u64, tree_size: u64) -> SignedTreeHead {
    SignedTreeHead {
        version: Version::V1,
        timestamp,
        tree_size,
        sha256_root_hash: RootHash([0x11; 32]),
        signature: vec![7],
        key_id: KeyId([0x22; 32]),
    }
}

fn node_state(host: &str, port: u16, newest_sth: Option<SignedTreeHead>) -> ClusterNodeState {
    ClusterNodeState {
        hostname: String::from(host),
        log_port: port,
        newest_sth,
    }
}

fn joined(node_id: &str, newest_sth: Option<SignedTreeHead>) -> NodeStateUpdate {
    NodeStateUpdate::Joined {
        node_id: NodeId::from(node_id),
        state: node_state(&format!("{node_id}.internal"), 4001, newest_sth),
    }
}

struct TestCluster {
    store: Arc<FakeStore>,
    election: Arc<FakeElection>,
    database: Arc<FakeDatabase>,
    controller: ClusterStateController,
}

impl TestCluster {
    fn new() -> Self {
        let store = Arc::new(FakeStore::new());
        let election = Arc::new(FakeElection::new());
        let database = Arc::new(FakeDatabase::new());
        let controller = ClusterStateController::new(
            store.clone(),
            election.clone(),
            database.clone(),
        );
        TestCluster {
            store,
            election,
            database,
            controller,
        }
    }

    async fn with_default_config() -> Self {
        let cluster = TestCluster::new();
        cluster
            .store
            .publish_cluster_config(Some(ClusterConfig {
                minimum_serving_nodes: 2,
                minimum_serving_fraction: 0.5,
            }))
            .await;
        cluster
    }

    fn has_peer(&self, node_id: &str) -> bool {
        self.controller
            .peers()
            .iter()
            .any(|(id, _)| *id == NodeId::from(node_id))
    }
}

#[tokio::test]
async fn quorum_reached_picks_best_sth_at_largest_size() {
    let cluster = TestCluster::with_default_config().await;
    cluster
        .store
        .publish_node_updates(vec![
            joined("a", Some(sth(10, 100))),
            joined("b", Some(sth(11, 100))),
            joined("c", Some(sth(9, 90))),
            joined("d", Some(sth(8, 80))),
        ])
        .await;

    wait_for("serving STH to be calculated", || {
        cluster.controller.get_calculated_serving_sth().is_some()
    })
    .await;
    let calculated = cluster.controller.get_calculated_serving_sth().unwrap();
    assert_eq!(calculated.tree_size, 100);
    assert_eq!(calculated.timestamp, 11);
}

#[tokio::test]
async fn candidate_matching_serving_timestamp_is_rejected() {
    let cluster = TestCluster::with_default_config().await;
    cluster
        .store
        .publish_node_updates(vec![
            joined("a", Some(sth(10, 100))),
            joined("b", Some(sth(11, 100))),
            joined("c", Some(sth(9, 90))),
            joined("d", Some(sth(8, 80))),
        ])
        .await;
    wait_for("initial calculation", || {
        cluster.controller.get_calculated_serving_sth().is_some()
    })
    .await;

    cluster.store.publish_serving_sth(Some(sth(11, 100))).await;
    wait_for("serving STH to reach the database", || {
        !cluster.database.writes().is_empty()
    })
    .await;

    // A fifth node at the same (size, timestamp) must not produce a new
    // candidate: its timestamp does not advance on the serving STH.
    cluster
        .store
        .publish_node_updates(vec![joined("e", Some(sth(11, 100)))])
        .await;
    wait_for("peer e to register", || cluster.has_peer("e")).await;

    let calculated = cluster.controller.get_calculated_serving_sth().unwrap();
    assert_eq!((calculated.timestamp, calculated.tree_size), (11, 100));
    assert!(cluster.store.serving_sth_writes().is_empty());
}

#[tokio::test]
async fn master_publishes_advanced_serving_sth() {
    let cluster = TestCluster::with_default_config().await;
    cluster
        .store
        .publish_node_updates(vec![
            joined("a", Some(sth(10, 100))),
            joined("b", Some(sth(11, 100))),
            joined("c", Some(sth(9, 90))),
            joined("d", Some(sth(8, 80))),
            joined("e", Some(sth(11, 100))),
        ])
        .await;
    cluster.store.publish_serving_sth(Some(sth(11, 100))).await;
    wait_for("serving STH to reach the database", || {
        !cluster.database.writes().is_empty()
    })
    .await;

    cluster.election.set_master(true);
    cluster
        .store
        .publish_node_updates(vec![
            joined("a", Some(sth(12, 110))),
            joined("b", Some(sth(12, 110))),
            joined("e", Some(sth(12, 110))),
        ])
        .await;

    wait_for("master to publish the new serving STH", || {
        !cluster.store.serving_sth_writes().is_empty()
    })
    .await;
    let published = cluster.store.serving_sth_writes();
    assert_eq!((published[0].timestamp, published[0].tree_size), (12, 110));
    let calculated = cluster.controller.get_calculated_serving_sth().unwrap();
    assert_eq!((calculated.timestamp, calculated.tree_size), (12, 110));
}

#[tokio::test]
async fn non_master_never_writes_serving_sth() {
    let cluster = TestCluster::with_default_config().await;
    cluster
        .store
        .publish_node_updates(vec![
            joined("a", Some(sth(10, 100))),
            joined("b", Some(sth(11, 100))),
        ])
        .await;

    wait_for("serving STH to be calculated", || {
        cluster.controller.get_calculated_serving_sth().is_some()
    })
    .await;
    assert!(cluster.store.serving_sth_writes().is_empty());
}

#[tokio::test]
async fn below_quorum_leaves_calculated_sth_unset() {
    let cluster = TestCluster::new();
    cluster
        .store
        .publish_cluster_config(Some(ClusterConfig {
            minimum_serving_nodes: 3,
            minimum_serving_fraction: 0.5,
        }))
        .await;
    cluster
        .store
        .publish_node_updates(vec![
            joined("a", Some(sth(10, 100))),
            joined("b", Some(sth(11, 100))),
        ])
        .await;
    wait_for("peers to register", || {
        cluster.has_peer("a") && cluster.has_peer("b")
    })
    .await;

    assert!(cluster.controller.get_calculated_serving_sth().is_none());
}

#[tokio::test]
async fn config_arrival_triggers_recalculation() {
    let cluster = TestCluster::new();
    cluster
        .store
        .publish_node_updates(vec![
            joined("a", Some(sth(10, 100))),
            joined("b", Some(sth(11, 100))),
        ])
        .await;
    wait_for("peers to register", || {
        cluster.has_peer("a") && cluster.has_peer("b")
    })
    .await;
    assert!(cluster.controller.get_calculated_serving_sth().is_none());

    // No further node-state churn is needed once the config shows up.
    cluster
        .store
        .publish_cluster_config(Some(ClusterConfig {
            minimum_serving_nodes: 2,
            minimum_serving_fraction: 0.5,
        }))
        .await;
    wait_for("serving STH to be calculated", || {
        cluster.controller.get_calculated_serving_sth().is_some()
    })
    .await;
}

#[tokio::test]
async fn election_gated_on_replication_progress() {
    let cluster = TestCluster::with_default_config().await;
    cluster.store.publish_serving_sth(Some(sth(50, 100))).await;
    wait_for("election gate to react to the serving STH", || {
        !cluster.election.calls().is_empty()
    })
    .await;
    // No local tree head yet: must not be a master candidate.
    assert_eq!(cluster.election.last_call(), Some(ElectionCall::Stop));

    // Behind the serving tree: still out.
    cluster.controller.new_tree_head(sth(49, 90)).await;
    assert_eq!(cluster.election.last_call(), Some(ElectionCall::Stop));
    assert!(!cluster
        .election
        .calls()
        .contains(&ElectionCall::Start));

    // Caught up: join.
    cluster.controller.new_tree_head(sth(51, 100)).await;
    assert_eq!(cluster.election.last_call(), Some(ElectionCall::Start));
}

#[tokio::test]
async fn election_untouched_before_cluster_bootstrap() {
    let cluster = TestCluster::with_default_config().await;
    // Serving STH has never existed: neither join nor leave.
    cluster.controller.new_tree_head(sth(10, 100)).await;
    assert!(cluster.election.calls().is_empty());
}

#[tokio::test]
async fn local_state_changes_are_published() {
    let cluster = TestCluster::with_default_config().await;
    cluster
        .controller
        .set_node_host_port(String::from("log-0.internal"), 4001)
        .await;
    cluster.controller.new_tree_head(sth(10, 100)).await;

    let writes = cluster.store.node_state_writes();
    assert_eq!(writes.len(), 2);
    assert_eq!(writes[0].hostname, "log-0.internal");
    assert_eq!(writes[0].newest_sth, None);
    assert_eq!(writes[1].newest_sth, Some(sth(10, 100)));
    assert_eq!(
        cluster.controller.get_local_node_state().host_port(),
        ("log-0.internal", 4001)
    );
}

#[tokio::test]
async fn store_write_failures_are_swallowed() {
    let cluster = TestCluster::with_default_config().await;
    cluster.store.set_fail_writes(true);
    cluster
        .controller
        .set_node_host_port(String::from("log-0.internal"), 4001)
        .await;
    assert!(cluster.store.node_state_writes().is_empty());

    // The next state change is the implicit retry.
    cluster.store.set_fail_writes(false);
    cluster.controller.new_tree_head(sth(10, 100)).await;
    assert_eq!(cluster.store.node_state_writes().len(), 1);
}

#[tokio::test]
async fn peer_endpoint_change_rebinds_client() {
    let cluster = TestCluster::with_default_config().await;
    cluster
        .store
        .publish_node_updates(vec![NodeStateUpdate::Joined {
            node_id: NodeId::from("n"),
            state: node_state("n.internal", 4001, None),
        }])
        .await;
    wait_for("peer n to register", || cluster.has_peer("n")).await;

    cluster
        .store
        .publish_node_updates(vec![NodeStateUpdate::Joined {
            node_id: NodeId::from("n"),
            state: node_state("n.internal", 4002, None),
        }])
        .await;
    wait_for("peer n to rebind", || {
        cluster
            .controller
            .peers()
            .iter()
            .any(|(_, peer)| peer.host_port().1 == 4002)
    })
    .await;

    let peers = cluster.controller.peers();
    let (_, peer) = &peers[0];
    // The client handle always matches the published endpoint.
    assert_eq!(peer.client().host_port(), ("n.internal", 4002));
}

#[tokio::test]
async fn registry_tracks_joins_and_leaves() {
    let cluster = TestCluster::with_default_config().await;
    cluster
        .store
        .publish_node_updates(vec![
            joined("a", None),
            joined("b", None),
            joined("c", None),
        ])
        .await;
    wait_for("all peers to register", || cluster.controller.peers().len() == 3).await;

    cluster
        .store
        .publish_node_updates(vec![
            NodeStateUpdate::Left {
                node_id: NodeId::from("b"),
            },
            joined("d", None),
        ])
        .await;
    wait_for("membership to settle", || {
        let ids: Vec<NodeId> = cluster
            .controller
            .peers()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        ids == vec![NodeId::from("a"), NodeId::from("c"), NodeId::from("d")]
    })
    .await;
}

#[tokio::test]
async fn invalid_serving_sth_is_ignored() {
    let cluster = TestCluster::with_default_config().await;
    cluster.store.publish_serving_sth(Some(sth(0, 100))).await;
    cluster.store.publish_serving_sth(Some(sth(5, 100))).await;
    wait_for("valid serving STH to reach the database", || {
        !cluster.database.writes().is_empty()
    })
    .await;

    // Only the valid head made it through.
    let writes = cluster.database.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].timestamp, 5);
}

#[tokio::test]
async fn identical_serving_sth_is_not_rewritten() {
    let cluster = TestCluster::with_default_config().await;
    cluster.store.publish_serving_sth(Some(sth(5, 100))).await;
    wait_for("serving STH to reach the database", || {
        cluster.database.writes().len() == 1
    })
    .await;

    let gate_calls = cluster.election.calls().len();
    cluster.store.publish_serving_sth(Some(sth(5, 100))).await;
    wait_for("redelivery to be processed", || {
        cluster.election.calls().len() > gate_calls
    })
    .await;
    assert_eq!(cluster.database.writes().len(), 1);
}

#[tokio::test]
async fn shutdown_stops_all_callbacks() {
    let cluster = TestCluster::with_default_config().await;
    cluster.controller.shutdown().await;
    cluster.controller.shutdown().await; // idempotent

    cluster
        .store
        .publish_node_updates(vec![joined("late", Some(sth(10, 100)))])
        .await;
    cluster.store.publish_serving_sth(Some(sth(10, 100))).await;
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    assert!(cluster.controller.peers().is_empty());
    assert!(cluster.database.writes().is_empty());
    assert!(cluster.election.calls().is_empty());
}
