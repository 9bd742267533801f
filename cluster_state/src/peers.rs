use std::sync::Mutex;

use log_api::{ClusterNodeState, SignedTreeHead};
use log_client::LogClient;

/// One peer in the cluster registry: its last published state plus the
/// client handle bound to its endpoint.
///
/// The state sits under the peer's own lock so that reads during the
/// serving-STH calculation don't contend with watcher updates to other
/// peers. Lock order is always the controller mutex before a peer lock.
///
/// The client is bound to the endpoint the peer was created with and is
/// never rebound: when a peer's published (hostname, port) changes, the
/// registry replaces the whole entry.
#[derive(Debug)]
pub struct ClusterPeer {
    client: LogClient,
    state: Mutex<ClusterNodeState>,
}

impl ClusterPeer {
    pub(crate) fn new(state: ClusterNodeState) -> Self {
        let client = LogClient::new(&state.hostname, state.log_port);
        ClusterPeer {
            client,
            state: Mutex::new(state),
        }
    }

    /// The replication machinery polls peers through this handle.
    pub fn client(&self) -> &LogClient {
        &self.client
    }

    pub fn state(&self) -> ClusterNodeState {
        self.state.lock().unwrap().clone()
    }

    pub fn newest_sth(&self) -> Option<SignedTreeHead> {
        self.state.lock().unwrap().newest_sth.clone()
    }

    /// Size of the largest tree this peer can serve, if it has published
    /// a tree head at all.
    pub fn tree_size(&self) -> Option<u64> {
        self.state
            .lock()
            .unwrap()
            .newest_sth
            .as_ref()
            .map(|sth| sth.tree_size)
    }

    pub fn host_port(&self) -> (String, u16) {
        let state = self.state.lock().unwrap();
        (state.hostname.clone(), state.log_port)
    }

    /// Replace the stored state in place. The endpoint must be unchanged;
    /// an endpoint change requires replacing the entry so the client
    /// handle stays bound to the right address.
    pub(crate) fn update_state(&self, new_state: ClusterNodeState) {
        let mut state = self.state.lock().unwrap();
        assert_eq!(
            state.hostname, new_state.hostname,
            "peer hostname changed without a rebind"
        );
        assert_eq!(
            state.log_port, new_state.log_port,
            "peer log_port changed without a rebind"
        );
        *state = new_state;
    }
}
