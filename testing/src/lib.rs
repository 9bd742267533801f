//! In-memory stand-ins for the cluster's external collaborators, used to
//! drive the coordination machinery in tests.

use std::time::Duration;
use tokio::time::sleep;

mod database;
mod elections;
mod stores;

pub use database::FakeDatabase;
pub use elections::{ElectionCall, FakeElection};
pub use stores::FakeStore;

/// Polls `condition` until it holds, panicking after a generous timeout.
///
/// Store watch deliveries are handled on background tasks, so tests
/// observe their effects by polling rather than by handshake.
pub async fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        sleep(Duration::from_millis(2)).await;
    }
    panic!("timed out waiting for {what}");
}
