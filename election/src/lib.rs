//! Seam between the cluster state machinery and the master election.
//!
//! Exactly one node at a time may act as master: it mints new signed tree
//! heads and pushes the serving STH into the consistent store. The
//! election algorithm itself lives behind this trait; the controller only
//! decides *whether* this node should be a candidate.

use std::fmt::Debug;

/// Handle to this node's participation in the master election.
///
/// `start_election` and `stop_election` are idempotent: repeated calls in
/// the same direction are no-ops. `is_master` reflects the election's view
/// at the moment of the call and may change between calls; callers must
/// not cache it across await points.
pub trait MasterElection: Debug + Send + Sync {
    /// Become a candidate for mastership.
    fn start_election(&self);

    /// Withdraw from the election, relinquishing mastership if held.
    fn stop_election(&self);

    fn is_master(&self) -> bool;
}
