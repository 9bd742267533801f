//! Chooses the tree head the cluster should serve.

use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::State;
use log_api::SignedTreeHead;

/// Picks the next serving STH candidate from a snapshot of the cluster,
/// or `None` when no tree head currently satisfies the serving policy.
///
/// The candidate is the tree head with the largest size such that enough
/// peers (absolutely and as a fraction of the cluster) hold a replica at
/// least that large, subject to its timestamp strictly advancing on the
/// currently served STH. Peers at a larger size count towards every
/// smaller size, so the walk runs from the largest published size
/// downwards, accumulating.
pub(crate) fn next_serving_sth(state: &State) -> Option<SignedTreeHead> {
    let Some(config) = &state.cluster_config else {
        debug!("no cluster config received yet, cannot pick a serving STH");
        return None;
    };

    // Peers iterate in ascending node-id order and a candidate only
    // displaces the best at its size on a strictly greater timestamp, so
    // timestamp ties resolve to the smallest node id.
    let mut best_by_size: BTreeMap<u64, SignedTreeHead> = BTreeMap::new();
    let mut nodes_by_size: BTreeMap<u64, usize> = BTreeMap::new();
    for peer in state.all_peers.values() {
        if let Some(sth) = peer.newest_sth() {
            *nodes_by_size.entry(sth.tree_size).or_default() += 1;
            match best_by_size.get(&sth.tree_size) {
                Some(best) if sth.timestamp <= best.timestamp => {}
                _ => {
                    best_by_size.insert(sth.tree_size, sth);
                }
            }
        }
    }

    // The serving tree may never shrink below what this node already
    // calculated.
    let current_size = state
        .calculated_serving_sth
        .as_ref()
        .map(|sth| sth.tree_size)
        .unwrap_or(0);

    let mut nodes_seen = 0;
    for (&size, &count) in nodes_by_size.iter().rev() {
        if size < current_size {
            break;
        }
        nodes_seen += count;
        let serving_fraction = nodes_seen as f64 / state.all_peers.len() as f64;
        if serving_fraction < config.minimum_serving_fraction
            || (nodes_seen as u64) < config.minimum_serving_nodes
        {
            continue;
        }
        let candidate = &best_by_size[&size];

        // Not viable unless strictly newer than the STH the cluster is
        // already serving; identical timestamps would allow a regression
        // to a different tree at the same timestamp.
        if let Some(actual) = &state.actual_serving_sth {
            if candidate.timestamp <= actual.timestamp {
                debug!(
                    candidate_timestamp = candidate.timestamp,
                    serving_timestamp = actual.timestamp,
                    tree_size = size,
                    "discarding candidate STH, timestamp does not advance on serving STH"
                );
                continue;
            }
        }

        info!(
            tree_size = size,
            nodes = nodes_seen,
            percent = serving_fraction * 100.0,
            "can serve"
        );
        return Some(candidate.clone());
    }
    None
}
