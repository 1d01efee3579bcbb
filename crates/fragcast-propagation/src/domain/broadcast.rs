//! Broadcast scheduling: per-peer fragment windows and latency grouping.

use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::ports::outbound::PeerHandle;

/// Assign each of `peer_count` peers a window of `quota` distinct fragment
/// indices.
///
/// Peers walk a permutation of `[0, fragment_count)` in `quota`-sized
/// windows; when the next window would run past the end, the permutation is
/// re-shuffled and the walk restarts, so consecutive groups of
/// `fragment_count / quota` peers each cover the whole set. When the set is
/// smaller than one window every peer receives all of it.
pub fn assign_fragment_windows(
    fragment_count: usize,
    peer_count: usize,
    quota: usize,
    rng: &mut impl Rng,
) -> Vec<Vec<usize>> {
    if quota == 0 || fragment_count <= quota {
        return vec![(0..fragment_count).collect(); peer_count];
    }
    let mut permutation: Vec<usize> = (0..fragment_count).collect();
    let mut windows = Vec::with_capacity(peer_count);
    let mut slot = 0usize;
    for _ in 0..peer_count {
        if quota * (slot + 1) > fragment_count {
            slot = 0;
            permutation.shuffle(rng);
        }
        windows.push(permutation[quota * slot..quota * (slot + 1)].to_vec());
        slot += 1;
    }
    windows
}

/// Partition peers by measured round-trip latency against `threshold`.
///
/// Latencies are refreshed before the comparison. The caller dispatches the
/// fast group first so it is never held up behind slow peers.
pub fn split_by_latency(
    peers: Vec<Arc<dyn PeerHandle>>,
    threshold: Duration,
) -> (Vec<Arc<dyn PeerHandle>>, Vec<Arc<dyn PeerHandle>>) {
    let mut fast = Vec::new();
    let mut slow = Vec::new();
    for peer in peers {
        peer.update_latency();
        if peer.latency() < threshold {
            fast.push(peer);
        } else {
            slow.push(peer);
        }
    }
    (fast, slow)
}
