use dashmap::DashMap;
use libp2p::PeerId;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone, Copy)]
pub struct RemoteNode {
  pub reported_height: u64,
}

/// Tracks what height every connected peer last claimed to be at, so
/// the synchronizer can pick a peer that's actually ahead of us
/// instead of fetching from one that's equally behind.
#[derive(Default)]
pub struct RemoteNodeSet {
  nodes: DashMap<PeerId, RemoteNode>,
  round_robin: AtomicUsize,
}

impl RemoteNodeSet {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn report_height(&self, peer: PeerId, height: u64) {
    self
      .nodes
      .entry(peer)
      .and_modify(|n| n.reported_height = n.reported_height.max(height))
      .or_insert(RemoteNode { reported_height: height });
  }

  pub fn remove(&self, peer: &PeerId) {
    self.nodes.remove(peer);
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  /// Round-robins across peers reporting a height at or above
  /// `min_height`, so repeated catch-up fetches spread load across
  /// the whole known set rather than hammering a single peer.
  pub fn next_ahead_of(&self, min_height: u64) -> Option<PeerId> {
    let candidates: Vec<PeerId> = self
      .nodes
      .iter()
      .filter(|entry| entry.value().reported_height >= min_height)
      .map(|entry| *entry.key())
      .collect();
    if candidates.is_empty() {
      return None;
    }
    let idx = self.round_robin.fetch_add(1, Ordering::SeqCst) % candidates.len();
    Some(candidates[idx])
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn next_ahead_of_excludes_peers_reporting_lower_height() {
    let set = RemoteNodeSet::new();
    let behind = PeerId::random();
    let ahead = PeerId::random();
    set.report_height(behind, 3);
    set.report_height(ahead, 10);
    assert_eq!(set.next_ahead_of(5), Some(ahead));
  }

  #[test]
  fn next_ahead_of_round_robins_among_equally_ahead_peers() {
    let set = RemoteNodeSet::new();
    let a = PeerId::random();
    let b = PeerId::random();
    set.report_height(a, 10);
    set.report_height(b, 10);
    let first = set.next_ahead_of(0).unwrap();
    let second = set.next_ahead_of(0).unwrap();
    assert_ne!(first, second);
  }
}
