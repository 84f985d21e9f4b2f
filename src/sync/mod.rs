mod remote;

pub use remote::{RemoteNode, RemoteNodeSet};

use crate::{
  executor::Executor,
  network::{protocol::{GetBodies, GetHeaders, PeerMessage}, NetworkCommand},
  store::{BlockchainStore, StoreError},
};
use libp2p::PeerId;
use std::sync::{
  atomic::{AtomicU64, Ordering},
  Arc,
};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum SyncError {
  #[error("store error: {0}")]
  Store(#[from] StoreError),

  #[error("no peers are ahead of us")]
  NoPeersAvailable,

  #[error("executor error: {0}")]
  Executor(#[from] crate::executor::ExecutorError),
}

const FETCH_BATCH_SIZE: u64 = 64;

/// Keeps a lagging node's store caught up to the rest of the network.
/// The consensus engine only ever makes progress from the tip it
/// already has; when a node falls behind (restarts, was partitioned,
/// just joined), this is what closes the gap by fetching headers and
/// bodies from peers instead of waiting to win a proposer slot it has
/// no hope of validating correctly yet.
pub struct Synchronizer<S: BlockchainStore + 'static> {
  store: Arc<S>,
  executor: Arc<Executor<S>>,
  peers: Arc<RemoteNodeSet>,
  target_height: AtomicU64,
  commands: UnboundedSender<NetworkCommand>,
}

impl<S: BlockchainStore + 'static> Synchronizer<S> {
  pub fn new(
    store: Arc<S>,
    executor: Arc<Executor<S>>,
    peers: Arc<RemoteNodeSet>,
    commands: UnboundedSender<NetworkCommand>,
  ) -> Self {
    Self { store, executor, peers, target_height: AtomicU64::new(0), commands }
  }

  /// Called whenever a peer reports (via handshake or gossip) a
  /// height higher than what we've seen claimed so far.
  pub fn new_block_height(&self, peer: PeerId, height: u64) {
    self.peers.report_height(peer, height);
    let current = self.target_height.load(Ordering::SeqCst);
    if height > current {
      self.target_height.store(height, Ordering::SeqCst);
    }
  }

  pub fn is_behind(&self) -> Result<bool, SyncError> {
    Ok(self.store.height()? < self.target_height.load(Ordering::SeqCst))
  }

  /// One fetch cycle: pick a peer that's ahead of us (round-robin
  /// across the known set so one flaky peer can't stall catch-up
  /// forever), request the next batch of headers+bodies, validate
  /// them against the store's current tip, and append them.
  pub async fn fetch_batch(&self) -> Result<u64, SyncError> {
    let from = self.store.height()? + 1;
    let target = self.target_height.load(Ordering::SeqCst);
    if from > target {
      return Ok(0);
    }
    let to = (from + FETCH_BATCH_SIZE - 1).min(target);

    let peer = self
      .peers
      .next_ahead_of(from)
      .ok_or(SyncError::NoPeersAvailable)?;

    if self
      .commands
      .send(NetworkCommand::SendTo(
        peer,
        PeerMessage::GetHeaders(GetHeaders { from_height: from, to_height: to }),
      ))
      .is_err()
    {
      warn!("network command channel closed while requesting headers");
    }
    if self
      .commands
      .send(NetworkCommand::SendTo(
        peer,
        PeerMessage::GetBodies(GetBodies {
          heights: (from..=to).collect(),
        }),
      ))
      .is_err()
    {
      warn!("network command channel closed while requesting bodies");
    }

    info!(from, to, %peer, "requested block range from peer");
    Ok(to - from + 1)
  }

  /// Called once a `NewBlock`/`Bodies` response has been validated
  /// against the store's tip and the block's commit certificate: adds
  /// it to the store and hands it to the executor.
  pub fn ingest(&self, block: crate::model::Block) -> Result<(), SyncError> {
    self.store.put(block.clone())?;
    self.executor.enqueue(block)?;
    Ok(())
  }
}
