use crate::{
  consumer::{BlockConsumers, Commitment},
  dapp::Dapp,
  model::Block,
  store::{BlockchainStore, StoreError},
};
use std::sync::{
  atomic::{AtomicU64, Ordering},
  Arc,
};
use thiserror::Error;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum ExecutorError {
  #[error("store error: {0}")]
  Store(#[from] StoreError),

  #[error("executor fault: {0}")]
  Fault(String),
}

/// Applies committed blocks to application state, strictly in height
/// order. Consensus produces blocks out of order with respect to
/// execution (a just-decided block must wait for every earlier height
/// to finish executing first, e.g. during catch-up), so incoming
/// blocks are queued and drained by a single background task — the
/// "execution frontier" never runs two blocks concurrently or skips
/// ahead.
pub struct Executor<S: BlockchainStore + 'static> {
  store: Arc<S>,
  sender: UnboundedSender<Block>,
  executed_height: Arc<AtomicU64>,
}

impl<S: BlockchainStore + 'static> Executor<S> {
  pub fn new<D: Dapp + 'static>(
    store: Arc<S>,
    dapp: Arc<D>,
    consumers: Arc<BlockConsumers>,
    start_height: u64,
  ) -> Self {
    let (sender, receiver) = unbounded_channel();
    let executed_height = Arc::new(AtomicU64::new(start_height));
    tokio::spawn(Self::run(
      receiver,
      dapp,
      consumers,
      Arc::clone(&executed_height),
    ));
    Self { store, sender, executed_height }
  }

  pub fn executed_height(&self) -> u64 {
    self.executed_height.load(Ordering::SeqCst)
  }

  /// Enqueues a block for execution. Blocks are expected in height
  /// order; a block arriving out of order is a programmer error in
  /// the caller (consensus/synchronizer), not a recoverable condition.
  pub fn enqueue(&self, block: Block) -> Result<(), ExecutorError> {
    self
      .sender
      .send(block)
      .map_err(|_| ExecutorError::Fault("executor task has stopped".into()))
  }

  /// Re-reads and re-enqueues an already-stored block by height, used
  /// by the synchronizer when it fetched blocks from peers faster than
  /// they could be executed and needs to drive the frontier forward
  /// from the store instead of holding the blocks in memory itself.
  pub fn replay(&self, height: u64) -> Result<(), ExecutorError> {
    self.enqueue(self.store.block_of(height)?)
  }

  async fn run<D: Dapp + 'static>(
    mut receiver: UnboundedReceiver<Block>,
    dapp: Arc<D>,
    consumers: Arc<BlockConsumers>,
    executed_height: Arc<AtomicU64>,
  ) {
    while let Some(block) = receiver.recv().await {
      let height = block.header.height;
      if height != executed_height.load(Ordering::SeqCst) + 1 {
        error!(
          height,
          expected = executed_height.load(Ordering::SeqCst) + 1,
          "executor received a block out of order; this is a bug in the \
           caller, not a recoverable runtime condition"
        );
        continue;
      }

      for tx in block.body.transactions.as_slice() {
        if let Err(err) = dapp.execute_transaction(tx).await {
          info!(%err, tx_hash = %tx.hash(), "transaction execution failed, included but inert");
        }
      }

      executed_height.store(height, Ordering::SeqCst);
      info!(height, "executed block");

      let arc_block = Arc::new(block);
      if consumers
        .consume(Arc::clone(&arc_block), Commitment::Executed)
        .is_err()
      {
        error!("block consumer channel closed");
      }
    }
  }
}
