mod sled_store;

use crate::model::{Block, BlockHeader, Genesis};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("serialization error: {0}")]
  Serialization(#[from] bincode::Error),

  #[error("storage engine error: {0}")]
  StorageEngine(#[from] sled::Error),

  #[error("no block at height {0}")]
  NotFound(u64),

  #[error(
    "block at height {height} does not chain onto the current tip \
     (expected height {expected})"
  )]
  InvalidBlock { height: u64, expected: u64 },

  #[error(
    "genesis mismatch: store was initialized with chain id {stored:?}, \
     asked to open with {given:?}"
  )]
  GenesisMismatch { stored: String, given: String },
}

/// Append-only, height-keyed persistence for the canonical chain. The
/// store never rewrites history: `put` only ever extends the tip by
/// one height, and headers/bodies already written are immutable.
pub trait BlockchainStore: Send + Sync {
  /// Installs the genesis block if the store is empty, or verifies
  /// that a previously installed genesis matches. Must be called
  /// before any other method.
  fn ready(&self, genesis: &Genesis) -> Result<(), StoreError>;

  /// Height of the most recently committed block. Zero right after
  /// genesis.
  fn height(&self) -> Result<u64, StoreError>;

  fn block_of(&self, height: u64) -> Result<Block, StoreError>;

  fn header_of(&self, height: u64) -> Result<BlockHeader, StoreError>;

  /// Appends a block at `block.header.height`, which must equal
  /// `self.height() + 1`. Returns `InvalidBlock` for any other height.
  fn put(&self, block: Block) -> Result<(), StoreError>;
}

pub use sled_store::SledBlockchainStore;

#[cfg(test)]
pub mod test_support {
  use super::*;
  use dashmap::DashMap;
  use std::sync::RwLock;

  /// In-memory store used by engine/executor/synchronizer unit tests
  /// so they don't need a real sled database.
  #[derive(Default)]
  pub struct InMemoryStore {
    blocks: DashMap<u64, Block>,
    tip: RwLock<u64>,
    genesis_chain_id: RwLock<Option<String>>,
  }

  impl BlockchainStore for InMemoryStore {
    fn ready(&self, genesis: &Genesis) -> Result<(), StoreError> {
      let mut stored = self.genesis_chain_id.write().unwrap();
      match stored.as_ref() {
        Some(chain_id) if chain_id != &genesis.chain_id => {
          return Err(StoreError::GenesisMismatch {
            stored: chain_id.clone(),
            given: genesis.chain_id.clone(),
          });
        }
        Some(_) => return Ok(()),
        None => {}
      }
      *stored = Some(genesis.chain_id.clone());
      self.blocks.insert(
        0,
        Block {
          header: genesis.header(),
          body: crate::model::BlockBody {
            transactions: crate::model::TransactionList::default(),
            last_block_consensus: None,
            next_validator_set: None,
          },
        },
      );
      *self.tip.write().unwrap() = 0;
      Ok(())
    }

    fn height(&self) -> Result<u64, StoreError> {
      Ok(*self.tip.read().unwrap())
    }

    fn block_of(&self, height: u64) -> Result<Block, StoreError> {
      self
        .blocks
        .get(&height)
        .map(|b| b.clone())
        .ok_or(StoreError::NotFound(height))
    }

    fn header_of(&self, height: u64) -> Result<BlockHeader, StoreError> {
      self.block_of(height).map(|b| b.header)
    }

    fn put(&self, block: Block) -> Result<(), StoreError> {
      let tip = *self.tip.read().unwrap();
      if block.header.height != tip + 1 {
        return Err(StoreError::InvalidBlock {
          height: block.header.height,
          expected: tip + 1,
        });
      }
      let height = block.header.height;
      self.blocks.insert(height, block);
      *self.tip.write().unwrap() = height;
      Ok(())
    }
  }
}
