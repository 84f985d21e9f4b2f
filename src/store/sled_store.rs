use super::{BlockchainStore, StoreError};
use crate::model::{Block, BlockBody, BlockHeader, Genesis};
use std::path::Path;

const TIP_KEY: &[u8] = b"tip";
const CHAIN_ID_KEY: &[u8] = b"chain_id";

/// Sled-backed implementation of [`BlockchainStore`]. Headers and
/// bodies live in separate trees (mirroring how the old rocksdb-based
/// store split "confirmed"/"finalized" column families) so a reader
/// that only needs headers never has to deserialize transaction
/// payloads.
pub struct SledBlockchainStore {
  headers: sled::Tree,
  bodies: sled::Tree,
  meta: sled::Tree,
}

impl SledBlockchainStore {
  pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
    let db = sled::open(path)?;
    Ok(Self {
      headers: db.open_tree("headers")?,
      bodies: db.open_tree("bodies")?,
      meta: db.open_tree("meta")?,
    })
  }

  fn height_key(height: u64) -> [u8; 8] {
    height.to_be_bytes()
  }
}

impl BlockchainStore for SledBlockchainStore {
  fn ready(&self, genesis: &Genesis) -> Result<(), StoreError> {
    if let Some(stored) = self.meta.get(CHAIN_ID_KEY)? {
      let stored = String::from_utf8_lossy(&stored).to_string();
      if stored != genesis.chain_id {
        return Err(StoreError::GenesisMismatch {
          stored,
          given: genesis.chain_id.clone(),
        });
      }
      return Ok(());
    }

    let header = genesis.header();
    let body = BlockBody {
      transactions: crate::model::TransactionList::default(),
      last_block_consensus: None,
      next_validator_set: None,
    };
    self
      .headers
      .insert(Self::height_key(0), bincode::serialize(&header)?)?;
    self
      .bodies
      .insert(Self::height_key(0), bincode::serialize(&body)?)?;
    self.meta.insert(CHAIN_ID_KEY, genesis.chain_id.as_bytes())?;
    self.meta.insert(TIP_KEY, &Self::height_key(0))?;
    self.meta.flush()?;
    Ok(())
  }

  fn height(&self) -> Result<u64, StoreError> {
    match self.meta.get(TIP_KEY)? {
      Some(bytes) => {
        let arr: [u8; 8] =
          bytes.as_ref().try_into().map_err(|_| StoreError::NotFound(0))?;
        Ok(u64::from_be_bytes(arr))
      }
      None => Ok(0),
    }
  }

  fn block_of(&self, height: u64) -> Result<Block, StoreError> {
    let header = self.header_of(height)?;
    let body_bytes = self
      .bodies
      .get(Self::height_key(height))?
      .ok_or(StoreError::NotFound(height))?;
    let body: BlockBody = bincode::deserialize(&body_bytes)?;
    Ok(Block { header, body })
  }

  fn header_of(&self, height: u64) -> Result<BlockHeader, StoreError> {
    let bytes = self
      .headers
      .get(Self::height_key(height))?
      .ok_or(StoreError::NotFound(height))?;
    Ok(bincode::deserialize(&bytes)?)
  }

  fn put(&self, block: Block) -> Result<(), StoreError> {
    let tip = self.height()?;
    if block.header.height != tip + 1 {
      return Err(StoreError::InvalidBlock {
        height: block.header.height,
        expected: tip + 1,
      });
    }
    let height = block.header.height;
    self
      .headers
      .insert(Self::height_key(height), bincode::serialize(&block.header)?)?;
    self
      .bodies
      .insert(Self::height_key(height), bincode::serialize(&block.body)?)?;
    self.meta.insert(TIP_KEY, &Self::height_key(height))?;
    self.meta.flush()?;
    Ok(())
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::model::Validator;
  use crate::primitives::{Address, Hash};

  fn genesis() -> Genesis {
    Genesis {
      chain_id: "sled-test".to_string(),
      genesis_time: chrono::Utc::now(),
      propose_timeout: std::time::Duration::from_secs(1),
      prevote_timeout: std::time::Duration::from_secs(1),
      precommit_timeout: std::time::Duration::from_secs(1),
      validators: vec![Validator {
        address: Address::from_bytes([7; 32]),
        voting_power: 10,
      }],
      app_state_hash: Hash::zero(),
    }
  }

  fn open_temp() -> SledBlockchainStore {
    let dir = tempdir();
    SledBlockchainStore::open(dir).unwrap()
  }

  fn tempdir() -> std::path::PathBuf {
    let mut p = std::env::temp_dir();
    p.push(format!("tenzor-store-test-{}", std::process::id()));
    p.push(format!("{:?}", std::thread::current().id()));
    p
  }

  #[test]
  fn ready_installs_genesis_exactly_once() {
    let store = open_temp();
    let g = genesis();
    store.ready(&g).unwrap();
    assert_eq!(store.height().unwrap(), 0);
    store.ready(&g).unwrap();
    assert_eq!(store.height().unwrap(), 0);
  }

  #[test]
  fn ready_rejects_mismatched_genesis() {
    let store = open_temp();
    store.ready(&genesis()).unwrap();
    let mut other = genesis();
    other.chain_id = "different-chain".to_string();
    assert!(matches!(
      store.ready(&other),
      Err(StoreError::GenesisMismatch { .. })
    ));
  }

  #[test]
  fn put_rejects_non_contiguous_height() {
    let store = open_temp();
    store.ready(&genesis()).unwrap();
    let header = store.header_of(0).unwrap();
    let mut next = header.clone();
    next.height = 5;
    next.last_block_hash = header.hash();
    let block = Block {
      header: next,
      body: BlockBody {
        transactions: crate::model::TransactionList::default(),
        last_block_consensus: None,
        next_validator_set: None,
      },
    };
    assert!(matches!(
      store.put(block),
      Err(StoreError::InvalidBlock { expected: 1, height: 5 })
    ));
  }
}
