use crate::{
  model::{
    transaction::TransactionList,
    validator::ValidatorSet,
    vote::{Commit, Vote, VoteType},
  },
  primitives::Hash,
};
use ed25519_dalek::{PublicKey, Verifier};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockHeader {
  pub height: u64,
  pub timestamp: i64,
  pub last_block_hash: Hash,
  pub transaction_root: Hash,
  pub last_block_consensus_root: Hash,
  pub next_validator_set_root: Hash,
  pub app_state_hash: Hash,
}

impl BlockHeader {
  pub fn hash(&self) -> Hash {
    Hash::of(&bincode::serialize(self).expect("header always serializes"))
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockBody {
  pub transactions: TransactionList,
  pub last_block_consensus: Option<Commit>,
  pub next_validator_set: Option<ValidatorSet>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
  pub header: BlockHeader,
  pub body: BlockBody,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlockValidationError {
  #[error("transaction root does not match block body")]
  TransactionRootMismatch,

  #[error("last-block-consensus root does not match block body")]
  ConsensusRootMismatch,

  #[error("next-validator-set root does not match block body")]
  ValidatorSetRootMismatch,

  #[error("block height {found} does not follow parent height {expected}")]
  NonContiguousHeight { expected: u64, found: u64 },

  #[error("block's last_block_hash does not match parent hash")]
  ParentHashMismatch,

  #[error("block timestamp {found} is not after parent timestamp {parent}")]
  NonMonotonicTimestamp { parent: i64, found: i64 },

  #[error("block at height {0} carries no commit certificate")]
  MissingCommit(u64),

  #[error("commit certificate does not prove a quorum")]
  QuorumNotMet,
}

impl Block {
  pub fn hash(&self) -> Hash {
    self.header.hash()
  }

  /// Structural validation performed before a block is ever handed to
  /// the executor: header fields are consistent with the body, and the
  /// block correctly chains onto its stated parent. Does not validate
  /// individual transactions; that is the dapp's job during execution.
  pub fn validate_against_parent(
    &self,
    parent: &BlockHeader,
  ) -> Result<(), BlockValidationError> {
    if self.body.transactions.root() != self.header.transaction_root {
      return Err(BlockValidationError::TransactionRootMismatch);
    }
    let consensus_root = match &self.body.last_block_consensus {
      Some(c) => Hash::of(&bincode::serialize(c).unwrap()),
      None => Hash::zero(),
    };
    if consensus_root != self.header.last_block_consensus_root {
      return Err(BlockValidationError::ConsensusRootMismatch);
    }
    let validator_set_root = match &self.body.next_validator_set {
      Some(vs) => vs.hash(),
      None => Hash::zero(),
    };
    if validator_set_root != self.header.next_validator_set_root {
      return Err(BlockValidationError::ValidatorSetRootMismatch);
    }
    if self.header.height != parent.height + 1 {
      return Err(BlockValidationError::NonContiguousHeight {
        expected: parent.height + 1,
        found: self.header.height,
      });
    }
    if self.header.last_block_hash != parent.hash() {
      return Err(BlockValidationError::ParentHashMismatch);
    }
    if self.header.timestamp <= parent.timestamp {
      return Err(BlockValidationError::NonMonotonicTimestamp {
        parent: parent.timestamp,
        found: self.header.timestamp,
      });
    }
    Ok(())
  }

  /// Verifies that this block's commit certificate proves a quorum of
  /// the given validator set actually signed a precommit for this
  /// block: each signature is checked against its claimed signer
  /// before that signer's power counts towards the quorum. Unknown
  /// signers and duplicate entries are ignored rather than rejected
  /// outright, since a correct quorum can still be reached around them.
  pub fn validate_commit(
    &self,
    validators: &ValidatorSet,
  ) -> Result<(), BlockValidationError> {
    let commit = self
      .body
      .last_block_consensus
      .as_ref()
      .ok_or(BlockValidationError::MissingCommit(self.header.height))?;
    let signed_bytes = Vote::signed_bytes(
      VoteType::Precommit,
      commit.height,
      commit.round,
      Some(commit.block_hash),
    );
    let mut seen = HashSet::new();
    let mut power = 0u64;
    for (addr, sig) in &commit.signatures {
      if !seen.insert(*addr) {
        continue;
      }
      let validator_power = match validators.power_of(addr) {
        Some(p) => p,
        None => continue,
      };
      let public_key = match PublicKey::from_bytes(addr.as_bytes()) {
        Ok(pk) => pk,
        Err(_) => continue,
      };
      if public_key.verify(&signed_bytes, sig).is_err() {
        continue;
      }
      power += validator_power;
    }
    if !validators.has_quorum(power) {
      return Err(BlockValidationError::QuorumNotMet);
    }
    Ok(())
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::model::validator::Validator;
  use crate::primitives::Address;

  fn header(height: u64, parent: Hash, ts: i64) -> BlockHeader {
    BlockHeader {
      height,
      timestamp: ts,
      last_block_hash: parent,
      transaction_root: TransactionList::default().root(),
      last_block_consensus_root: Hash::zero(),
      next_validator_set_root: Hash::zero(),
      app_state_hash: Hash::zero(),
    }
  }

  #[test]
  fn detects_non_contiguous_height() {
    let genesis = header(0, Hash::zero(), 0);
    let block = Block {
      header: header(2, genesis.hash(), 1),
      body: BlockBody {
        transactions: TransactionList::default(),
        last_block_consensus: None,
        next_validator_set: None,
      },
    };
    assert_eq!(
      block.validate_against_parent(&genesis),
      Err(BlockValidationError::NonContiguousHeight { expected: 1, found: 2 })
    );
  }

  #[test]
  fn detects_parent_hash_mismatch() {
    let genesis = header(0, Hash::zero(), 0);
    let block = Block {
      header: header(1, Hash::of(b"wrong"), 1),
      body: BlockBody {
        transactions: TransactionList::default(),
        last_block_consensus: None,
        next_validator_set: None,
      },
    };
    assert_eq!(
      block.validate_against_parent(&genesis),
      Err(BlockValidationError::ParentHashMismatch)
    );
  }

  #[test]
  fn commit_without_quorum_is_rejected() {
    let validators = ValidatorSet::new(vec![
      Validator { address: Address::from_bytes([1; 32]), voting_power: 10 },
      Validator { address: Address::from_bytes([2; 32]), voting_power: 10 },
      Validator { address: Address::from_bytes([3; 32]), voting_power: 10 },
    ]);
    let block_hash = Hash::of(b"block");
    let block = Block {
      header: header(1, Hash::zero(), 1),
      body: BlockBody {
        transactions: TransactionList::default(),
        last_block_consensus: Some(Commit {
          height: 1,
          round: 0,
          block_hash,
          signatures: vec![],
        }),
        next_validator_set: None,
      },
    };
    assert_eq!(
      block.validate_commit(&validators),
      Err(BlockValidationError::QuorumNotMet)
    );
  }

  fn keypair(byte: u8) -> crate::primitives::Keypair {
    let mut bytes = [0u8; 32];
    for (i, b) in bytes.iter_mut().enumerate() {
      *b = byte.wrapping_add(i as u8).wrapping_mul(17).wrapping_add(3);
    }
    crate::primitives::Keypair::try_from(&bytes[..]).unwrap()
  }

  #[test]
  fn forged_signatures_do_not_count_towards_quorum() {
    let keys: Vec<_> = (0..3u8).map(keypair).collect();
    let validators = ValidatorSet::new(
      keys
        .iter()
        .map(|k| Validator { address: k.address(), voting_power: 10 })
        .collect(),
    );
    let block_hash = Hash::of(b"block");
    // Real validator addresses, but the signatures are garbage: lifted
    // from an unrelated vote rather than a precommit for this block.
    let garbage = Vote::new(&keys[0], VoteType::Prevote, 99, 7, None).signature;
    let block = Block {
      header: header(1, Hash::zero(), 1),
      body: BlockBody {
        transactions: TransactionList::default(),
        last_block_consensus: Some(Commit {
          height: 1,
          round: 0,
          block_hash,
          signatures: keys.iter().map(|k| (k.address(), garbage)).collect(),
        }),
        next_validator_set: None,
      },
    };
    assert_eq!(
      block.validate_commit(&validators),
      Err(BlockValidationError::QuorumNotMet)
    );
  }

  #[test]
  fn genuine_precommits_are_accepted() {
    let keys: Vec<_> = (0..3u8).map(keypair).collect();
    let validators = ValidatorSet::new(
      keys
        .iter()
        .map(|k| Validator { address: k.address(), voting_power: 10 })
        .collect(),
    );
    let block_hash = Hash::of(b"block");
    let signatures = keys
      .iter()
      .map(|k| {
        let vote =
          Vote::new(k, VoteType::Precommit, 1, 0, Some(block_hash));
        (k.address(), vote.signature)
      })
      .collect();
    let block = Block {
      header: header(1, Hash::zero(), 1),
      body: BlockBody {
        transactions: TransactionList::default(),
        last_block_consensus: Some(Commit {
          height: 1,
          round: 0,
          block_hash,
          signatures,
        }),
        next_validator_set: None,
      },
    };
    assert!(block.validate_commit(&validators).is_ok());
  }

  #[test]
  fn duplicate_signatures_count_once() {
    let keys: Vec<_> = (0..3u8).map(keypair).collect();
    let validators = ValidatorSet::new(
      keys
        .iter()
        .map(|k| Validator { address: k.address(), voting_power: 10 })
        .collect(),
    );
    let block_hash = Hash::of(b"block");
    let vote =
      Vote::new(&keys[0], VoteType::Precommit, 1, 0, Some(block_hash));
    let mut signatures = vec![(keys[0].address(), vote.signature); 3];
    signatures.push((
      keys[1].address(),
      Vote::new(&keys[1], VoteType::Precommit, 1, 0, Some(block_hash)).signature,
    ));
    let block = Block {
      header: header(1, Hash::zero(), 1),
      body: BlockBody {
        transactions: TransactionList::default(),
        last_block_consensus: Some(Commit {
          height: 1,
          round: 0,
          block_hash,
          signatures,
        }),
        next_validator_set: None,
      },
    };
    // Only validators 0 and 1 actually counted once each: 20 power,
    // not enough for quorum over 30 total.
    assert_eq!(
      block.validate_commit(&validators),
      Err(BlockValidationError::QuorumNotMet)
    );
  }
}
