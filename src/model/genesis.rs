use crate::{
  consensus::StepTimeouts,
  model::{block::BlockHeader, validator::ValidatorSet},
  primitives::Hash,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The genesis configuration of one chain: a fixed validator set, a
/// starting application state hash, and the parameters the consensus
/// engine needs before it can begin round 0 of height 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Genesis {
  /// Globally unique string identifying this chain. Included in the
  /// handshake so nodes never gossip across unrelated chains.
  pub chain_id: String,

  /// UTC instant at which height 1 round 0 begins.
  pub genesis_time: DateTime<Utc>,

  /// Base timeout for a round's propose step, before exponential
  /// backoff by round.
  #[serde(with = "humantime_serde")]
  pub propose_timeout: std::time::Duration,

  /// Base timeout for the prevote step.
  #[serde(with = "humantime_serde")]
  pub prevote_timeout: std::time::Duration,

  /// Base timeout for the precommit step.
  #[serde(with = "humantime_serde")]
  pub precommit_timeout: std::time::Duration,

  pub validators: Vec<crate::model::validator::Validator>,

  /// The application's initial state hash, as reported by the dapp
  /// before any transaction has ever been executed.
  pub app_state_hash: Hash,
}

impl Genesis {
  pub fn validator_set(&self) -> ValidatorSet {
    ValidatorSet::new(self.validators.clone())
  }

  pub fn step_timeouts(&self) -> StepTimeouts {
    StepTimeouts {
      propose: self.propose_timeout,
      prevote: self.prevote_timeout,
      precommit: self.precommit_timeout,
    }
  }

  /// The deterministic height-0 header every node derives locally;
  /// never gossiped, never signed, but its hash anchors the chain.
  pub fn header(&self) -> BlockHeader {
    BlockHeader {
      height: 0,
      timestamp: self.genesis_time.timestamp(),
      last_block_hash: Hash::zero(),
      transaction_root: crate::model::transaction::TransactionList::default()
        .root(),
      last_block_consensus_root: Hash::zero(),
      next_validator_set_root: self.validator_set().hash(),
      app_state_hash: self.app_state_hash,
    }
  }

  pub fn hash(&self) -> Hash {
    self.header().hash()
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::model::validator::Validator;
  use crate::primitives::Address;
  use std::time::Duration;

  fn sample() -> Genesis {
    Genesis {
      chain_id: "test-chain".to_string(),
      genesis_time: Utc::now(),
      propose_timeout: Duration::from_millis(3000),
      prevote_timeout: Duration::from_millis(1000),
      precommit_timeout: Duration::from_millis(1000),
      validators: vec![Validator {
        address: Address::from_bytes([1; 32]),
        voting_power: 10,
      }],
      app_state_hash: Hash::zero(),
    }
  }

  #[test]
  fn genesis_hash_is_deterministic() {
    let g = sample();
    assert_eq!(g.hash(), g.hash());
  }

  #[test]
  fn genesis_header_has_height_zero() {
    assert_eq!(sample().header().height, 0);
  }
}
