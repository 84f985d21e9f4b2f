use crate::model::{Validator, ValidatorSet};
use rand::{distributions::WeightedIndex, prelude::Distribution, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Deterministically picks the proposer for one `(height, round)` pair.
///
/// Every correct replica must compute the same answer without any
/// further network communication, so the source of randomness is a
/// PRNG seeded purely from already-agreed-upon values: the validator
/// set's hash and the height. `round` is then consumed as the Nth
/// weighted draw from that seeded stream, giving a new (stake-weighted
/// random, but globally reproducible) proposer each time a round times
/// out and advances.
///
/// This reuses the validator-schedule machinery that originally drove
/// a wall-clock-synchronized slot leader election, but drops the
/// dependency on wall-clock slots: proposer rotation here is driven by
/// round advancement, an event internal to the state machine.
pub struct ProposerSchedule<'a> {
  validators: &'a [Validator],
  dist: WeightedIndex<u64>,
}

impl<'a> ProposerSchedule<'a> {
  pub fn new(validator_set: &'a ValidatorSet) -> Self {
    let validators = validator_set.validators();
    let dist = WeightedIndex::new(validators.iter().map(|v| v.voting_power))
      .expect("validator set has at least one validator with positive power");
    Self { validators, dist }
  }

  fn seed(height: u64, validator_set_hash: &crate::primitives::Hash) -> [u8; 32] {
    let mut seed = *validator_set_hash.as_bytes();
    let height_bytes = height.to_be_bytes();
    for (i, b) in height_bytes.iter().enumerate() {
      seed[i] ^= *b;
    }
    seed
  }

  /// Returns the proposer for `(height, round)`.
  pub fn proposer_for(
    &self,
    validator_set_hash: &crate::primitives::Hash,
    height: u64,
    round: u32,
  ) -> &'a Validator {
    let mut rng = ChaCha20Rng::from_seed(Self::seed(height, validator_set_hash));
    // consume round+1 draws so round 0's proposer is the first draw;
    // later rounds intentionally diverge from round 0's pick.
    let mut idx = self.dist.sample(&mut rng);
    for _ in 0..round {
      idx = self.dist.sample(&mut rng);
    }
    &self.validators[idx]
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::primitives::Address;

  fn validators() -> ValidatorSet {
    ValidatorSet::new(vec![
      Validator { address: Address::from_bytes([1; 32]), voting_power: 10 },
      Validator { address: Address::from_bytes([2; 32]), voting_power: 20 },
      Validator { address: Address::from_bytes([3; 32]), voting_power: 70 },
    ])
  }

  #[test]
  fn same_inputs_yield_same_proposer() {
    let set = validators();
    let schedule = ProposerSchedule::new(&set);
    let hash = set.hash();
    let a = schedule.proposer_for(&hash, 10, 2);
    let b = schedule.proposer_for(&hash, 10, 2);
    assert_eq!(a.address, b.address);
  }

  #[test]
  fn different_rounds_can_yield_different_proposers() {
    let set = validators();
    let schedule = ProposerSchedule::new(&set);
    let hash = set.hash();
    let mut distinct = std::collections::HashSet::new();
    for round in 0..8 {
      distinct.insert(schedule.proposer_for(&hash, 5, round).address);
    }
    assert!(distinct.len() > 1);
  }
}
