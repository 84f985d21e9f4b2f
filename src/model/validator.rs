use crate::primitives::{Address, Hash};
use serde::{Deserialize, Serialize};

/// A single member of the validator set, identified by address and
/// weighted by voting power. Voting power need not be uniform: quorum
/// calculations are always done in terms of power, never head count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
  pub address: Address,
  pub voting_power: u64,
}

/// The fixed set of validators securing one height (or range of
/// heights, between validator-set changes). Ordered deterministically
/// (by address) so every replica derives the same root hash and the
/// same proposer schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorSet {
  validators: Vec<Validator>,
}

impl ValidatorSet {
  pub fn new(mut validators: Vec<Validator>) -> Self {
    validators.sort_by_key(|v| v.address);
    Self { validators }
  }

  pub fn validators(&self) -> &[Validator] {
    &self.validators
  }

  pub fn len(&self) -> usize {
    self.validators.len()
  }

  pub fn is_empty(&self) -> bool {
    self.validators.is_empty()
  }

  pub fn total_power(&self) -> u64 {
    self.validators.iter().map(|v| v.voting_power).sum()
  }

  /// The minimum power that constitutes a Byzantine-fault-tolerant
  /// quorum: strictly more than two thirds of total voting power.
  pub fn quorum_threshold(&self) -> u64 {
    (2 * self.total_power()) / 3
  }

  pub fn has_quorum(&self, power: u64) -> bool {
    power > self.quorum_threshold()
  }

  pub fn index_of(&self, address: &Address) -> Option<usize> {
    self.validators.iter().position(|v| &v.address == address)
  }

  pub fn power_of(&self, address: &Address) -> Option<u64> {
    self
      .validators
      .iter()
      .find(|v| &v.address == address)
      .map(|v| v.voting_power)
  }

  pub fn contains(&self, address: &Address) -> bool {
    self.index_of(address).is_some()
  }

  /// Deterministic root hash used in block headers and schedule
  /// seeding; order and content both matter.
  pub fn hash(&self) -> Hash {
    let mut buf = Vec::with_capacity(self.validators.len() * 40);
    for v in &self.validators {
      buf.extend_from_slice(v.address.as_bytes());
      buf.extend_from_slice(&v.voting_power.to_be_bytes());
    }
    Hash::of(&buf)
  }
}

#[cfg(test)]
mod test {
  use super::*;

  fn addr(byte: u8) -> Address {
    Address::from_bytes([byte; 32])
  }

  #[test]
  fn quorum_threshold_is_strictly_more_than_two_thirds() {
    let set = ValidatorSet::new(vec![
      Validator { address: addr(1), voting_power: 10 },
      Validator { address: addr(2), voting_power: 10 },
      Validator { address: addr(3), voting_power: 10 },
    ]);
    assert_eq!(set.total_power(), 30);
    assert_eq!(set.quorum_threshold(), 20);
    assert!(!set.has_quorum(20));
    assert!(set.has_quorum(21));
  }

  #[test]
  fn hash_is_order_independent_of_construction_order() {
    let a = ValidatorSet::new(vec![
      Validator { address: addr(1), voting_power: 5 },
      Validator { address: addr(2), voting_power: 5 },
    ]);
    let b = ValidatorSet::new(vec![
      Validator { address: addr(2), voting_power: 5 },
      Validator { address: addr(1), voting_power: 5 },
    ]);
    assert_eq!(a.hash(), b.hash());
  }
}
