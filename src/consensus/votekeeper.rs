use crate::{
  consensus::fault::Equivocation,
  model::{Vote, VoteType},
  primitives::{Address, Hash},
};
use std::collections::HashMap;

/// Tracks every vote seen for one round (one height is made of many
/// `VoteKeeper`s, one per round) and answers the only two questions the
/// state machine cares about: "has `>2/3` voted the same way yet", and
/// "did any validator contradict themselves".
#[derive(Default)]
pub struct VoteKeeper {
  prevotes: HashMap<Address, Vote>,
  precommits: HashMap<Address, Vote>,
}

pub enum Admit {
  Added,
  AlreadySeen,
  Equivocation(Equivocation),
}

impl VoteKeeper {
  pub fn add(&mut self, vote: Vote) -> Admit {
    let table = match vote.vote_type {
      VoteType::Prevote => &mut self.prevotes,
      VoteType::Precommit => &mut self.precommits,
    };
    match table.get(&vote.validator) {
      Some(existing) if existing.block_hash == vote.block_hash => {
        Admit::AlreadySeen
      }
      Some(existing) => {
        let equivocation = Equivocation::detect(existing, &vote)
          .expect("conflicting votes by same validator must be an equivocation");
        Admit::Equivocation(equivocation)
      }
      None => {
        table.insert(vote.validator, vote);
        Admit::Added
      }
    }
  }

  /// Any block hash (or nil) that currently has quorum for `vote_type`,
  /// preferring a concrete block hash over nil if, implausibly, both
  /// independently reach quorum (they can't under honest-majority
  /// assumptions, but a Byzantine minority could try).
  pub fn quorum(
    &self,
    vote_type: VoteType,
    has_quorum: &dyn Fn(u64) -> bool,
    power_of: &dyn Fn(&Address) -> u64,
  ) -> Option<Option<Hash>> {
    let table = match vote_type {
      VoteType::Prevote => &self.prevotes,
      VoteType::Precommit => &self.precommits,
    };
    let mut totals: HashMap<Option<Hash>, u64> = HashMap::new();
    for vote in table.values() {
      *totals.entry(vote.block_hash).or_insert(0) += power_of(&vote.validator);
    }
    totals
      .into_iter()
      .find(|(_, power)| has_quorum(*power))
      .map(|(hash, _)| hash)
  }

  /// Total power that has voted at all (for either a block or nil) for
  /// `vote_type`, used to decide whether to schedule a timeout waiting
  /// for more votes vs. give up because no quorum is possible anymore.
  pub fn voted_power(
    &self,
    vote_type: VoteType,
    power_of: &dyn Fn(&Address) -> u64,
  ) -> u64 {
    let table = match vote_type {
      VoteType::Prevote => &self.prevotes,
      VoteType::Precommit => &self.precommits,
    };
    table.values().map(|v| power_of(&v.validator)).sum()
  }

  pub fn votes_for(&self, vote_type: VoteType, target: Hash) -> Vec<Vote> {
    let table = match vote_type {
      VoteType::Prevote => &self.prevotes,
      VoteType::Precommit => &self.precommits,
    };
    table
      .values()
      .filter(|v| v.block_hash == Some(target))
      .cloned()
      .collect()
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::primitives::Keypair;

  fn keypair(byte: u8) -> Keypair {
    let mut bytes = [0u8; 32];
    for (i, b) in bytes.iter_mut().enumerate() {
      *b = byte.wrapping_add(i as u8).wrapping_mul(17).wrapping_add(3);
    }
    Keypair::try_from(&bytes[..]).unwrap()
  }

  #[test]
  fn quorum_detected_once_threshold_crossed() {
    let mut keeper = VoteKeeper::default();
    let validators: Vec<_> = (1..=3u8).map(keypair).collect();
    let block = Hash::of(b"block");
    for kp in &validators {
      let vote =
        Vote::new(kp, VoteType::Prevote, 1, 0, Some(block));
      keeper.add(vote);
    }
    let has_quorum = |p: u64| p > 20;
    let power_of = |_: &Address| 10u64;
    assert_eq!(
      keeper.quorum(VoteType::Prevote, &has_quorum, &power_of),
      Some(Some(block))
    );
  }

  #[test]
  fn detects_equivocating_validator() {
    let mut keeper = VoteKeeper::default();
    let kp = keypair(1);
    let a = Vote::new(&kp, VoteType::Prevote, 1, 0, Some(Hash::of(b"a")));
    let b = Vote::new(&kp, VoteType::Prevote, 1, 0, Some(Hash::of(b"b")));
    keeper.add(a);
    match keeper.add(b) {
      Admit::Equivocation(_) => {}
      _ => panic!("expected equivocation to be detected"),
    }
  }
}
