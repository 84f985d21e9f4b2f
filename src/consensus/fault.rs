use crate::{model::Vote, primitives::Address};

/// A validator signed two conflicting votes for the same
/// `(height, round, vote_type)`. Detectable the instant both messages
/// have been seen by any single node; recorded but, unlike a Casper
/// equivocation, does not by itself change this block's validity —
/// slashing/ejection of the offending validator is left to a
/// higher-level governance mechanism outside this engine's scope.
#[derive(Debug, Clone)]
pub struct Equivocation {
  pub validator: Address,
  pub height: u64,
  pub round: u32,
  pub first: Vote,
  pub second: Vote,
}

impl Equivocation {
  /// Checks whether two votes from the same validator at the same
  /// height/round/type conflict (different block hashes).
  pub fn detect(first: &Vote, second: &Vote) -> Option<Equivocation> {
    if first.validator != second.validator {
      return None;
    }
    if first.height != second.height
      || first.round != second.round
      || first.vote_type != second.vote_type
    {
      return None;
    }
    if first.block_hash == second.block_hash {
      return None;
    }
    Some(Equivocation {
      validator: first.validator,
      height: first.height,
      round: first.round,
      first: first.clone(),
      second: second.clone(),
    })
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::{model::VoteType, primitives::Keypair};

  fn keypair() -> Keypair {
    Keypair::try_from(
      &[
        157u8, 97, 177, 157, 239, 253, 90, 96, 186, 127, 63, 146, 25, 165,
        159, 68, 103, 50, 20, 112, 227, 47, 118, 143, 13, 4, 157, 126, 232,
        9, 132, 42,
      ][..],
    )
    .unwrap()
  }

  #[test]
  fn detects_conflicting_votes_same_round() {
    let kp = keypair();
    let a = Vote::new(
      &kp,
      VoteType::Prevote,
      10,
      0,
      Some(crate::primitives::Hash::of(b"block-a")),
    );
    let b = Vote::new(
      &kp,
      VoteType::Prevote,
      10,
      0,
      Some(crate::primitives::Hash::of(b"block-b")),
    );
    assert!(Equivocation::detect(&a, &b).is_some());
  }

  #[test]
  fn does_not_flag_votes_in_different_rounds() {
    let kp = keypair();
    let a = Vote::new(
      &kp,
      VoteType::Prevote,
      10,
      0,
      Some(crate::primitives::Hash::of(b"block-a")),
    );
    let b = Vote::new(
      &kp,
      VoteType::Prevote,
      10,
      1,
      Some(crate::primitives::Hash::of(b"block-b")),
    );
    assert!(Equivocation::detect(&a, &b).is_none());
  }
}
