use crate::primitives::{Address, Hash, Keypair};
use ed25519_dalek::{PublicKey, Signature, SignatureError, Verifier};
use serde::{Deserialize, Serialize};

/// The phase a vote (or proposal) belongs to within one round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoteType {
  Prevote,
  Precommit,
}

/// A validator's signed opinion about a candidate block at one
/// `(height, round)`. `block_hash` is `None` for a nil vote (cast when
/// a validator times out without seeing a valid proposal).
#[derive(Clone, Serialize, Deserialize)]
pub struct Vote {
  pub vote_type: VoteType,
  pub height: u64,
  pub round: u32,
  pub block_hash: Option<Hash>,
  pub validator: Address,
  pub signature: Signature,
}

impl std::fmt::Debug for Vote {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Vote")
      .field("vote_type", &self.vote_type)
      .field("height", &self.height)
      .field("round", &self.round)
      .field("block_hash", &self.block_hash)
      .field("validator", &self.validator)
      .finish()
  }
}

impl Vote {
  pub(crate) fn signed_bytes(
    vote_type: VoteType,
    height: u64,
    round: u32,
    block_hash: Option<Hash>,
  ) -> Vec<u8> {
    let mut msg = Vec::with_capacity(48);
    msg.push(match vote_type {
      VoteType::Prevote => 0u8,
      VoteType::Precommit => 1u8,
    });
    msg.extend_from_slice(&height.to_be_bytes());
    msg.extend_from_slice(&round.to_be_bytes());
    match block_hash {
      Some(h) => msg.extend_from_slice(h.as_bytes()),
      None => msg.extend_from_slice(&[0u8; 32]),
    }
    msg
  }

  pub fn new(
    keypair: &Keypair,
    vote_type: VoteType,
    height: u64,
    round: u32,
    block_hash: Option<Hash>,
  ) -> Self {
    let msg = Self::signed_bytes(vote_type, height, round, block_hash);
    let signature = keypair.sign(&msg);
    Self {
      vote_type,
      height,
      round,
      block_hash,
      validator: keypair.address(),
      signature,
    }
  }

  pub fn verify_signature(&self) -> Result<(), SignatureError> {
    let msg = Self::signed_bytes(
      self.vote_type,
      self.height,
      self.round,
      self.block_hash,
    );
    PublicKey::from_bytes(self.validator.as_bytes())?
      .verify(&msg, &self.signature)
  }

  pub fn is_nil(&self) -> bool {
    self.block_hash.is_none()
  }
}

/// A quorum certificate: a set of precommits at one `(height, round)`
/// that together carry more than two thirds of voting power for the
/// same block hash. Embedded into the next block's body as proof the
/// previous block was committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
  pub height: u64,
  pub round: u32,
  pub block_hash: Hash,
  pub signatures: Vec<(Address, Signature)>,
}

#[cfg(test)]
mod test {
  use super::*;

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
  fn vote_signature_covers_round_and_height() {
    let kp = keypair();
    let block = Hash::of(b"block");
    let vote =
      Vote::new(&kp, VoteType::Prevote, 10, 0, Some(block));
    assert!(vote.verify_signature().is_ok());

    let mut tampered = vote.clone();
    tampered.round = 1;
    assert!(tampered.verify_signature().is_err());
  }

  #[test]
  fn nil_vote_has_no_block_hash() {
    let kp = keypair();
    let vote = Vote::new(&kp, VoteType::Precommit, 10, 2, None);
    assert!(vote.is_nil());
    assert!(vote.verify_signature().is_ok());
  }
}
