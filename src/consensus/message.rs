use crate::{
  model::{Block, Vote},
  primitives::{Address, Keypair},
};
use ed25519_dalek::{PublicKey, Signature, SignatureError, Verifier};
use serde::{Deserialize, Serialize};

/// A proposer's pitch for the block at `(height, round)`. `pol_round`
/// ("proof of lock" round) is set when the proposer is re-proposing a
/// value it saw reach prevote quorum in an earlier round of this
/// height, per the locking rule: `None` means this is a fresh value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
  pub height: u64,
  pub round: u32,
  pub proposer: Address,
  pub block: Block,
  pub pol_round: Option<u32>,
  pub signature: Signature,
}

impl Proposal {
  fn signed_bytes(
    height: u64,
    round: u32,
    block_hash: &crate::primitives::Hash,
    pol_round: Option<u32>,
  ) -> Vec<u8> {
    let mut msg = Vec::with_capacity(48);
    msg.extend_from_slice(&height.to_be_bytes());
    msg.extend_from_slice(&round.to_be_bytes());
    msg.extend_from_slice(block_hash.as_bytes());
    msg.extend_from_slice(&pol_round.unwrap_or(u32::MAX).to_be_bytes());
    msg
  }

  pub fn new(
    keypair: &Keypair,
    height: u64,
    round: u32,
    block: Block,
    pol_round: Option<u32>,
  ) -> Self {
    let block_hash = block.hash();
    let signature = keypair
      .sign(&Self::signed_bytes(height, round, &block_hash, pol_round));
    Self { height, round, proposer: keypair.address(), block, pol_round, signature }
  }

  pub fn verify_signature(&self) -> Result<(), SignatureError> {
    let block_hash = self.block.hash();
    let msg =
      Self::signed_bytes(self.height, self.round, &block_hash, self.pol_round);
    PublicKey::from_bytes(self.proposer.as_bytes())?
      .verify(&msg, &self.signature)
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConsensusMessage {
  Proposal(Proposal),
  Vote(Vote),
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::model::{BlockBody, BlockHeader, TransactionList};
  use crate::primitives::Hash;

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

  fn block() -> Block {
    Block {
      header: BlockHeader {
        height: 1,
        timestamp: 1,
        last_block_hash: Hash::zero(),
        transaction_root: TransactionList::default().root(),
        last_block_consensus_root: Hash::zero(),
        next_validator_set_root: Hash::zero(),
        app_state_hash: Hash::zero(),
      },
      body: BlockBody {
        transactions: TransactionList::default(),
        last_block_consensus: None,
        next_validator_set: None,
      },
    }
  }

  #[test]
  fn proposal_signature_verifies() {
    let kp = keypair();
    let proposal = Proposal::new(&kp, 1, 0, block(), None);
    assert!(proposal.verify_signature().is_ok());
  }

  #[test]
  fn tampered_round_breaks_signature() {
    let kp = keypair();
    let mut proposal = Proposal::new(&kp, 1, 0, block(), None);
    proposal.round = 1;
    assert!(proposal.verify_signature().is_err());
  }
}
