use crate::primitives::{Address, Hash, Keypair};
use ed25519_dalek::{PublicKey, Signature, Verifier};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The signed, ordered contents of a transaction. Opaque to the
/// consensus core: `payload` is whatever bytes the dapp understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionData {
  pub sender: Address,
  pub nonce: u64,
  pub payload: Vec<u8>,
}

impl TransactionData {
  fn canonical_bytes(&self) -> Vec<u8> {
    bincode::serialize(self).expect("transaction data always serializes")
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
  pub data: TransactionData,
  pub signature: Signature,
}

#[derive(Debug, Error)]
pub enum TransactionError {
  #[error("transaction signature does not match sender address")]
  BadSignature,
}

impl Transaction {
  pub fn sign(data: TransactionData, keypair: &Keypair) -> Self {
    let signature = keypair.sign(&data.canonical_bytes());
    Self { data, signature }
  }

  pub fn hash(&self) -> Hash {
    Hash::of(&self.data.canonical_bytes())
  }

  /// Verifies that `signature` was produced by `sender`'s private key
  /// over this transaction's canonical bytes. Called once on pool
  /// admission and never assumed true afterwards.
  pub fn verify_signature(&self) -> Result<(), TransactionError> {
    let public = PublicKey::from_bytes(self.data.sender.as_bytes())
      .map_err(|_| TransactionError::BadSignature)?;
    public
      .verify(&self.data.canonical_bytes(), &self.signature)
      .map_err(|_| TransactionError::BadSignature)
  }
}

/// An ordered sequence of transactions as included in a block body,
/// together with its Merkle-style root over individual tx hashes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionList(Vec<Transaction>);

impl TransactionList {
  pub fn new(transactions: Vec<Transaction>) -> Self {
    Self(transactions)
  }

  pub fn as_slice(&self) -> &[Transaction] {
    &self.0
  }

  pub fn into_vec(self) -> Vec<Transaction> {
    self.0
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn root(&self) -> Hash {
    let hashes: Vec<Hash> = self.0.iter().map(Transaction::hash).collect();
    Hash::of_roots(hashes.iter())
  }
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
  fn signed_transaction_verifies() {
    let kp = keypair();
    let tx = Transaction::sign(
      TransactionData { sender: kp.address(), nonce: 0, payload: vec![1, 2, 3] },
      &kp,
    );
    assert!(tx.verify_signature().is_ok());
  }

  #[test]
  fn tampering_with_payload_breaks_signature() {
    let kp = keypair();
    let mut tx = Transaction::sign(
      TransactionData { sender: kp.address(), nonce: 0, payload: vec![1, 2, 3] },
      &kp,
    );
    tx.data.payload = vec![9, 9, 9];
    assert!(tx.verify_signature().is_err());
  }

  #[test]
  fn empty_list_root_is_stable() {
    let list = TransactionList::default();
    assert_eq!(list.root(), Hash::of_roots(Vec::<Hash>::new().iter()));
  }
}
