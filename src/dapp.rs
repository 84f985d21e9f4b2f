use crate::{model::Transaction, primitives::Hash};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DappError {
  #[error("transaction rejected: {0}")]
  Rejected(String),
}

/// The boundary between the consensus core and the application that
/// gives transactions meaning. Every method here is invoked only from
/// the executor's single-threaded apply loop: implementations never
/// need their own internal locking against concurrent execution.
#[async_trait]
pub trait Dapp: Send + Sync {
  /// Applies one transaction's effects to application state. Domain
  /// errors (insufficient balance, bad nonce, and the like) are
  /// returned as `Err` and do not halt the node: the transaction
  /// simply has no effect and is still recorded as included. Only
  /// I/O or programmer errors should ever propagate out of this as a
  /// panic, which the executor treats as an `ExecutorFault`.
  async fn execute_transaction(
    &self,
    tx: &Transaction,
  ) -> Result<(), DappError>;

  /// Cheap pre-admission check run by the transaction pool and by
  /// proposers before including a transaction in a block. Must not
  /// mutate state; a `true` result is not a guarantee that execution
  /// will succeed, only that it's worth attempting.
  async fn validate_transaction(&self, tx: &Transaction) -> bool;

  /// Given the pool's current candidate set (already ordered however
  /// the pool orders them), returns the subset and order the dapp
  /// wants included in the next proposal. The default behaviour of
  /// "take them all, in order" is implemented by callers that don't
  /// need dapp-specific selection; this method exists for dapps that
  /// want to enforce e.g. per-account transaction limits per block.
  async fn select_transactions(
    &self,
    candidates: Vec<Transaction>,
  ) -> Vec<Transaction>;

  /// The application state hash after the most recently executed
  /// block. Becomes `appStateHash` in the next proposed header.
  async fn app_state_hash(&self) -> Hash;

  /// Optional read-through for the `GET /account/:address` RPC route.
  /// Dapps that have no notion of per-address state can leave this at
  /// its default, which the RPC layer turns into a 501.
  async fn query_account(&self, _address: &crate::primitives::Address) -> Option<serde_json::Value> {
    None
  }
}

/// A minimal in-memory [`Dapp`] used by tests and as a reference for
/// what a real implementation looks like: a nonce-checked key/value
/// ledger over transaction payloads, hashed after every execution.
pub mod reference {
  use super::*;
  use dashmap::DashMap;
  use std::sync::atomic::{AtomicU64, Ordering};

  #[derive(Default)]
  pub struct InMemoryDapp {
    nonces: DashMap<crate::primitives::Address, u64>,
    ledger: DashMap<crate::primitives::Address, Vec<u8>>,
    generation: AtomicU64,
  }

  impl InMemoryDapp {
    pub fn new() -> Self {
      Self::default()
    }
  }

  #[async_trait]
  impl Dapp for InMemoryDapp {
    async fn execute_transaction(
      &self,
      tx: &Transaction,
    ) -> Result<(), DappError> {
      let expected = self
        .nonces
        .get(&tx.data.sender)
        .map(|n| *n)
        .unwrap_or(0);
      if tx.data.nonce != expected {
        return Err(DappError::Rejected(format!(
          "bad nonce: expected {expected}, got {}",
          tx.data.nonce
        )));
      }
      self.nonces.insert(tx.data.sender, expected + 1);
      self.ledger.insert(tx.data.sender, tx.data.payload.clone());
      self.generation.fetch_add(1, Ordering::SeqCst);
      Ok(())
    }

    async fn validate_transaction(&self, tx: &Transaction) -> bool {
      if tx.verify_signature().is_err() {
        return false;
      }
      let expected =
        self.nonces.get(&tx.data.sender).map(|n| *n).unwrap_or(0);
      tx.data.nonce >= expected
    }

    async fn select_transactions(
      &self,
      candidates: Vec<Transaction>,
    ) -> Vec<Transaction> {
      candidates
    }

    async fn app_state_hash(&self) -> Hash {
      Hash::of(&self.generation.load(Ordering::SeqCst).to_be_bytes())
    }

    async fn query_account(
      &self,
      address: &crate::primitives::Address,
    ) -> Option<serde_json::Value> {
      let nonce = self.nonces.get(address).map(|n| *n).unwrap_or(0);
      let payload = self.ledger.get(address).map(|v| v.clone());
      Some(serde_json::json!({
        "nonce": nonce,
        "payload": payload.map(|p| bs58::encode(p).into_string()),
      }))
    }
  }

  #[cfg(test)]
  mod test {
    use super::*;
    use crate::primitives::Keypair;

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

    #[tokio::test]
    async fn rejects_transaction_with_wrong_nonce() {
      let dapp = InMemoryDapp::new();
      let kp = keypair();
      let tx = crate::model::Transaction::sign(
        crate::model::TransactionData {
          sender: kp.address(),
          nonce: 7,
          payload: vec![],
        },
        &kp,
      );
      assert!(dapp.execute_transaction(&tx).await.is_err());
    }

    #[tokio::test]
    async fn app_state_hash_changes_after_execution() {
      let dapp = InMemoryDapp::new();
      let kp = keypair();
      let before = dapp.app_state_hash().await;
      let tx = crate::model::Transaction::sign(
        crate::model::TransactionData {
          sender: kp.address(),
          nonce: 0,
          payload: vec![1],
        },
        &kp,
      );
      dapp.execute_transaction(&tx).await.unwrap();
      let after = dapp.app_state_hash().await;
      assert_ne!(before, after);
    }
  }
}
