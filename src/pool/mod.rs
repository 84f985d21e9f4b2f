use crate::{
  dapp::Dapp,
  model::Transaction,
  primitives::{Address, Hash},
};
use dashmap::DashMap;
use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc,
};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum PoolError {
  #[error("transaction already pending")]
  Duplicate,

  #[error("transaction signature did not verify")]
  BadSignature,

  #[error("dapp rejected transaction")]
  AppRejected,

  #[error("pool is at capacity ({0} pending transactions)")]
  Full(usize),

  #[error(
    "sender {sender} already has {pending} pending transactions, the \
     per-sender limit is {limit}"
  )]
  SenderLimitExceeded { sender: Address, pending: usize, limit: usize },
}

pub struct PoolLimits {
  pub max_pending: usize,
  pub max_per_sender: usize,
}

impl Default for PoolLimits {
  fn default() -> Self {
    Self { max_pending: 50_000, max_per_sender: 256 }
  }
}

struct Entry {
  tx: Transaction,
  seq: usize,
}

/// Holds transactions admitted from clients or peers, ordered by
/// arrival, until the consensus engine selects them for a proposal or
/// they are evicted on commit. Backed by a `DashMap` so admission from
/// many peer connections never serializes on a single lock, the same
/// shape as the mempool state the schedule-driven block producer used.
pub struct TransactionPool<D: Dapp> {
  dapp: Arc<D>,
  limits: PoolLimits,
  pending: DashMap<Hash, Entry>,
  per_sender: DashMap<Address, usize>,
  next_seq: AtomicUsize,
}

impl<D: Dapp> TransactionPool<D> {
  pub fn new(dapp: Arc<D>, limits: PoolLimits) -> Self {
    Self {
      dapp,
      limits,
      pending: DashMap::new(),
      per_sender: DashMap::new(),
      next_seq: AtomicUsize::new(0),
    }
  }

  pub fn len(&self) -> usize {
    self.pending.len()
  }

  pub fn is_empty(&self) -> bool {
    self.pending.is_empty()
  }

  /// Admits a transaction: verifies its signature, runs the dapp's
  /// cheap pre-check, and enforces pool/sender caps before inserting.
  pub async fn add(&self, tx: Transaction) -> Result<Hash, PoolError> {
    let hash = tx.hash();
    if self.pending.contains_key(&hash) {
      return Err(PoolError::Duplicate);
    }
    if tx.verify_signature().is_err() {
      return Err(PoolError::BadSignature);
    }
    if !self.dapp.validate_transaction(&tx).await {
      return Err(PoolError::AppRejected);
    }
    if self.pending.len() >= self.limits.max_pending {
      return Err(PoolError::Full(self.limits.max_pending));
    }
    let sender = tx.data.sender;
    let pending_for_sender =
      *self.per_sender.get(&sender).map(|v| *v).get_or_insert(0);
    if pending_for_sender >= self.limits.max_per_sender {
      return Err(PoolError::SenderLimitExceeded {
        sender,
        pending: pending_for_sender,
        limit: self.limits.max_per_sender,
      });
    }
    let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
    self.pending.insert(hash, Entry { tx, seq });
    *self.per_sender.entry(sender).or_insert(0) += 1;
    debug!(%hash, "admitted transaction to pool");
    Ok(hash)
  }

  /// Re-validates all pending transactions against current dapp state,
  /// in parallel, dropping any that no longer pass. Called after every
  /// commit so stale nonces don't linger.
  pub async fn update(&self) {
    let snapshot: Vec<(Hash, Transaction)> = self
      .pending
      .iter()
      .map(|e| (*e.key(), e.value().tx.clone()))
      .collect();
    for (hash, tx) in snapshot {
      if !self.dapp.validate_transaction(&tx).await {
        self.remove(&hash);
      }
    }
  }

  /// Removes a single transaction, e.g. because it was included in a
  /// committed block. Idempotent.
  pub fn evict(&self, hash: &Hash) {
    self.remove(hash);
  }

  /// Evicts every transaction included in a just-committed block.
  pub fn evict_committed(&self, committed: &[Transaction]) {
    for tx in committed {
      self.remove(&tx.hash());
    }
  }

  fn remove(&self, hash: &Hash) {
    if let Some((_, entry)) = self.pending.remove(hash) {
      if let Some(mut count) = self.per_sender.get_mut(&entry.tx.data.sender) {
        *count = count.saturating_sub(1);
      }
    }
  }

  /// Returns up to `limit` pending transactions in FIFO admission
  /// order, then lets the dapp narrow/reorder the candidate set.
  pub async fn select(&self, limit: usize) -> Vec<Transaction> {
    let mut entries: Vec<(usize, Transaction)> = self
      .pending
      .iter()
      .map(|e| (e.value().seq, e.value().tx.clone()))
      .collect();
    entries.sort_by_key(|(seq, _)| *seq);
    let candidates: Vec<Transaction> = entries
      .into_iter()
      .take(limit)
      .map(|(_, tx)| tx)
      .collect();
    self.dapp.select_transactions(candidates).await
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::dapp::reference::InMemoryDapp;
  use crate::model::TransactionData;
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

  fn pool() -> TransactionPool<InMemoryDapp> {
    TransactionPool::new(Arc::new(InMemoryDapp::new()), PoolLimits::default())
  }

  #[tokio::test]
  async fn rejects_duplicate_transactions() {
    let pool = pool();
    let kp = keypair();
    let tx = Transaction::sign(
      TransactionData { sender: kp.address(), nonce: 0, payload: vec![] },
      &kp,
    );
    pool.add(tx.clone()).await.unwrap();
    assert!(matches!(pool.add(tx).await, Err(PoolError::Duplicate)));
  }

  #[tokio::test]
  async fn eviction_on_commit_removes_included_transactions() {
    let pool = pool();
    let kp = keypair();
    let tx = Transaction::sign(
      TransactionData { sender: kp.address(), nonce: 0, payload: vec![] },
      &kp,
    );
    pool.add(tx.clone()).await.unwrap();
    assert_eq!(pool.len(), 1);
    pool.evict_committed(&[tx]);
    assert_eq!(pool.len(), 0);
  }

  #[tokio::test]
  async fn select_respects_limit_and_fifo_order() {
    let pool = pool();
    let kp = keypair();
    for nonce in 0..5u64 {
      let tx = Transaction::sign(
        TransactionData {
          sender: kp.address(),
          nonce,
          payload: vec![nonce as u8],
        },
        &kp,
      );
      pool.add(tx).await.unwrap();
    }
    let selected = pool.select(3).await;
    assert_eq!(selected.len(), 3);
    assert_eq!(selected[0].data.nonce, 0);
    assert_eq!(selected[2].data.nonce, 2);
  }
}
