use crate::{
  model::{Block, BlockHeader},
  network::protocol::{GetBodies, GetHeaders},
  store::{BlockchainStore, StoreError},
};
use std::sync::Arc;

/// Serves read-only queries against the local store on behalf of
/// peers. Holds no state of its own beyond a store handle: identical
/// requests always get identical answers, and a crashed/restarted
/// responder loses nothing.
pub struct Responder<S: BlockchainStore> {
  store: Arc<S>,
}

impl<S: BlockchainStore> Responder<S> {
  pub fn new(store: Arc<S>) -> Self {
    Self { store }
  }

  pub fn get_consented_header(&self) -> Result<BlockHeader, StoreError> {
    self.store.header_of(self.store.height()?)
  }

  pub fn get_headers(
    &self,
    request: GetHeaders,
  ) -> Result<Vec<BlockHeader>, StoreError> {
    let tip = self.store.height()?;
    let end = request.to_height.min(tip);
    (request.from_height..=end).map(|h| self.store.header_of(h)).collect()
  }

  pub fn get_bodies(&self, request: GetBodies) -> Vec<Block> {
    request
      .heights
      .into_iter()
      .filter_map(|h| self.store.block_of(h).ok())
      .collect()
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::{model::Genesis, store::test_support::InMemoryStore};

  fn genesis() -> Genesis {
    Genesis {
      chain_id: "responder-test".into(),
      genesis_time: chrono::Utc::now(),
      propose_timeout: std::time::Duration::from_secs(1),
      prevote_timeout: std::time::Duration::from_secs(1),
      precommit_timeout: std::time::Duration::from_secs(1),
      validators: vec![],
      app_state_hash: crate::primitives::Hash::zero(),
    }
  }

  #[test]
  fn get_headers_clamps_to_current_tip() {
    let store = Arc::new(InMemoryStore::default());
    store.ready(&genesis()).unwrap();
    let responder = Responder::new(store);
    let headers = responder
      .get_headers(GetHeaders { from_height: 0, to_height: 100 })
      .unwrap();
    assert_eq!(headers.len(), 1);
  }
}
