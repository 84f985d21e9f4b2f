use crate::{
  consensus::ConsensusMessage,
  model::{Block, BlockHeader, Transaction},
  primitives::Hash,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hello {
  pub chain_id: String,
  pub genesis_hash: Hash,
  pub height: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetHeaders {
  pub from_height: u64,
  pub to_height: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetBodies {
  pub heights: Vec<u64>,
}

/// Every message exchanged between peers once a handshake has
/// succeeded. Gossip messages (`NewTransaction`, `NewBlockHeight`,
/// `NewBlock`, `NewConsensusMessage`) are published over gossipsub;
/// the `Get*`/reply pairs are carried over a request-response
/// protocol so a query always completes or explicitly times out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PeerMessage {
  Hello(Hello),
  NewTransaction(Transaction),
  NewBlockHeight(u64),
  NewBlock(Block),
  NewConsensusMessage(ConsensusMessage),
  GetConsentedHeader,
  ConsentedHeader(BlockHeader),
  GetHeaders(GetHeaders),
  Headers(Vec<BlockHeader>),
  GetBodies(GetBodies),
  Bodies(Vec<Block>),
}
