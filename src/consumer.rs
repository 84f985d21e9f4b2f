use crate::model::Block;
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc::{error::SendError, unbounded_channel, UnboundedSender};

/// Stage at which a block is handed to a consumer. Because this
/// engine has instant finality (a commit certificate IS finality),
/// there is only one consensus-level stage; `Executed` marks that the
/// executor has additionally applied the block to application state.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Commitment {
  Committed,
  Executed,
}

/// Implemented by anything that wants to observe committed/executed
/// blocks as they happen: RPC, external database sync, metrics.
#[async_trait]
pub trait BlockConsumer: Sync + Send {
  async fn consume(&self, block: Arc<Block>, commitment: Commitment);
}

/// Fans a single stream of (block, commitment) events out to many
/// consumers without letting a slow consumer stall the others or the
/// executor that produced the event.
pub struct BlockConsumers {
  sender: UnboundedSender<(Arc<Block>, Commitment)>,
}

impl BlockConsumers {
  pub fn new(consumers: Vec<Arc<dyn BlockConsumer>>) -> Self {
    let (sender, mut receiver) =
      unbounded_channel::<(Arc<Block>, Commitment)>();
    tokio::spawn(async move {
      while let Some((b, c)) = receiver.recv().await {
        join_all(consumers.iter().map(|consumer| {
          let block = Arc::clone(&b);
          let consumer = Arc::clone(consumer);
          tokio::spawn(async move {
            consumer.consume(block, c).await;
          })
        }))
        .await;
      }
    });

    Self { sender }
  }

  pub fn consume(
    &self,
    block: Arc<Block>,
    commitment: Commitment,
  ) -> Result<(), SendError<(Arc<Block>, Commitment)>> {
    self.sender.send((block, commitment))
  }
}
