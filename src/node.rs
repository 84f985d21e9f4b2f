use crate::{
  consensus::{
    Action, ConsensusMachine, ConsensusMessage, Event, RoundId, ScheduledTimeout,
    StepTimeouts,
  },
  consumer::{BlockConsumers, Commitment},
  dapp::Dapp,
  executor::Executor,
  model::{Block, BlockBody, BlockHeader, Commit, Genesis, Transaction, TransactionList, ValidatorSet},
  network::{protocol::{Hello, PeerMessage}, Network, NetworkCommand, NetworkEvent},
  pool::{PoolError, PoolLimits, TransactionPool},
  primitives::{Hash, Keypair},
  responder::Responder,
  store::{BlockchainStore, StoreError},
  sync::{RemoteNodeSet, SyncError, Synchronizer},
};
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

/// Upper bound on how many pending transactions a proposal will pull
/// from the pool in one block, independent of the per-sender/overall
/// pool caps which bound admission, not selection.
const MAX_TRANSACTIONS_PER_BLOCK: usize = 4096;

/// How often the run loop checks whether it has fallen behind the
/// chain tip reported by peers and, if so, requests another batch.
const SYNC_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum NodeError {
  #[error("store error: {0}")]
  Store(#[from] StoreError),

  #[error("sync error: {0}")]
  Sync(#[from] SyncError),
}

/// A cheaply-clonable handle onto the parts of a running node that
/// external surfaces (the RPC service, CLI subcommands) need without
/// taking part in the consensus run loop itself.
#[derive(Clone)]
pub struct NodeHandle<S: BlockchainStore + 'static, D: Dapp + 'static> {
  store: Arc<S>,
  dapp: Arc<D>,
  pool: Arc<TransactionPool<D>>,
  commands: UnboundedSender<NetworkCommand>,
}

impl<S: BlockchainStore + 'static, D: Dapp + 'static> NodeHandle<S, D> {
  pub fn store(&self) -> &Arc<S> {
    &self.store
  }

  pub fn dapp(&self) -> &Arc<D> {
    &self.dapp
  }

  pub fn pool_len(&self) -> usize {
    self.pool.len()
  }

  /// Admits a transaction locally and gossips it, the same path a
  /// peer-submitted transaction takes.
  pub async fn submit_transaction(&self, tx: Transaction) -> Result<Hash, PoolError> {
    let hash = self.pool.add(tx.clone()).await?;
    if self
      .commands
      .send(NetworkCommand::Gossip(PeerMessage::NewTransaction(tx)))
      .is_err()
    {
      warn!("network task has stopped; transaction admitted but not gossiped");
    }
    Ok(hash)
  }
}

/// Wires the network, the transaction pool, the executor, the
/// consensus engine and the synchronizer together, and owns the main
/// event loop. The consensus engine itself never touches I/O; every
/// [`Action`] it returns is interpreted here and turned into a real
/// network send, a spawned timer, or a store/executor call.
pub struct Node<S: BlockchainStore + 'static, D: Dapp + 'static> {
  chain_id: String,
  genesis_hash: Hash,
  store: Arc<S>,
  dapp: Arc<D>,
  pool: Arc<TransactionPool<D>>,
  executor: Arc<Executor<S>>,
  consumers: Arc<BlockConsumers>,
  consensus: ConsensusMachine,
  validators: ValidatorSet,
  pending_commit: Option<Commit>,
  network: Network,
  responder: Responder<S>,
  sync: Arc<Synchronizer<S>>,
  peers: Arc<RemoteNodeSet>,
  timeouts: UnboundedSender<Event>,
  timeout_events: UnboundedReceiver<Event>,
}

impl<S: BlockchainStore + 'static, D: Dapp + 'static> Node<S, D> {
  pub async fn new(
    genesis: &Genesis,
    keypair: Option<Keypair>,
    store: Arc<S>,
    dapp: Arc<D>,
    consumers: Arc<BlockConsumers>,
    network: Network,
    step_timeouts: StepTimeouts,
    timeout_cap: Duration,
    pool_limits: PoolLimits,
  ) -> Result<Self, NodeError> {
    store.ready(genesis)?;
    let height = store.height()?;
    let parent_header = store.header_of(height)?;
    let validators = genesis.validator_set();

    let pool = Arc::new(TransactionPool::new(Arc::clone(&dapp), pool_limits));
    let executor = Arc::new(Executor::new(
      Arc::clone(&store),
      Arc::clone(&dapp),
      Arc::clone(&consumers),
      height,
    ));
    let peers = Arc::new(RemoteNodeSet::new());
    let sync = Arc::new(Synchronizer::new(
      Arc::clone(&store),
      Arc::clone(&executor),
      Arc::clone(&peers),
      network.sender(),
    ));
    let responder = Responder::new(Arc::clone(&store));

    let (consensus, initial_actions) = ConsensusMachine::new(
      keypair,
      validators.clone(),
      parent_header,
      step_timeouts,
      timeout_cap,
    );
    let (timeouts, timeout_events) = unbounded_channel();

    let mut node = Self {
      chain_id: genesis.chain_id.clone(),
      genesis_hash: genesis.hash(),
      store,
      dapp,
      pool,
      executor,
      consumers,
      consensus,
      validators,
      pending_commit: None,
      network,
      responder,
      sync,
      peers,
      timeouts,
      timeout_events,
    };
    node.handle_actions(initial_actions).await;
    Ok(node)
  }

  pub fn handle(&self) -> NodeHandle<S, D> {
    NodeHandle {
      store: Arc::clone(&self.store),
      dapp: Arc::clone(&self.dapp),
      pool: Arc::clone(&self.pool),
      commands: self.network.sender(),
    }
  }

  /// Drives the node forever: demultiplexing network events, firing
  /// consensus timeouts, and periodically checking whether the node
  /// has fallen behind the chain tip and needs to catch up.
  pub async fn run(mut self) {
    let mut sync_poll = tokio::time::interval(SYNC_POLL_INTERVAL);
    loop {
      tokio::select! {
        event = self.network.next_event() => {
          match event {
            Some(event) => self.on_network_event(event).await,
            None => {
              warn!("network event channel closed, stopping node");
              return;
            }
          }
        }
        Some(event) = self.timeout_events.recv() => {
          let actions = self.consensus.step(event);
          self.handle_actions(actions).await;
        }
        _ = sync_poll.tick() => self.poll_sync().await,
      }
    }
  }

  async fn poll_sync(&self) {
    match self.sync.is_behind() {
      Ok(true) => {
        if let Err(err) = self.sync.fetch_batch().await {
          debug!(%err, "sync fetch attempt did not complete");
        }
      }
      Ok(false) => {}
      Err(err) => warn!(%err, "failed to check sync status"),
    }
  }

  async fn on_network_event(&mut self, event: NetworkEvent) {
    match event {
      NetworkEvent::PeerConnected(peer) => {
        let hello = Hello {
          chain_id: self.chain_id.clone(),
          genesis_hash: self.genesis_hash,
          height: self.store.height().unwrap_or(0),
        };
        self.network.send_to(peer, PeerMessage::Hello(hello));
      }
      NetworkEvent::PeerDisconnected(peer) => {
        self.peers.remove(&peer);
      }
      NetworkEvent::Message { from, message } => self.on_peer_message(from, message).await,
    }
  }

  async fn on_peer_message(&mut self, from: libp2p::PeerId, message: PeerMessage) {
    match message {
      PeerMessage::Hello(hello) => {
        if hello.chain_id != self.chain_id || hello.genesis_hash != self.genesis_hash {
          warn!(peer = %from, their_chain = %hello.chain_id, "peer is on a foreign chain, ignoring");
          return;
        }
        self.sync.new_block_height(from, hello.height);
      }
      PeerMessage::NewTransaction(tx) => match self.pool.add(tx).await {
        Ok(hash) => debug!(%hash, peer = %from, "admitted transaction from peer"),
        Err(err) => debug!(%err, peer = %from, "rejected transaction from peer"),
      },
      PeerMessage::NewBlockHeight(height) => self.sync.new_block_height(from, height),
      PeerMessage::NewBlock(block) => self.adopt_gossiped_block(block).await,
      PeerMessage::NewConsensusMessage(msg) => {
        let actions = self.consensus.step(consensus_event(msg));
        self.handle_actions(actions).await;
      }
      PeerMessage::GetConsentedHeader => match self.responder.get_consented_header() {
        Ok(header) => self.network.send_to(from, PeerMessage::ConsentedHeader(header)),
        Err(err) => debug!(%err, "could not answer GetConsentedHeader"),
      },
      PeerMessage::ConsentedHeader(header) => {
        self.sync.new_block_height(from, header.height);
      }
      PeerMessage::GetHeaders(request) => match self.responder.get_headers(request) {
        Ok(headers) => self.network.send_to(from, PeerMessage::Headers(headers)),
        Err(err) => debug!(%err, "could not answer GetHeaders"),
      },
      PeerMessage::Headers(headers) => {
        debug!(count = headers.len(), peer = %from, "received headers");
      }
      PeerMessage::GetBodies(request) => {
        let bodies = self.responder.get_bodies(request);
        self.network.send_to(from, PeerMessage::Bodies(bodies));
      }
      PeerMessage::Bodies(blocks) => self.adopt_synced_blocks(blocks).await,
    }
  }

  /// A block gossiped as freshly decided elsewhere. If it extends our
  /// tip and is properly certified, adopt it the same way a
  /// synchronizer fetch would; otherwise it's either stale or the
  /// consensus engine will reach the same decision on its own.
  async fn adopt_gossiped_block(&mut self, block: Block) {
    self.adopt_synced_blocks(vec![block]).await;
  }

  async fn adopt_synced_blocks(&mut self, mut blocks: Vec<Block>) {
    blocks.sort_by_key(|b| b.header.height);
    for block in blocks {
      let expected = match self.store.height() {
        Ok(h) => h + 1,
        Err(err) => {
          warn!(%err, "could not read store height while adopting synced block");
          return;
        }
      };
      if block.header.height != expected {
        continue;
      }
      let parent = match self.store.header_of(expected - 1) {
        Ok(h) => h,
        Err(err) => {
          warn!(%err, "missing parent header while adopting synced block");
          return;
        }
      };
      if block.validate_against_parent(&parent).is_err()
        || block.validate_commit(&self.validators).is_err()
      {
        warn!(height = block.header.height, "synced block failed validation, discarding");
        continue;
      }
      if let Err(err) = self.sync.ingest(block.clone()) {
        warn!(%err, "failed to ingest synced block");
        return;
      }
      self.pool.evict_committed(block.body.transactions.as_slice());
      self.pool.update().await;
      self.consumers_notify_committed(&block);
      self.resync_consensus_to(&block).await;
    }
  }

  fn consumers_notify_committed(&self, block: &Block) {
    if self
      .consumers
      .consume(Arc::new(block.clone()), Commitment::Committed)
      .is_err()
    {
      warn!("block consumer channel closed");
    }
  }

  /// After catching up via the synchronizer, the consensus engine (if
  /// it was mid-round for a height we've just skipped past) needs to
  /// be reset onto the new tip.
  async fn resync_consensus_to(&mut self, block: &Block) {
    if block.header.height < self.consensus.round_id().height {
      return;
    }
    if let Some(vs) = &block.body.next_validator_set {
      self.validators = vs.clone();
    }
    self.pending_commit = block.body.last_block_consensus.clone();
    let actions = self
      .consensus
      .advance_height(block.header.clone(), self.validators.clone());
    self.handle_actions(actions).await;
  }

  /// Interprets a batch of consensus actions, possibly queuing more
  /// actions produced along the way (e.g. assembling and submitting a
  /// proposal in response to `RequestProposal`), draining the whole
  /// queue before returning.
  async fn handle_actions(&mut self, actions: Vec<Action>) {
    let mut queue = actions;
    while let Some(action) = queue.pop() {
      match action {
        Action::Broadcast(msg) => {
          self
            .network
            .gossip(PeerMessage::NewConsensusMessage(msg));
        }
        Action::ScheduleTimeout(scheduled) => self.spawn_timeout(scheduled),
        Action::RequestProposal(round_id) => {
          let block = self.assemble_block(round_id).await;
          queue.extend(self.consensus.propose(block));
        }
        Action::Decide { block, commit } => {
          queue.extend(self.finalize_decision(block, commit).await);
        }
        Action::ReportFault(equivocation) => {
          warn!(?equivocation, "equivocation detected, evidence not yet submitted on-chain");
        }
      }
    }
  }

  fn spawn_timeout(&self, scheduled: ScheduledTimeout) {
    let timeouts = self.timeouts.clone();
    tokio::spawn(async move {
      tokio::time::sleep(scheduled.duration).await;
      let _ = timeouts.send(Event::TimeoutElapsed {
        round_id: scheduled.round_id,
        step: scheduled.step,
      });
    });
  }

  async fn assemble_block(&self, round_id: RoundId) -> Block {
    let parent = self
      .store
      .header_of(round_id.height - 1)
      .expect("a proposer always has its parent's header");
    let transactions = self.pool.select(MAX_TRANSACTIONS_PER_BLOCK).await;
    let transaction_list = TransactionList::new(transactions);
    let commit = self.pending_commit.clone();
    let last_block_consensus_root = match &commit {
      Some(c) => Hash::of(&bincode::serialize(c).expect("commit always serializes")),
      None => Hash::zero(),
    };
    let header = BlockHeader {
      height: round_id.height,
      timestamp: chrono::Utc::now().timestamp(),
      last_block_hash: parent.hash(),
      transaction_root: transaction_list.root(),
      last_block_consensus_root,
      next_validator_set_root: Hash::zero(),
      app_state_hash: self.dapp.app_state_hash().await,
    };
    Block {
      header,
      body: BlockBody {
        transactions: transaction_list,
        last_block_consensus: commit,
        next_validator_set: None,
      },
    }
  }

  async fn finalize_decision(&mut self, block: Block, commit: Commit) -> Vec<Action> {
    if let Err(err) = self.store.put(block.clone()) {
      warn!(%err, height = block.header.height, "failed to persist decided block");
      return vec![];
    }
    if let Err(err) = self.executor.enqueue(block.clone()) {
      warn!(%err, "failed to enqueue decided block for execution");
    }
    self.pool.evict_committed(block.body.transactions.as_slice());
    self.pool.update().await;
    self.consumers_notify_committed(&block);

    if let Some(next_validators) = block.body.next_validator_set.clone() {
      self.validators = next_validators;
    }
    self.pending_commit = Some(commit);
    self
      .consensus
      .advance_height(block.header.clone(), self.validators.clone())
  }
}

fn consensus_event(message: ConsensusMessage) -> Event {
  match message {
    ConsensusMessage::Proposal(p) => Event::Proposal(p),
    ConsensusMessage::Vote(v) => Event::Vote(v),
  }
}
