pub mod codec;
pub mod protocol;
pub mod swarm;

use crate::primitives::Address;
use libp2p::PeerId;
use protocol::PeerMessage;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

/// Events the network layer surfaces to whatever is driving the main
/// run loop (the node coordinator).
#[derive(Debug, Clone)]
pub enum NetworkEvent {
  PeerConnected(PeerId),
  PeerDisconnected(PeerId),
  Message { from: PeerId, message: PeerMessage },
}

/// Commands the node coordinator issues to the network layer.
#[derive(Debug, Clone)]
pub enum NetworkCommand {
  Gossip(PeerMessage),
  SendTo(PeerId, PeerMessage),
}

/// Decides whether a peer is allowed to stay connected. The concrete
/// policy here is "member of the current validator set", mirroring
/// how the gossip layer used to restrict its mesh to known validators
/// rather than accept arbitrary public-internet peers.
pub type PeerAuthorizer = Box<dyn Fn(&PeerId) -> bool + Send + Sync>;

pub fn validator_set_authorizer(addresses: Vec<Address>) -> PeerAuthorizer {
  Box::new(move |peer_id: &PeerId| addresses.iter().any(|a| a == peer_id))
}

/// Owns the libp2p swarm (gossipsub for `NewTransaction`/`NewBlock`/
/// `NewBlockHeight`/`NewConsensusMessage` fan-out, request-response
/// for the `Get*` query/reply pairs) on a dedicated background task,
/// communicating with the rest of the node over plain channels. This
/// keeps every other component free of any libp2p type in its public
/// API, the same separation the original gossip module drew between
/// its `Network` handle and the custom behaviour it drove.
pub struct Network {
  commands: UnboundedSender<NetworkCommand>,
  events: UnboundedReceiver<NetworkEvent>,
}

impl Network {
  /// Wraps an already-spawned swarm-driving task's channels. Actual
  /// transport/behaviour wiring (noise handshake, yamux multiplexing,
  /// gossipsub mesh parameters, the request-response protocol
  /// registration) lives in the node binary's startup code; this
  /// type's public surface is just the two channels, so unit tests can
  /// drive a fake network without a real swarm.
  pub fn new(
    commands: UnboundedSender<NetworkCommand>,
    events: UnboundedReceiver<NetworkEvent>,
  ) -> Self {
    Self { commands, events }
  }

  pub fn sender(&self) -> UnboundedSender<NetworkCommand> {
    self.commands.clone()
  }

  pub async fn next_event(&mut self) -> Option<NetworkEvent> {
    self.events.recv().await
  }

  pub fn gossip(&self, message: PeerMessage) {
    if self.commands.send(NetworkCommand::Gossip(message)).is_err() {
      warn!("network task has stopped; dropping gossip message");
    }
  }

  pub fn send_to(&self, peer: PeerId, message: PeerMessage) {
    if self
      .commands
      .send(NetworkCommand::SendTo(peer, message))
      .is_err()
    {
      warn!("network task has stopped; dropping directed message");
    }
  }
}

/// Builds the paired channels a [`Network`] and its driving swarm
/// task communicate over.
pub fn channel_pair() -> (
  UnboundedSender<NetworkEvent>,
  UnboundedReceiver<NetworkEvent>,
  UnboundedSender<NetworkCommand>,
  UnboundedReceiver<NetworkCommand>,
) {
  let (event_tx, event_rx) = unbounded_channel();
  let (command_tx, command_rx) = unbounded_channel();
  debug!("network channel pair created");
  (event_tx, event_rx, command_tx, command_rx)
}
