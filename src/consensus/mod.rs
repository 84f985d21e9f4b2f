//! Tendermint-style round-based BFT consensus: a proposer is chosen
//! deterministically for each `(height, round)`, broadcasts a block,
//! and validators prevote/precommit their way to a quorum certificate
//! or time out and try the next round.

mod fault;
mod message;
mod schedule;
mod state;
mod timeout;
mod votekeeper;

pub use fault::Equivocation;
pub use message::{ConsensusMessage, Proposal};
pub use schedule::ProposerSchedule;
pub use state::{Action, ConsensusMachine, Event, RoundId, ScheduledTimeout, Step};
pub use timeout::{round_timeout, Clock, StepTimeouts, SystemClock};

#[cfg(any(test, feature = "test-util"))]
pub use timeout::VirtualClock;
