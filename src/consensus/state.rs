use crate::{
  consensus::{
    fault::Equivocation,
    message::{ConsensusMessage, Proposal},
    schedule::ProposerSchedule,
    timeout::{round_timeout, StepTimeouts},
    votekeeper::{Admit, VoteKeeper},
  },
  model::{Block, BlockHeader, Commit, Validator, ValidatorSet, Vote, VoteType},
  primitives::{Address, Hash, Keypair},
};
use std::{collections::HashMap, time::Duration};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
  Propose,
  Prevote,
  Precommit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundId {
  pub height: u64,
  pub round: u32,
}

/// A driver-visible request to schedule a wakeup. The driver is free
/// to implement this with a real timer or, in tests, simply call
/// `step` with `Event::TimeoutElapsed` whenever it likes; the machine
/// ignores timeouts that no longer match its current height/round/step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledTimeout {
  pub round_id: RoundId,
  pub step: Step,
  pub duration: Duration,
}

pub enum Event {
  /// A proposal or vote arrived from the network (or from ourselves,
  /// for the `propose` path).
  Proposal(Proposal),
  Vote(Vote),
  TimeoutElapsed { round_id: RoundId, step: Step },
}

pub enum Action {
  Broadcast(ConsensusMessage),
  ScheduleTimeout(ScheduledTimeout),
  /// This node is the proposer for `round_id` and has no cached value
  /// to re-propose: the driver must assemble a block (from the pool
  /// and the dapp) and call [`ConsensusMachine::propose`].
  RequestProposal(RoundId),
  /// `height`'s block has been decided. `commit` proves it; the
  /// driver persists `block`, runs it through the executor, and once
  /// the next height's parent header and validator set are known,
  /// calls [`ConsensusMachine::advance_height`].
  Decide { block: Block, commit: Commit },
  ReportFault(Equivocation),
}

struct RoundState {
  round_id: RoundId,
  step: Step,
  locked_value: Option<Block>,
  locked_round: Option<u32>,
  valid_value: Option<Block>,
  valid_round: Option<u32>,
}

/// The consensus round state machine for one validator, as a pure
/// `step(event) -> Vec<Action>` function plus the handful of
/// driver-initiated transitions (`propose`, `advance_height`) that
/// can't be triggered by an inbound message alone. Holds no I/O
/// handles of its own, so it is unit-testable with a virtual clock
/// and hand-fed events.
pub struct ConsensusMachine {
  keypair: Option<Keypair>,
  validators: ValidatorSet,
  parent_header: BlockHeader,
  step_timeouts: StepTimeouts,
  timeout_cap: Duration,
  state: RoundState,
  votes: HashMap<u32, VoteKeeper>,
  proposals: HashMap<u32, Proposal>,
  decided: bool,
}

impl ConsensusMachine {
  pub fn new(
    keypair: Option<Keypair>,
    validators: ValidatorSet,
    parent_header: BlockHeader,
    step_timeouts: StepTimeouts,
    timeout_cap: Duration,
  ) -> (Self, Vec<Action>) {
    let round_id = RoundId { height: parent_header.height + 1, round: 0 };
    let mut machine = Self {
      keypair,
      validators,
      parent_header,
      step_timeouts,
      timeout_cap,
      state: RoundState {
        round_id,
        step: Step::Propose,
        locked_value: None,
        locked_round: None,
        valid_value: None,
        valid_round: None,
      },
      votes: HashMap::new(),
      proposals: HashMap::new(),
      decided: false,
    };
    let actions = machine.enter_round(round_id);
    (machine, actions)
  }

  pub fn round_id(&self) -> RoundId {
    self.state.round_id
  }

  fn proposer(&self, round_id: RoundId) -> &Validator {
    let schedule = ProposerSchedule::new(&self.validators);
    let hash = self.validators.hash();
    schedule.proposer_for(&hash, round_id.height, round_id.round)
  }

  fn is_proposer(&self, round_id: RoundId) -> bool {
    match &self.keypair {
      Some(kp) => self.proposer(round_id).address == kp.address(),
      None => false,
    }
  }

  fn power_of(&self, addr: &Address) -> u64 {
    self.validators.power_of(addr).unwrap_or(0)
  }

  fn has_quorum(&self, power: u64) -> bool {
    self.validators.has_quorum(power)
  }

  fn schedule(&self, step: Step) -> Action {
    let base = match step {
      Step::Propose => self.step_timeouts.propose,
      Step::Prevote => self.step_timeouts.prevote,
      Step::Precommit => self.step_timeouts.precommit,
    };
    Action::ScheduleTimeout(ScheduledTimeout {
      round_id: self.state.round_id,
      step,
      duration: round_timeout(base, self.state.round_id.round, self.timeout_cap),
    })
  }

  /// Enters round `round_id.round` at the current height fresh: resets
  /// per-round proposal/step bookkeeping (vote tallies persist across
  /// rounds within a height, since Tendermint's safety rules reference
  /// prior rounds' quorums).
  fn enter_round(&mut self, round_id: RoundId) -> Vec<Action> {
    self.state.round_id = round_id;
    self.state.step = Step::Propose;
    self.votes.entry(round_id.round).or_default();

    if !self.is_proposer(round_id) {
      return vec![self.schedule(Step::Propose)];
    }

    if let Some(valid_block) = self.state.valid_value.clone() {
      let proposal = Proposal::new(
        self.keypair.as_ref().expect("proposer always has a keypair"),
        round_id.height,
        round_id.round,
        valid_block,
        self.state.valid_round,
      );
      self.accept_own_proposal(proposal)
    } else {
      vec![self.schedule(Step::Propose), Action::RequestProposal(round_id)]
    }
  }

  /// Called by the driver once it has assembled the block this node
  /// should propose, in response to `Action::RequestProposal`.
  pub fn propose(&mut self, block: Block) -> Vec<Action> {
    let round_id = self.state.round_id;
    let proposal = Proposal::new(
      self.keypair.as_ref().expect("propose called without a keypair"),
      round_id.height,
      round_id.round,
      block,
      None,
    );
    self.accept_own_proposal(proposal)
  }

  fn accept_own_proposal(&mut self, proposal: Proposal) -> Vec<Action> {
    let mut actions = vec![Action::Broadcast(ConsensusMessage::Proposal(
      proposal.clone(),
    ))];
    actions.extend(self.on_proposal(proposal));
    actions
  }

  pub fn step(&mut self, event: Event) -> Vec<Action> {
    match event {
      Event::Proposal(p) => self.on_proposal(p),
      Event::Vote(v) => self.on_vote(v),
      Event::TimeoutElapsed { round_id, step } => {
        self.on_timeout(round_id, step)
      }
    }
  }

  fn on_proposal(&mut self, proposal: Proposal) -> Vec<Action> {
    if self.decided || proposal.height != self.state.round_id.height {
      return vec![];
    }
    if proposal.round != self.state.round_id.round {
      // Out-of-round proposals are buffered implicitly by keeping the
      // map; they're consulted later if/when we reach that round.
      self.proposals.insert(proposal.round, proposal);
      return vec![];
    }
    if proposal.verify_signature().is_err() {
      return vec![];
    }
    if proposal.proposer != self.proposer(self.state.round_id).address {
      return vec![];
    }
    self.proposals.insert(proposal.round, proposal.clone());

    if self.state.step != Step::Propose {
      return vec![];
    }

    let valid_structurally =
      proposal.block.validate_against_parent(&self.parent_header).is_ok();

    let can_vote_for_it = valid_structurally
      && match self.state.locked_round {
        None => true,
        Some(locked_round) => {
          self.state.locked_value.as_ref().map(|b| b.hash())
            == Some(proposal.block.hash())
            || proposal
              .pol_round
              .map(|pol| pol >= locked_round)
              .unwrap_or(false)
      }
      };

    let vote_target = if can_vote_for_it {
      Some(proposal.block.hash())
    } else {
      None
    };

    self.enter_step(Step::Prevote, vote_target)
  }

  fn enter_step(&mut self, step: Step, prevote_target: Option<Hash>) -> Vec<Action> {
    self.state.step = step;
    let mut actions = vec![self.schedule(step)];
    if step == Step::Prevote {
      if let Some(kp) = &self.keypair {
        let vote = Vote::new(
          kp,
          VoteType::Prevote,
          self.state.round_id.height,
          self.state.round_id.round,
          prevote_target,
        );
        actions.push(Action::Broadcast(ConsensusMessage::Vote(vote.clone())));
        actions.extend(self.on_vote(vote));
      }
    }
    actions
  }

  fn on_vote(&mut self, vote: Vote) -> Vec<Action> {
    if self.decided || vote.height != self.state.round_id.height {
      return vec![];
    }
    if vote.verify_signature().is_err() || !self.validators.contains(&vote.validator)
    {
      return vec![];
    }

    let round = vote.round;
    let keeper = self.votes.entry(round).or_default();
    let admit = keeper.add(vote.clone());
    let mut actions = match admit {
      Admit::Equivocation(e) => return vec![Action::ReportFault(e)],
      Admit::AlreadySeen => return vec![],
      Admit::Added => vec![],
    };

    // Round-skip: if a higher round already has more than a third of
    // voting power behind it, we're lagging; jump there so we don't
    // stall waiting on a round quorum that already moved on.
    if round > self.state.round_id.round {
      let power = self.votes[&round]
        .voted_power(VoteType::Prevote, &|a| self.power_of(a))
        + self.votes[&round]
          .voted_power(VoteType::Precommit, &|a| self.power_of(a));
      if power * 3 > self.validators.total_power() {
        actions.extend(
          self.enter_round(RoundId { height: self.state.round_id.height, round }),
        );
        return actions;
      }
      return actions;
    }

    if round != self.state.round_id.round {
      return actions;
    }

    match vote.vote_type {
      VoteType::Prevote => {
        if self.state.step != Step::Prevote {
          return actions;
        }
        let quorum = self.votes[&round].quorum(
          VoteType::Prevote,
          &|p| self.has_quorum(p),
          &|a| self.power_of(a),
        );
        match quorum {
          Some(Some(hash)) => {
            if let Some(proposal) = self.proposals.get(&round).cloned() {
              if proposal.block.hash() == hash {
                self.state.locked_value = Some(proposal.block.clone());
                self.state.locked_round = Some(round);
                self.state.valid_value = Some(proposal.block.clone());
                self.state.valid_round = Some(round);
                actions.extend(self.precommit(Some(hash)));
              }
            }
          }
          Some(None) => actions.extend(self.precommit(None)),
          None => {}
        }
      }
      VoteType::Precommit => {
        if self.state.step != Step::Precommit {
          return actions;
        }
        let quorum = self.votes[&round].quorum(
          VoteType::Precommit,
          &|p| self.has_quorum(p),
          &|a| self.power_of(a),
        );
        match quorum {
          Some(Some(hash)) => {
            if let Some(proposal) = self.proposals.get(&round).cloned() {
              if proposal.block.hash() == hash {
                let signatures = self.votes[&round]
                  .votes_for(VoteType::Precommit, hash)
                  .into_iter()
                  .map(|v| (v.validator, v.signature))
                  .collect();
                self.decided = true;
                actions.push(Action::Decide {
                  block: proposal.block,
                  commit: Commit { height: self.state.round_id.height, round, block_hash: hash, signatures },
                });
              }
            }
          }
          Some(None) => {
            actions.extend(self.enter_round(RoundId {
              height: self.state.round_id.height,
              round: round + 1,
            }));
          }
          None => {}
        }
      }
    }

    actions
  }

  fn precommit(&mut self, target: Option<Hash>) -> Vec<Action> {
    self.state.step = Step::Precommit;
    let mut actions = vec![self.schedule(Step::Precommit)];
    if let Some(kp) = &self.keypair {
      let vote = Vote::new(
        kp,
        VoteType::Precommit,
        self.state.round_id.height,
        self.state.round_id.round,
        target,
      );
      actions.push(Action::Broadcast(ConsensusMessage::Vote(vote.clone())));
      actions.extend(self.on_vote(vote));
    }
    actions
  }

  fn on_timeout(&mut self, round_id: RoundId, step: Step) -> Vec<Action> {
    if self.decided
      || round_id != self.state.round_id
      || step != self.state.step
    {
      return vec![];
    }
    match step {
      Step::Propose => self.enter_step(Step::Prevote, None),
      Step::Prevote => self.precommit(None),
      Step::Precommit => {
        self.enter_round(RoundId { height: round_id.height, round: round_id.round + 1 })
      }
    }
  }

  /// Resets the machine for the next height after `Action::Decide`'s
  /// block has been committed and (if applicable) its validator-set
  /// change has taken effect.
  pub fn advance_height(
    &mut self,
    parent_header: BlockHeader,
    validators: ValidatorSet,
  ) -> Vec<Action> {
    self.parent_header = parent_header;
    self.validators = validators;
    self.votes.clear();
    self.proposals.clear();
    self.decided = false;
    self.state.locked_value = None;
    self.state.locked_round = None;
    self.state.valid_value = None;
    self.state.valid_round = None;
    let round_id =
      RoundId { height: self.parent_header.height + 1, round: 0 };
    self.enter_round(round_id)
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::model::{BlockBody, TransactionList};

  fn keypair(byte: u8) -> Keypair {
    let mut bytes = [0u8; 32];
    for (i, b) in bytes.iter_mut().enumerate() {
      *b = byte.wrapping_add(i as u8).wrapping_mul(17).wrapping_add(3);
    }
    Keypair::try_from(&bytes[..]).unwrap()
  }

  fn genesis_header() -> BlockHeader {
    BlockHeader {
      height: 0,
      timestamp: 0,
      last_block_hash: Hash::zero(),
      transaction_root: TransactionList::default().root(),
      last_block_consensus_root: Hash::zero(),
      next_validator_set_root: Hash::zero(),
      app_state_hash: Hash::zero(),
    }
  }

  fn block_for(parent: &BlockHeader, proposer_bump: u8) -> Block {
    Block {
      header: BlockHeader {
        height: parent.height + 1,
        timestamp: parent.timestamp + 1 + proposer_bump as i64,
        last_block_hash: parent.hash(),
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

  fn validator_set(keys: &[Keypair]) -> ValidatorSet {
    ValidatorSet::new(
      keys
        .iter()
        .map(|k| Validator { address: k.address(), voting_power: 10 })
        .collect(),
    )
  }

  /// Drives a 4-validator network to a single decision by manually
  /// routing every Action::Broadcast to every machine's step(), the
  /// way a real network would, minus the network.
  #[test]
  fn four_validators_commit_height_one_without_timeouts() {
    let keys: Vec<Keypair> = (0..4).map(keypair).collect();
    let validators = validator_set(&keys);
    let genesis = genesis_header();

    let mut machines: Vec<ConsensusMachine> = vec![];
    let mut pending_actions: Vec<Vec<Action>> = vec![];
    for kp in &keys {
      let (m, actions) = ConsensusMachine::new(
        Some(kp.clone()),
        validators.clone(),
        genesis.clone(),
        StepTimeouts {
          propose: Duration::from_millis(100),
          prevote: Duration::from_millis(100),
          precommit: Duration::from_millis(100),
        },
        Duration::from_secs(5),
      );
      machines.push(m);
      pending_actions.push(actions);
    }

    let mut broadcasts: Vec<ConsensusMessage> = vec![];
    let mut proposal_requests: Vec<usize> = vec![];
    for (i, actions) in pending_actions.drain(..).enumerate() {
      for action in actions {
        match action {
          Action::Broadcast(msg) => broadcasts.push(msg),
          Action::RequestProposal(_) => proposal_requests.push(i),
          _ => {}
        }
      }
    }

    for i in proposal_requests {
      let block = block_for(&genesis, i as u8);
      for action in machines[i].propose(block) {
        if let Action::Broadcast(msg) = action {
          broadcasts.push(msg);
        }
      }
    }

    let mut decided = vec![false; machines.len()];
    let mut guard = 0;
    while !decided.iter().all(|d| *d) && guard < 20 {
      guard += 1;
      let round = std::mem::take(&mut broadcasts);
      for msg in round {
        for (i, machine) in machines.iter_mut().enumerate() {
          if decided[i] {
            continue;
          }
          let event = match msg.clone() {
            ConsensusMessage::Proposal(p) => Event::Proposal(p),
            ConsensusMessage::Vote(v) => Event::Vote(v),
          };
          for action in machine.step(event) {
            match action {
              Action::Broadcast(m) => broadcasts.push(m),
              Action::Decide { .. } => decided[i] = true,
              _ => {}
            }
          }
        }
      }
    }

    assert!(decided.iter().all(|d| *d), "all validators should decide");
  }

  #[test]
  fn propose_timeout_moves_to_nil_prevote() {
    let keys: Vec<Keypair> = (0..4).map(keypair).collect();
    let validators = validator_set(&keys);
    let genesis = genesis_header();

    // find a non-proposer for round 0.
    let (mut observer, actions) = ConsensusMachine::new(
      Some(keys[0].clone()),
      validators.clone(),
      genesis.clone(),
      StepTimeouts {
        propose: Duration::from_millis(50),
        prevote: Duration::from_millis(50),
        precommit: Duration::from_millis(50),
      },
      Duration::from_secs(5),
    );
    let is_proposer = actions
      .iter()
      .any(|a| matches!(a, Action::RequestProposal(_)));
    if is_proposer {
      // this key happened to be the proposer; the test only cares
      // about exercising the non-proposer timeout path, which some
      // other validator always takes.
      return;
    }
    let round_id = observer.round_id();
    let actions = observer.step(Event::TimeoutElapsed {
      round_id,
      step: Step::Propose,
    });
    assert!(actions
      .iter()
      .any(|a| matches!(a, Action::Broadcast(ConsensusMessage::Vote(v)) if v.is_nil())));
  }
}
