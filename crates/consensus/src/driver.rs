use quorum_network::Outbound;
use quorum_types::{
    BallotBody, Block, ConsensusError, Height, Proposal, ProposalBody, Result, Round, Stage,
    VoteResult,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::ballotbox::Ballotbox;
use crate::checker::{check_vote_result, ResultPosition};
use crate::components::Components;
use crate::state::HandlerEvent;
use crate::timer::{TimerId, TimerManager};

/// What the handler should do after the driver reacted to an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverOutcome {
    Ignored,
    Progressed,
    Finalized(Block),
    NeedsSync,
}

/// Moves one height through INIT, SIGN and ACCEPT.
///
/// Joining and Consensus share one driver so the round a node joined keeps
/// its bookkeeping when the node switches state. Timers post into whichever
/// handler queue is attached.
pub struct RoundDriver {
    parts: Components,
    timers: Option<TimerManager<HandlerEvent>>,
    last_majority: Option<(Height, Round, Stage)>,
    opened: Option<(Height, Round)>,
    proposed: Option<(Height, Round)>,
    signed: Option<(Height, Round)>,
}

impl RoundDriver {
    pub fn new(parts: Components) -> Self {
        Self {
            parts,
            timers: None,
            last_majority: None,
            opened: None,
            proposed: None,
            signed: None,
        }
    }

    pub fn parts(&self) -> &Components {
        &self.parts
    }

    /// Routes timers into `sender` until [`RoundDriver::detach`].
    pub fn attach(&mut self, sender: mpsc::UnboundedSender<HandlerEvent>) {
        self.detach();
        self.timers = Some(TimerManager::new(sender));
    }

    pub fn detach(&mut self) {
        if let Some(mut timers) = self.timers.take() {
            timers.cancel_all();
        }
    }

    pub fn set_timer(&mut self, id: TimerId, duration: Duration, height: Height, round: Round) {
        match self.timers.as_mut() {
            Some(timers) => timers.set_timer(id, duration, HandlerEvent::Timeout { id, height, round }),
            None => debug!(?id, "No handler attached; timer not set"),
        }
    }

    pub fn cancel_timer(&mut self, id: TimerId) {
        if let Some(timers) = self.timers.as_mut() {
            timers.cancel_timer(id);
        }
    }

    pub fn is_open(&self, height: Height, round: Round) -> bool {
        self.opened == Some((height, round))
    }

    pub async fn broadcast_init(&self) -> Result<()> {
        let home = self.parts.home.view().await;
        self.send_init(home.height, home.round, home.current_block).await
    }

    pub async fn restart_round_timer(&mut self) {
        let home = self.parts.home.view().await;
        let timeout = self.parts.ctx.policy.round_timeout;
        self.set_timer(TimerId::Round, timeout, home.height, home.round);
    }

    pub async fn on_vote_result(&mut self, result: &VoteResult) -> Result<DriverOutcome> {
        let home = self.parts.home.view().await;
        match check_vote_result(&home, result) {
            ResultPosition::Current => {}
            ResultPosition::Previous | ResultPosition::Ignored => return Ok(DriverOutcome::Ignored),
            ResultPosition::OutOfWindow => {
                warn!(
                    node = %self.parts.ctx.address,
                    "{} is out of window for height {}", result, home.height
                );
                return Ok(DriverOutcome::NeedsSync);
            }
        }

        // results only move forward within a height
        if let Some((height, round, stage)) = self.last_majority {
            if height == result.height && (round, stage) >= result.position() {
                let e = ConsensusError::StaleVoteResult {
                    height: result.height,
                    round: result.round,
                    stage: result.stage,
                };
                debug!("Ignoring {}", e);
                return Ok(DriverOutcome::Ignored);
            }
        }
        self.last_majority = Some((result.height, result.round, result.stage));

        if result.is_draw() {
            self.new_round(result.round.next(), "draw").await?;
            return Ok(DriverOutcome::Progressed);
        }

        match result.stage {
            Stage::Init => self.on_init_majority(result).await,
            Stage::Sign => self.on_sign_majority(result).await,
            Stage::Accept => self.on_accept_majority(result).await,
        }
    }

    pub async fn on_proposal(&mut self, proposal: &Proposal) -> Result<DriverOutcome> {
        if !self.is_open(proposal.body.height, proposal.body.round) {
            debug!("Pooled {} until its round opens", proposal.body);
            return Ok(DriverOutcome::Ignored);
        }
        self.sign(proposal).await
    }

    /// Starts the next round if the timer still matches the node's position.
    pub async fn on_timeout(&mut self, height: Height, round: Round) -> Result<DriverOutcome> {
        let home = self.parts.home.view().await;
        if home.height != height || home.round != round {
            debug!("Stale round timer for height={} round={}", height, round);
            return Ok(DriverOutcome::Ignored);
        }
        if self.peers_ahead(height).await {
            info!(node = %self.parts.ctx.address, height = %height, "Validators are ahead after timeout");
            return Ok(DriverOutcome::NeedsSync);
        }
        self.new_round(round.next(), "timeout").await?;
        Ok(DriverOutcome::Progressed)
    }

    async fn peers_ahead(&self, height: Height) -> bool {
        let me = &self.parts.ctx.address;
        let peers: Vec<_> = self
            .parts
            .suffrage
            .validators()
            .into_iter()
            .filter(|address| address != me)
            .collect();
        if peers.is_empty() {
            return false;
        }

        match self.parts.network.request_node_info(&peers).await {
            Ok(infos) => infos
                .iter()
                .any(|info| info.network_id == self.parts.ctx.policy.network_id && info.height > height),
            Err(e) => {
                debug!("Node info request failed: {}", e);
                false
            }
        }
    }

    /// Picks up a round whose INIT majority was published while no handler
    /// was consuming results, for instance during a state switch.
    pub async fn resume(&mut self) -> Result<DriverOutcome> {
        let home = self.parts.home.view().await;
        if self.is_open(home.height, home.round) {
            return match self.parts.pool.find(home.height, home.round).await {
                Some(proposal) => self.sign(&proposal).await,
                None => Ok(DriverOutcome::Ignored),
            };
        }

        let init = BallotBody::init(
            self.parts.ctx.address.clone(),
            home.height,
            home.round,
            home.current_block,
            home.current_block,
        );
        // a closed INIT bucket means its majority was already published
        if self.parts.ballotbox.is_closed(&Ballotbox::bucket_key(&init)).await != Some(true) {
            return Ok(DriverOutcome::Ignored);
        }

        debug!(node = %self.parts.ctx.address, height = %home.height, round = %home.round, "Resuming decided round");
        self.last_majority = Some((home.height, home.round, Stage::Init));
        self.open_round(home.height, home.round).await
    }

    async fn on_init_majority(&mut self, result: &VoteResult) -> Result<DriverOutcome> {
        self.open_round(result.height, result.round).await
    }

    async fn open_round(&mut self, height: Height, round: Round) -> Result<DriverOutcome> {
        self.parts.home.set_round(round).await;
        self.parts.ctx.metrics.record_position(height.value(), round.value());
        self.opened = Some((height, round));
        self.restart_round_timer().await;

        info!(node = %self.parts.ctx.address, height = %height, round = %round, "Round opened");

        let me = self.parts.ctx.address.clone();
        // reopening the same round after a state switch must not propose twice
        if self.parts.suffrage.is_proposer(&me, height, round) && self.proposed != Some((height, round)) {
            self.propose(height, round).await?;
        }

        match self.parts.pool.find(height, round).await {
            Some(proposal) => self.sign(&proposal).await,
            None => Ok(DriverOutcome::Progressed),
        }
    }

    async fn on_sign_majority(&mut self, result: &VoteResult) -> Result<DriverOutcome> {
        let home = self.parts.home.view().await;
        let affirmative = match result.proposal {
            Some(hash) if result.current_block == home.current_block => {
                match self.parts.pool.get(&hash).await {
                    Some(proposal) => match self.parts.storage.new_block(&proposal).await {
                        Ok((block, _)) => block.hash == result.next_block,
                        Err(e) => {
                            warn!("Can not build block for {}: {}", proposal.body, e);
                            false
                        }
                    },
                    None => false,
                }
            }
            _ => false,
        };

        if !affirmative {
            info!(
                node = %self.parts.ctx.address,
                height = %result.height,
                round = %result.round,
                "SIGN majority disagrees with local block"
            );
            self.new_round(result.round.next(), "sign").await?;
            return Ok(DriverOutcome::Progressed);
        }

        let proposal = result
            .proposal
            .ok_or(ConsensusError::InvalidStage {
                stage: Stage::Sign,
                has_proposal: false,
            })?;
        let body = BallotBody::new(
            self.parts.ctx.address.clone(),
            result.height,
            result.round,
            Stage::Accept,
            proposal,
            home.current_block,
            result.next_block,
        );
        self.parts.broadcaster.send(Outbound::Ballot(body), &[]).await?;
        self.restart_round_timer().await;
        Ok(DriverOutcome::Progressed)
    }

    async fn on_accept_majority(&mut self, result: &VoteResult) -> Result<DriverOutcome> {
        let hash = result.proposal.ok_or(ConsensusError::InvalidStage {
            stage: Stage::Accept,
            has_proposal: false,
        })?;
        let Some(proposal) = self.parts.pool.get(&hash).await else {
            warn!("ACCEPT majority for unknown {}", ConsensusError::UnknownProposal(hash));
            return Ok(DriverOutcome::NeedsSync);
        };

        let (block, batch) = self.parts.storage.new_block(&proposal).await?;
        if block.hash != result.next_block {
            warn!(
                "{}",
                ConsensusError::BlockMismatch {
                    height: block.height,
                    expected: result.next_block,
                    got: block.hash,
                }
            );
            return Ok(DriverOutcome::NeedsSync);
        }

        self.parts.storage.apply(batch).await?;
        self.parts.home.advance(&block).await?;
        self.parts.ctx.metrics.blocks_finalized.inc();
        info!(node = %self.parts.ctx.address, "Finalized {}", block);

        self.parts.ballotbox.clean(block.height).await;
        let next = block.height.next()?;
        self.parts.pool.clean(next).await;
        self.parts.ctx.metrics.record_position(next.value(), 0);

        self.send_init(next, Round::ZERO, block.hash).await?;
        if self.parts.suffrage.is_proposer(&self.parts.ctx.address, next, Round::ZERO) {
            self.propose(next, Round::ZERO).await?;
        }
        self.restart_round_timer().await;

        Ok(DriverOutcome::Finalized(block))
    }

    async fn new_round(&mut self, round: Round, cause: &str) -> Result<()> {
        let home = self.parts.home.view().await;
        self.parts.home.set_round(round).await;
        self.parts.ctx.metrics.new_rounds.with_label_values(&[cause]).inc();
        self.parts.ctx.metrics.record_position(home.height.value(), round.value());
        info!(
            node = %self.parts.ctx.address,
            height = %home.height,
            round = %round,
            "New round after {}", cause
        );

        self.send_init(home.height, round, home.current_block).await?;
        self.restart_round_timer().await;
        Ok(())
    }

    async fn propose(&mut self, height: Height, round: Round) -> Result<()> {
        let home = self.parts.home.view().await;
        let body = ProposalBody::new(self.parts.ctx.address.clone(), height, round, home.current_block);
        self.parts.broadcaster.send(Outbound::Proposal(body), &[]).await?;
        self.proposed = Some((height, round));
        info!(node = %self.parts.ctx.address, height = %height, round = %round, "Proposed");
        Ok(())
    }

    async fn sign(&mut self, proposal: &Proposal) -> Result<DriverOutcome> {
        let (height, round) = (proposal.body.height, proposal.body.round);
        if self.signed == Some((height, round)) {
            return Ok(DriverOutcome::Ignored);
        }

        let home = self.parts.home.view().await;
        let (block, _) = self.parts.storage.new_block(proposal).await?;
        let body = BallotBody::new(
            self.parts.ctx.address.clone(),
            height,
            round,
            Stage::Sign,
            proposal.hash,
            home.current_block,
            block.hash,
        );
        self.parts.broadcaster.send(Outbound::Ballot(body), &[]).await?;
        self.signed = Some((height, round));
        Ok(DriverOutcome::Progressed)
    }

    async fn send_init(&self, height: Height, round: Round, current_block: quorum_types::Hash) -> Result<()> {
        let body = BallotBody::init(
            self.parts.ctx.address.clone(),
            height,
            round,
            current_block,
            current_block,
        );
        self.parts.broadcaster.send(Outbound::Ballot(body), &[]).await?;
        Ok(())
    }
}
