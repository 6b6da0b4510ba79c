//! Inbound dispatch. Every verified message passes an ordered chain of
//! checks before it reaches the ballotbox or the proposal pool. Anything
//! that fails a check is dropped with a log line.

use async_trait::async_trait;
use quorum_types::{
    Ballot, ConsensusError, Height, Proposal, Result, Round, SignedMessage, Stage, VoteResult,
    VoteResultKind,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::ballotbox::Ballotbox;
use crate::context::NodeContext;
use crate::daemon::{Daemon, EventHandler};
use crate::home_state::{HomeState, HomeView};
use crate::proposal_pool::ProposalPool;
use crate::state::TransitionSender;
use crate::suffrage::Suffrage;

#[derive(Debug, PartialEq, Eq)]
enum Verdict {
    Admit,
    Reject { check: &'static str, reason: String },
}

fn reject(check: &'static str, reason: impl Into<String>) -> Verdict {
    Verdict::Reject {
        check,
        reason: reason.into(),
    }
}

struct BallotCheck<'a> {
    ballot: &'a Ballot,
    home: &'a HomeView,
    agreed: Option<Round>,
    suffrage: &'a Suffrage,
}

type BallotRule = fn(&BallotCheck<'_>) -> Verdict;

const BALLOT_RULES: [BallotRule; 3] = [check_voter, check_ballot_height, check_ballot_round];

fn check_voter(c: &BallotCheck<'_>) -> Verdict {
    let body = &c.ballot.body;
    if c.ballot.signer != body.node {
        return reject("voter", format!("signed by {} on behalf of {}", c.ballot.signer, body.node));
    }
    if !c.suffrage.is_validator(&body.node) {
        return reject("voter", format!("{} is not a validator", body.node));
    }
    Verdict::Admit
}

fn check_ballot_height(c: &BallotCheck<'_>) -> Verdict {
    let height = c.ballot.body.height;
    // late votes for the block just finalized still count
    if height == c.home.height || height.next().ok() == Some(c.home.height) {
        return Verdict::Admit;
    }
    reject("height", format!("height {} outside {}", height, c.home.height))
}

fn check_ballot_round(c: &BallotCheck<'_>) -> Verdict {
    let body = &c.ballot.body;
    if body.stage == Stage::Init {
        let mut allowed = vec![Round::ZERO];
        if let Some(agreed) = c.agreed {
            allowed.extend([agreed, agreed.next()]);
        }
        if body.height == c.home.height {
            // rounds opened locally by a draw or timeout
            allowed.extend([c.home.round, c.home.round.next()]);
        }
        if allowed.contains(&body.round) {
            return Verdict::Admit;
        }
        return reject("round", format!("INIT round {} not open", body.round));
    }

    let own = body.height == c.home.height && body.round <= c.home.round;
    match c.agreed {
        Some(agreed) if body.round == agreed => Verdict::Admit,
        Some(agreed) if body.round < agreed => {
            reject("round", format!("round {} behind agreed round {}", body.round, agreed))
        }
        _ if own => Verdict::Admit,
        _ => reject("round", format!("round {} not agreed yet", body.round)),
    }
}

struct ProposalCheck<'a> {
    proposal: &'a Proposal,
    home: &'a HomeView,
    agreed: Option<Round>,
    suffrage: &'a Suffrage,
}

type ProposalRule = fn(&ProposalCheck<'_>) -> Verdict;

const PROPOSAL_RULES: [ProposalRule; 4] = [
    check_proposer,
    check_proposal_height,
    check_proposal_block,
    check_proposal_round,
];

fn check_proposer(c: &ProposalCheck<'_>) -> Verdict {
    let body = &c.proposal.body;
    if c.proposal.signer != body.proposer {
        return reject("proposer", format!("signed by {} for {}", c.proposal.signer, body.proposer));
    }
    let expected = c.suffrage.proposer(body.height, body.round);
    if expected != body.proposer {
        return reject("proposer", format!("{} is not the proposer, {} is", body.proposer, expected));
    }
    Verdict::Admit
}

fn check_proposal_height(c: &ProposalCheck<'_>) -> Verdict {
    let height = c.proposal.body.height;
    if height == c.home.height {
        return Verdict::Admit;
    }
    reject("height", format!("height {} is not {}", height, c.home.height))
}

fn check_proposal_block(c: &ProposalCheck<'_>) -> Verdict {
    if c.proposal.body.current_block != c.home.current_block {
        return reject(
            "block",
            format!(
                "builds on {} instead of {}",
                c.proposal.body.current_block, c.home.current_block
            ),
        );
    }
    Verdict::Admit
}

fn check_proposal_round(c: &ProposalCheck<'_>) -> Verdict {
    let round = c.proposal.body.round;
    // a proposal may land before the INIT majority that opens its round
    if round == Round::ZERO || c.agreed == Some(round) || round == c.home.round || round == c.home.round.next() {
        return Verdict::Admit;
    }
    reject("round", format!("round {} is not open", round))
}

/// Round of the latest INIT majority per height.
#[derive(Default)]
struct AgreedRounds(BTreeMap<Height, Round>);

impl AgreedRounds {
    fn get(&self, height: Height) -> Option<Round> {
        self.0.get(&height).copied()
    }

    fn observe(&mut self, result: &VoteResult) {
        if result.kind != VoteResultKind::GotMajority {
            return;
        }
        match result.stage {
            Stage::Init => {
                let agreed = self.0.entry(result.height).or_insert(result.round);
                if result.round > *agreed {
                    *agreed = result.round;
                }
            }
            // keep the finalized height for late votes, forget the rest
            Stage::Accept => {
                if let Ok(floor) = result.height.previous() {
                    self.0 = self.0.split_off(&floor);
                }
            }
            Stage::Sign => {}
        }
    }
}

struct CompilerCore {
    ctx: NodeContext,
    home: Arc<HomeState>,
    suffrage: Suffrage,
    ballotbox: Arc<Ballotbox>,
    pool: Arc<ProposalPool>,
    transition: TransitionSender,
    agreed: Mutex<AgreedRounds>,
}

impl CompilerCore {
    async fn compile(&self, message: SignedMessage) {
        match message {
            SignedMessage::Ballot(ballot) => self.compile_ballot(ballot).await,
            SignedMessage::Proposal(proposal) => self.compile_proposal(proposal).await,
        }
    }

    async fn compile_ballot(&self, ballot: Ballot) {
        let home = self.home.view().await;
        let verdict = {
            let agreed = self.agreed.lock().await;
            let check = BallotCheck {
                ballot: &ballot,
                home: &home,
                agreed: agreed.get(ballot.body.height),
                suffrage: &self.suffrage,
            };
            BALLOT_RULES
                .iter()
                .map(|rule| rule(&check))
                .find(|verdict| *verdict != Verdict::Admit)
                .unwrap_or(Verdict::Admit)
        };

        if let Verdict::Reject { check, reason } = verdict {
            let e = ConsensusError::StaleBallot {
                node: ballot.body.node.clone(),
                reason,
            };
            self.drop_message(check, &e);
            return;
        }

        let result = match self.ballotbox.vote(&ballot).await {
            Ok(result) => result,
            Err(e) => {
                self.drop_message(if e.is_stale() { "duplicate" } else { "invalid" }, &e);
                return;
            }
        };
        self.ctx
            .metrics
            .seals_accepted
            .with_label_values(&["ballot"])
            .inc();

        match result.kind {
            VoteResultKind::NotYetMajority => {}
            VoteResultKind::Finished => debug!("Late vote for closed bucket: {}", ballot.body),
            VoteResultKind::GotMajority | VoteResultKind::Draw => {
                if let Err(e) = self.ballotbox.close_vote_records(&result.bucket).await {
                    warn!("Failed to close vote records {}: {}", result.bucket, e);
                }
                info!(
                    node = %self.ctx.address,
                    height = %result.height,
                    round = %result.round,
                    stage = %result.stage,
                    "Vote result {}",
                    result.kind
                );
                self.agreed.lock().await.observe(&result);
                self.transition.vote_result(result);
            }
        }
    }

    async fn compile_proposal(&self, proposal: Proposal) {
        let home = self.home.view().await;
        let verdict = {
            let agreed = self.agreed.lock().await;
            let check = ProposalCheck {
                proposal: &proposal,
                home: &home,
                agreed: agreed.get(proposal.body.height),
                suffrage: &self.suffrage,
            };
            PROPOSAL_RULES
                .iter()
                .map(|rule| rule(&check))
                .find(|verdict| *verdict != Verdict::Admit)
                .unwrap_or(Verdict::Admit)
        };

        match verdict {
            Verdict::Admit => {
                if !self.pool.add(proposal.clone()).await {
                    debug!("Proposal {} already pooled", proposal.hash);
                    return;
                }
                self.ctx
                    .metrics
                    .seals_accepted
                    .with_label_values(&["proposal"])
                    .inc();
                debug!("Admitted {}", proposal.body);
                self.transition.proposal(proposal);
            }
            Verdict::Reject { check, reason } => {
                let e = ConsensusError::StaleProposal {
                    proposal: proposal.hash,
                    reason,
                };
                self.drop_message(check, &e);
            }
        }
    }

    fn drop_message(&self, check: &str, e: &ConsensusError) {
        self.ctx
            .metrics
            .seals_rejected
            .with_label_values(&[check])
            .inc();
        if e.is_stale() {
            debug!(node = %self.ctx.address, "Dropped: {}", e);
        } else {
            warn!(node = %self.ctx.address, "Rejected: {}", e);
        }
    }
}

#[async_trait]
impl EventHandler<SignedMessage> for CompilerCore {
    async fn handle(&self, message: SignedMessage) {
        self.compile(message).await;
    }
}

/// Filters verified inbound messages, feeds ballots to the ballotbox and
/// publishes decided results to the state transition.
pub struct SealCompiler {
    daemon: Daemon<SignedMessage>,
    core: Arc<CompilerCore>,
}

impl SealCompiler {
    pub fn new(
        ctx: NodeContext,
        home: Arc<HomeState>,
        suffrage: Suffrage,
        ballotbox: Arc<Ballotbox>,
        pool: Arc<ProposalPool>,
        transition: TransitionSender,
    ) -> Self {
        Self::with_queue(
            Daemon::new("compiler"),
            ctx,
            home,
            suffrage,
            ballotbox,
            pool,
            transition,
        )
    }

    /// Uses an existing inbound channel, typically one a transport was
    /// given before the node was assembled.
    pub fn with_channel(
        channel: (
            mpsc::UnboundedSender<SignedMessage>,
            mpsc::UnboundedReceiver<SignedMessage>,
        ),
        ctx: NodeContext,
        home: Arc<HomeState>,
        suffrage: Suffrage,
        ballotbox: Arc<Ballotbox>,
        pool: Arc<ProposalPool>,
        transition: TransitionSender,
    ) -> Self {
        Self::with_queue(
            Daemon::from_channel("compiler", channel),
            ctx,
            home,
            suffrage,
            ballotbox,
            pool,
            transition,
        )
    }

    fn with_queue(
        daemon: Daemon<SignedMessage>,
        ctx: NodeContext,
        home: Arc<HomeState>,
        suffrage: Suffrage,
        ballotbox: Arc<Ballotbox>,
        pool: Arc<ProposalPool>,
        transition: TransitionSender,
    ) -> Self {
        Self {
            daemon,
            core: Arc::new(CompilerCore {
                ctx,
                home,
                suffrage,
                ballotbox,
                pool,
                transition,
                agreed: Mutex::new(AgreedRounds::default()),
            }),
        }
    }

    pub fn sender(&self) -> mpsc::UnboundedSender<SignedMessage> {
        self.daemon.sender()
    }

    pub fn post(&self, message: SignedMessage) -> Result<()> {
        self.daemon.post(message)
    }

    pub async fn start(&self) -> Result<()> {
        self.daemon
            .start(Arc::clone(&self.core) as Arc<dyn EventHandler<SignedMessage>>)
            .await
    }

    pub async fn stop(&self) -> Result<()> {
        self.daemon.stop().await
    }

    /// Processes one message on the caller's task, bypassing the queue.
    pub async fn compile(&self, message: SignedMessage) {
        self.core.compile(message).await;
    }
}
