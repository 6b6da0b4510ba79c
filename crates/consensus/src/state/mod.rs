//! Node lifecycle: one handler per [`NodeState`], exactly one of them
//! active, switched by [`StateTransition`].

pub mod booting;
pub mod consensus;
pub mod joining;
pub mod stopped;
pub mod syncing;
pub mod transition;

pub use booting::BootingState;
pub use consensus::ConsensusState;
pub use joining::JoiningState;
pub use stopped::StoppedState;
pub use syncing::SyncingState;
pub use transition::{StateTransition, TransitionEvent, TransitionSender};

use async_trait::async_trait;
use quorum_types::{Height, NodeState, Proposal, Result, Round, VoteResult};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::daemon::{Daemon, EventHandler};
use crate::timer::TimerId;

/// Handed to a handler when it becomes active.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartContext {
    /// Result that triggered the transition, to be processed first.
    pub vote_result: Option<VoteResult>,
}

impl StartContext {
    pub fn with_vote_result(result: VoteResult) -> Self {
        Self {
            vote_result: Some(result),
        }
    }
}

#[derive(Debug, Clone)]
pub enum HandlerEvent {
    Start(StartContext),
    Proposal(Proposal),
    VoteResult(VoteResult),
    Timeout {
        id: TimerId,
        height: Height,
        round: Round,
    },
}

#[async_trait]
pub trait StateHandler: Send + Sync {
    fn state(&self) -> NodeState;

    async fn start(&self, ctx: StartContext) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    fn receive_proposal(&self, proposal: Proposal) -> Result<()>;

    fn receive_vote_result(&self, result: VoteResult) -> Result<()>;
}

/// Behaviour of one lifecycle state. Runs on its handler's single worker.
#[async_trait]
pub trait StateLogic: Send + Sync + 'static {
    const STATE: NodeState;

    async fn on_event(&self, event: HandlerEvent);

    /// Cancels the state's timers. Called before its queue is stopped.
    async fn on_stop(&self);
}

struct LogicWorker<L>(Arc<L>);

#[async_trait]
impl<L: StateLogic> EventHandler<HandlerEvent> for LogicWorker<L> {
    async fn handle(&self, event: HandlerEvent) {
        self.0.on_event(event).await;
    }
}

pub struct Handler<L> {
    daemon: Daemon<HandlerEvent>,
    logic: Arc<L>,
}

impl<L: StateLogic> Handler<L> {
    /// `build` receives the sender of the handler's own queue, for timers.
    pub fn new(build: impl FnOnce(mpsc::UnboundedSender<HandlerEvent>) -> L) -> Self {
        let daemon = Daemon::new(L::STATE.to_string());
        let logic = Arc::new(build(daemon.sender()));
        Self { daemon, logic }
    }

    pub fn logic(&self) -> &Arc<L> {
        &self.logic
    }
}

#[async_trait]
impl<L: StateLogic> StateHandler for Handler<L> {
    fn state(&self) -> NodeState {
        L::STATE
    }

    async fn start(&self, ctx: StartContext) -> Result<()> {
        self.daemon
            .start(Arc::new(LogicWorker(Arc::clone(&self.logic))))
            .await?;
        self.daemon.post(HandlerEvent::Start(ctx))
    }

    async fn stop(&self) -> Result<()> {
        self.logic.on_stop().await;
        self.daemon.stop().await
    }

    fn receive_proposal(&self, proposal: Proposal) -> Result<()> {
        self.daemon.post(HandlerEvent::Proposal(proposal))
    }

    fn receive_vote_result(&self, result: VoteResult) -> Result<()> {
        self.daemon.post(HandlerEvent::VoteResult(result))
    }
}
