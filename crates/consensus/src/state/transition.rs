use async_trait::async_trait;
use quorum_types::{ConsensusError, NodeState, Proposal, Result, VoteResult};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::context::NodeContext;
use crate::daemon::{Daemon, EventHandler};
use crate::home_state::HomeState;
use crate::state::{StartContext, StateHandler};

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub enum TransitionEvent {
    ChangeState { to: NodeState, ctx: StartContext },
    Proposal(Proposal),
    VoteResult(VoteResult),
}

#[derive(Clone)]
pub struct TransitionSender {
    tx: mpsc::UnboundedSender<TransitionEvent>,
}

impl TransitionSender {
    pub fn from_sender(tx: mpsc::UnboundedSender<TransitionEvent>) -> Self {
        Self { tx }
    }

    pub fn request(&self, to: NodeState, ctx: StartContext) {
        self.send(TransitionEvent::ChangeState { to, ctx });
    }

    pub fn proposal(&self, proposal: Proposal) {
        self.send(TransitionEvent::Proposal(proposal));
    }

    pub fn vote_result(&self, result: VoteResult) {
        self.send(TransitionEvent::VoteResult(result));
    }

    fn send(&self, event: TransitionEvent) {
        if self.tx.send(event).is_err() {
            warn!("State transition queue is closed");
        }
    }
}

struct TransitionCore {
    ctx: NodeContext,
    home: Arc<HomeState>,
    handlers: RwLock<HashMap<NodeState, Arc<dyn StateHandler>>>,
    active: Mutex<Option<Arc<dyn StateHandler>>>,
    started: watch::Sender<Option<NodeState>>,
}

impl TransitionCore {
    async fn change(&self, to: NodeState, ctx: StartContext) -> Result<()> {
        let handler = self
            .handlers
            .read()
            .await
            .get(&to)
            .cloned()
            .ok_or(ConsensusError::MissingStateHandler(to))?;

        let mut active = self.active.lock().await;
        if let Some(current) = active.as_ref() {
            let from = current.state();
            if from == to {
                return Err(ConsensusError::SameState(to));
            }
            if !from.can_transit_to(to) {
                return Err(ConsensusError::InvalidTransition { from, to });
            }

            current.stop().await?;
            info!(node = %self.ctx.address, "State {} stopped", from);
        }
        *active = None;

        self.home.set_state(to).await;
        self.ctx.metrics.record_state(to);

        handler.start(ctx).await?;
        *active = Some(handler);
        self.started.send_replace(Some(to));
        info!(node = %self.ctx.address, "State {} started", to);
        Ok(())
    }

    async fn route(&self, event: TransitionEvent) -> Result<()> {
        let active = self.active.lock().await;
        let handler = active.as_ref().ok_or(ConsensusError::NoActiveHandler)?;
        match event {
            TransitionEvent::Proposal(proposal) => handler.receive_proposal(proposal),
            TransitionEvent::VoteResult(result) => handler.receive_vote_result(result),
            TransitionEvent::ChangeState { .. } => Ok(()),
        }
    }
}

#[async_trait]
impl EventHandler<TransitionEvent> for TransitionCore {
    async fn handle(&self, event: TransitionEvent) {
        match event {
            TransitionEvent::ChangeState { to, ctx } => match self.change(to, ctx).await {
                Ok(()) => {}
                Err(e @ ConsensusError::SameState(_)) => debug!("State change ignored: {}", e),
                Err(e) => error!(node = %self.ctx.address, "Failed to change state to {}: {}", to, e),
            },
            event => {
                if let Err(e) = self.route(event).await {
                    error!(node = %self.ctx.address, "Dropping event: {}", e);
                }
            }
        }
    }
}

/// Owns the lifecycle handlers and switches between them. State changes
/// and event delivery share one queue, so an event is never routed to a
/// handler that is being replaced.
pub struct StateTransition {
    daemon: Daemon<TransitionEvent>,
    core: Arc<TransitionCore>,
}

impl StateTransition {
    pub fn new(ctx: NodeContext, home: Arc<HomeState>) -> Self {
        Self {
            daemon: Daemon::new("state-transition"),
            core: Arc::new(TransitionCore {
                ctx,
                home,
                handlers: RwLock::new(HashMap::new()),
                active: Mutex::new(None),
                started: watch::channel(None).0,
            }),
        }
    }

    pub fn sender(&self) -> TransitionSender {
        TransitionSender::from_sender(self.daemon.sender())
    }

    pub async fn register(&self, handler: Arc<dyn StateHandler>) {
        let state = handler.state();
        if self.core.handlers.write().await.insert(state, handler).is_some() {
            warn!("Replaced state handler for {}", state);
        }
    }

    /// Starts the queue. Every state needs a handler; a missing one is a
    /// wiring bug and fails here.
    pub async fn start(&self) -> Result<()> {
        {
            let handlers = self.core.handlers.read().await;
            if let Some(missing) = NodeState::ALL.iter().find(|s| !handlers.contains_key(*s)) {
                return Err(ConsensusError::MissingStateHandler(*missing));
            }
        }
        self.daemon.start(Arc::clone(&self.core) as Arc<dyn EventHandler<TransitionEvent>>).await
    }

    /// Moves the node to Stopped through the queue, then stops the queue and
    /// the Stopped handler.
    pub async fn stop(&self) -> Result<()> {
        if self.daemon.is_running().await {
            let mut started = self.core.started.subscribe();
            self.sender().request(NodeState::Stopped, StartContext::default());
            let stopped = started.wait_for(|state| *state == Some(NodeState::Stopped));
            if tokio::time::timeout(STOP_TIMEOUT, stopped).await.is_err() {
                warn!(node = %self.core.ctx.address, "Stopped state not reached within {:?}", STOP_TIMEOUT);
            }
        }

        self.daemon.stop().await?;
        if let Some(active) = self.core.active.lock().await.take() {
            active.stop().await?;
        }
        Ok(())
    }

    pub async fn active_state(&self) -> Option<NodeState> {
        self.core.active.lock().await.as_ref().map(|h| h.state())
    }
}
