use chrono::{DateTime, Utc};
use quorum_network::{Broadcaster, NetworkClient};
use quorum_storage::BlockStorage;
use quorum_types::{ConsensusError, NodeState, Result, SignedMessage};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::info;

use crate::ballotbox::Ballotbox;
use crate::compiler::SealCompiler;
use crate::components::Components;
use crate::context::NodeContext;
use crate::driver::RoundDriver;
use crate::home_state::HomeState;
use crate::proposal_pool::ProposalPool;
use crate::service::NodeService;
use crate::state::booting::BootingLogic;
use crate::state::consensus::ConsensusLogic;
use crate::state::joining::JoiningLogic;
use crate::state::stopped::StoppedLogic;
use crate::state::syncing::SyncingLogic;
use crate::state::{
    BootingState, ConsensusState, JoiningState, StartContext, StateTransition, StoppedState,
    SyncingState,
};
use crate::suffrage::Suffrage;
use crate::threshold::Threshold;

/// First half of node assembly.
///
/// Transports need the inbound queue and the peer service before the node
/// can be built, and the node needs the transport to broadcast. The
/// builder hands out both ends first.
pub struct NodeBuilder {
    ctx: NodeContext,
    suffrage: Suffrage,
    home: Arc<HomeState>,
    storage: Arc<dyn BlockStorage>,
    inbound: (
        mpsc::UnboundedSender<SignedMessage>,
        mpsc::UnboundedReceiver<SignedMessage>,
    ),
}

impl NodeBuilder {
    pub fn new(ctx: NodeContext, suffrage: Suffrage, storage: Arc<dyn BlockStorage>) -> Result<Self> {
        if ctx.policy.total != suffrage.total() {
            return Err(ConsensusError::Config(format!(
                "policy expects {} validators, suffrage has {}",
                ctx.policy.total,
                suffrage.total()
            )));
        }
        if !suffrage.is_validator(&ctx.address) {
            return Err(ConsensusError::Config(format!(
                "{} is not in the validator set",
                ctx.address
            )));
        }

        let home = Arc::new(HomeState::new(ctx.address.clone()));
        Ok(Self {
            ctx,
            suffrage,
            home,
            storage,
            inbound: mpsc::unbounded_channel(),
        })
    }

    pub fn inbound(&self) -> mpsc::UnboundedSender<SignedMessage> {
        self.inbound.0.clone()
    }

    pub fn home(&self) -> Arc<HomeState> {
        Arc::clone(&self.home)
    }

    pub fn service(&self, public_key: Vec<u8>, started_at: DateTime<Utc>) -> Arc<NodeService> {
        Arc::new(NodeService::new(
            Arc::clone(&self.home),
            Arc::clone(&self.storage),
            public_key,
            self.ctx.policy.network_id.clone(),
            started_at,
        ))
    }

    pub async fn build(
        self,
        broadcaster: Arc<dyn Broadcaster>,
        network: Arc<dyn NetworkClient>,
    ) -> Result<ConsensusNode> {
        let threshold = Threshold::from_policy(&self.ctx.policy)?;
        let ballotbox = Arc::new(Ballotbox::new(threshold));
        let pool = Arc::new(ProposalPool::new());
        let transition = StateTransition::new(self.ctx.clone(), Arc::clone(&self.home));

        let compiler = SealCompiler::with_channel(
            self.inbound,
            self.ctx.clone(),
            Arc::clone(&self.home),
            self.suffrage.clone(),
            Arc::clone(&ballotbox),
            Arc::clone(&pool),
            transition.sender(),
        );

        let parts = Components {
            ctx: self.ctx.clone(),
            home: Arc::clone(&self.home),
            suffrage: self.suffrage,
            ballotbox,
            pool,
            storage: Arc::clone(&self.storage),
            broadcaster,
            network,
            transition: transition.sender(),
        };
        let driver = Arc::new(Mutex::new(RoundDriver::new(parts.clone())));

        let booting = BootingState::new(|_| {
            BootingLogic::new(Arc::clone(&parts.home), Arc::clone(&parts.storage), parts.transition.clone())
        });
        let joining = JoiningState::new(|tx| JoiningLogic::new(Arc::clone(&driver), tx));
        let consensus = ConsensusState::new(|tx| ConsensusLogic::new(Arc::clone(&driver), tx));
        let syncing = SyncingState::new(|tx| SyncingLogic::new(parts.clone(), tx));
        let stopped = StoppedState::new(|_| StoppedLogic::new(parts.ctx.address.clone()));

        transition.register(Arc::new(booting)).await;
        transition.register(Arc::new(joining)).await;
        transition.register(Arc::new(consensus)).await;
        transition.register(Arc::new(syncing)).await;
        transition.register(Arc::new(stopped)).await;

        Ok(ConsensusNode {
            parts,
            compiler,
            transition,
        })
    }
}

pub struct ConsensusNode {
    parts: Components,
    compiler: SealCompiler,
    transition: StateTransition,
}

impl ConsensusNode {
    pub async fn start(&self) -> Result<()> {
        self.transition.start().await?;
        self.transition
            .sender()
            .request(NodeState::Booting, StartContext::default());
        self.compiler.start().await?;
        info!(node = %self.parts.ctx.address, "Node started");
        Ok(())
    }

    /// Moves the node to Stopped, then stops the queues.
    pub async fn stop(&self) -> Result<()> {
        self.transition.stop().await?;
        self.compiler.stop().await?;
        // a node that never started has no handler to record the state
        if self.parts.home.state().await != NodeState::Stopped {
            self.parts.home.set_state(NodeState::Stopped).await;
            self.parts.ctx.metrics.record_state(NodeState::Stopped);
        }
        info!(node = %self.parts.ctx.address, "Node stopped");
        Ok(())
    }

    pub fn ctx(&self) -> &NodeContext {
        &self.parts.ctx
    }

    pub fn home(&self) -> &Arc<HomeState> {
        &self.parts.home
    }

    pub fn storage(&self) -> &Arc<dyn BlockStorage> {
        &self.parts.storage
    }

    pub fn compiler(&self) -> &SealCompiler {
        &self.compiler
    }

    pub async fn state(&self) -> Option<NodeState> {
        self.transition.active_state().await
    }
}
