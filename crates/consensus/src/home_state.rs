use quorum_types::{Address, Block, ConsensusError, Hash, Height, NodeState, Result, Round};
use tokio::sync::RwLock;
use tracing::info;

/// Snapshot of the node's own consensus position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HomeView {
    pub height: Height,
    pub round: Round,
    /// Hash of the last finalized block, `Hash::ZERO` before genesis.
    pub current_block: Hash,
    pub previous_block: Hash,
    pub state: NodeState,
    pub previous_state: Option<NodeState>,
}

impl HomeView {
    fn genesis() -> Self {
        Self {
            height: Height::GENESIS,
            round: Round::ZERO,
            current_block: Hash::ZERO,
            previous_block: Hash::ZERO,
            state: NodeState::Booting,
            previous_state: None,
        }
    }
}

/// The node's mutable view of itself, shared by the driver and the state
/// handlers.
pub struct HomeState {
    address: Address,
    view: RwLock<HomeView>,
}

impl HomeState {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            view: RwLock::new(HomeView::genesis()),
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub async fn view(&self) -> HomeView {
        self.view.read().await.clone()
    }

    pub async fn height(&self) -> Height {
        self.view.read().await.height
    }

    pub async fn round(&self) -> Round {
        self.view.read().await.round
    }

    pub async fn current_block(&self) -> Hash {
        self.view.read().await.current_block
    }

    pub async fn state(&self) -> NodeState {
        self.view.read().await.state
    }

    pub async fn set_round(&self, round: Round) {
        self.view.write().await.round = round;
    }

    pub async fn set_state(&self, state: NodeState) {
        let mut view = self.view.write().await;
        if view.state != state {
            view.previous_state = Some(view.state);
            view.state = state;
        }
    }

    /// Positions the node right after `tip`, or at genesis without one.
    pub async fn reset_to(&self, tip: Option<&Block>) -> Result<()> {
        let mut view = self.view.write().await;
        match tip {
            Some(block) => {
                view.height = block.height.next()?;
                view.current_block = block.hash;
                view.previous_block = block.previous;
            }
            None => {
                view.height = Height::GENESIS;
                view.current_block = Hash::ZERO;
                view.previous_block = Hash::ZERO;
            }
        }
        view.round = Round::ZERO;
        Ok(())
    }

    /// Moves past a finalized `block`, which must extend the current one.
    pub async fn advance(&self, block: &Block) -> Result<()> {
        let mut view = self.view.write().await;
        if block.height != view.height {
            return Err(ConsensusError::HeightOutOfWindow {
                home: view.height,
                got: block.height,
            });
        }
        if block.previous != view.current_block {
            return Err(ConsensusError::BlockMismatch {
                height: block.height,
                expected: view.current_block,
                got: block.previous,
            });
        }

        view.height = view.height.next()?;
        view.round = Round::ZERO;
        view.previous_block = view.current_block;
        view.current_block = block.hash;

        info!(
            "{} advanced to height={} block={}",
            self.address, view.height, view.current_block
        );
        Ok(())
    }
}
