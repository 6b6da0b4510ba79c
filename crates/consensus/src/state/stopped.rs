use async_trait::async_trait;
use quorum_types::{Address, NodeState};
use tracing::{debug, info};

use crate::state::{Handler, HandlerEvent, StateLogic};

pub type StoppedState = Handler<StoppedLogic>;

/// Terminal state. Nothing leaves it.
pub struct StoppedLogic {
    address: Address,
}

impl StoppedLogic {
    pub fn new(address: Address) -> Self {
        Self { address }
    }
}

#[async_trait]
impl StateLogic for StoppedLogic {
    const STATE: NodeState = NodeState::Stopped;

    async fn on_event(&self, event: HandlerEvent) {
        match event {
            HandlerEvent::Start(_) => info!(node = %self.address, "Node stopped"),
            other => debug!("Stopped node dropped {:?}", other),
        }
    }

    async fn on_stop(&self) {}
}
