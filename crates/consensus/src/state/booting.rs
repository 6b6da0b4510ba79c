use async_trait::async_trait;
use quorum_storage::BlockStorage;
use quorum_types::{NodeState, Result};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::home_state::HomeState;
use crate::state::{Handler, HandlerEvent, StartContext, StateLogic, TransitionSender};

pub type BootingState = Handler<BootingLogic>;

/// Restores the node's position from storage, then hands over to syncing.
pub struct BootingLogic {
    home: Arc<HomeState>,
    storage: Arc<dyn BlockStorage>,
    transition: TransitionSender,
}

impl BootingLogic {
    pub fn new(home: Arc<HomeState>, storage: Arc<dyn BlockStorage>, transition: TransitionSender) -> Self {
        Self {
            home,
            storage,
            transition,
        }
    }

    async fn restore(&self) -> Result<()> {
        let tip = self.storage.latest_block().await?;
        self.home.reset_to(tip.as_ref()).await?;
        match tip {
            Some(block) => info!(node = %self.home.address(), "Restored tip {}", block),
            None => info!(node = %self.home.address(), "Empty storage; starting before genesis"),
        }
        Ok(())
    }
}

#[async_trait]
impl StateLogic for BootingLogic {
    const STATE: NodeState = NodeState::Booting;

    async fn on_event(&self, event: HandlerEvent) {
        match event {
            HandlerEvent::Start(_) => match self.restore().await {
                Ok(()) => self.transition.request(NodeState::Syncing, StartContext::default()),
                Err(e) => {
                    error!(node = %self.home.address(), "Failed to boot: {}", e);
                    self.transition.request(NodeState::Stopped, StartContext::default());
                }
            },
            other => debug!("Booting ignores {:?}", other),
        }
    }

    async fn on_stop(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{rig, BrokenStorage};
    use quorum_types::{Hash, Height};

    #[tokio::test]
    async fn test_storage_failure_stops_node() {
        let mut rig = rig(1);
        let logic = BootingLogic::new(
            Arc::clone(&rig.parts.home),
            Arc::new(BrokenStorage),
            rig.parts.transition.clone(),
        );

        logic.on_event(HandlerEvent::Start(StartContext::default())).await;
        let (to, _) = rig.next_request().await.unwrap();
        assert_eq!(to, NodeState::Stopped);
    }

    #[tokio::test]
    async fn test_restores_tip_then_syncs() {
        let mut rig = rig(4);
        for proof in rig.chain(2) {
            let (_, batch) = rig.storage.new_block(&proof.proposal).await.unwrap();
            rig.storage.apply(batch).await.unwrap();
        }
        let tip = rig.storage.latest_block().await.unwrap().unwrap();
        let logic = BootingLogic::new(
            Arc::clone(&rig.parts.home),
            Arc::clone(&rig.storage) as Arc<dyn BlockStorage>,
            rig.parts.transition.clone(),
        );

        logic.on_event(HandlerEvent::Start(StartContext::default())).await;
        let (to, _) = rig.next_request().await.unwrap();
        assert_eq!(to, NodeState::Syncing);

        let home = rig.parts.home.view().await;
        assert_eq!(home.height, Height(2));
        assert_eq!(home.current_block, tip.hash);
        assert_ne!(home.current_block, Hash::ZERO);
    }
}
