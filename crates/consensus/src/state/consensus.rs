use async_trait::async_trait;
use quorum_types::{NodeState, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::driver::{DriverOutcome, RoundDriver};
use crate::state::{Handler, HandlerEvent, StartContext, StateLogic};
use crate::timer::TimerId;

pub type ConsensusState = Handler<ConsensusLogic>;

/// Steady state: every vote result, proposal and round timeout goes through
/// the round driver.
pub struct ConsensusLogic {
    driver: Arc<Mutex<RoundDriver>>,
    sender: mpsc::UnboundedSender<HandlerEvent>,
}

impl ConsensusLogic {
    pub fn new(driver: Arc<Mutex<RoundDriver>>, sender: mpsc::UnboundedSender<HandlerEvent>) -> Self {
        Self { driver, sender }
    }

    async fn handle(&self, event: HandlerEvent) -> Result<DriverOutcome> {
        let mut driver = self.driver.lock().await;
        match event {
            HandlerEvent::Start(ctx) => {
                driver.attach(self.sender.clone());
                info!(node = %driver.parts().ctx.address, "Consensus started");
                let outcome = match ctx.vote_result {
                    Some(result) => driver.on_vote_result(&result).await?,
                    None => {
                        driver.broadcast_init().await?;
                        driver.restart_round_timer().await;
                        DriverOutcome::Progressed
                    }
                };
                if outcome == DriverOutcome::NeedsSync {
                    return Ok(outcome);
                }
                driver.resume().await?;
                Ok(outcome)
            }
            HandlerEvent::VoteResult(result) => driver.on_vote_result(&result).await,
            HandlerEvent::Proposal(proposal) => driver.on_proposal(&proposal).await,
            HandlerEvent::Timeout {
                id: TimerId::Round,
                height,
                round,
            } => driver.on_timeout(height, round).await,
            HandlerEvent::Timeout { id, .. } => {
                debug!(?id, "Consensus ignores timer");
                Ok(DriverOutcome::Ignored)
            }
        }
    }

    async fn resync(&self, reason: &str) {
        let driver = self.driver.lock().await;
        warn!(node = %driver.parts().ctx.address, "Leaving consensus: {}", reason);
        driver
            .parts()
            .transition
            .request(NodeState::Syncing, StartContext::default());
    }
}

#[async_trait]
impl StateLogic for ConsensusLogic {
    const STATE: NodeState = NodeState::Consensus;

    async fn on_event(&self, event: HandlerEvent) {
        match self.handle(event).await {
            Ok(DriverOutcome::NeedsSync) => self.resync("fell out of the voting window").await,
            Ok(_) => {}
            Err(e) => self.resync(&e.to_string()).await,
        }
    }

    async fn on_stop(&self) {
        self.driver.lock().await.detach();
    }
}
