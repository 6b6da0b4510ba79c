use async_trait::async_trait;
use quorum_types::{NodeState, Result, Stage, VoteResult};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::checker::{check_vote_result, ResultPosition};
use crate::driver::{DriverOutcome, RoundDriver};
use crate::state::{Handler, HandlerEvent, StartContext, StateLogic};
use crate::timer::TimerId;

pub type JoiningState = Handler<JoiningLogic>;

/// INIT re-broadcasts without an INIT majority before the node assumes it
/// fell behind and resyncs.
pub const MAX_JOIN_ATTEMPTS: u32 = 5;

/// Announces the node to the other validators and takes part in the round
/// it lands in. An ACCEPT majority in a round this node opened through its
/// INIT majority hands over to consensus, which finalizes it.
pub struct JoiningLogic {
    driver: Arc<Mutex<RoundDriver>>,
    sender: mpsc::UnboundedSender<HandlerEvent>,
    attempts: AtomicU32,
}

impl JoiningLogic {
    pub fn new(driver: Arc<Mutex<RoundDriver>>, sender: mpsc::UnboundedSender<HandlerEvent>) -> Self {
        Self {
            driver,
            sender,
            attempts: AtomicU32::new(0),
        }
    }

    async fn start(&self, ctx: StartContext) -> Result<()> {
        self.attempts.store(0, Ordering::SeqCst);
        let mut driver = self.driver.lock().await;
        driver.attach(self.sender.clone());
        driver.broadcast_init().await?;
        let parts = driver.parts().clone();
        let home = parts.home.view().await;
        info!(node = %parts.ctx.address, height = %home.height, round = %home.round, "Joining");
        driver.set_timer(TimerId::JoinBroadcast, parts.ctx.policy.join_interval, home.height, home.round);
        drop(driver);

        if let Some(result) = ctx.vote_result {
            self.vote_result(result).await?;
        }
        Ok(())
    }

    async fn vote_result(&self, result: VoteResult) -> Result<()> {
        let mut driver = self.driver.lock().await;
        let home = driver.parts().home.view().await;

        if result.stage == Stage::Accept
            && result.got_majority()
            && check_vote_result(&home, &result) == ResultPosition::Current
        {
            // hand over only once this node saw the INIT majority of the round
            if driver.is_open(home.height, result.round) {
                info!(node = %driver.parts().ctx.address, "{} agreed while joining", result);
                driver.cancel_timer(TimerId::JoinBroadcast);
                driver
                    .parts()
                    .transition
                    .request(NodeState::Consensus, StartContext::with_vote_result(result));
                return Ok(());
            }
            debug!(node = %driver.parts().ctx.address, "{} arrived before its round opened", result);
        }

        let outcome = driver.on_vote_result(&result).await?;
        let round = driver.parts().home.round().await;
        if driver.is_open(home.height, round) {
            driver.cancel_timer(TimerId::JoinBroadcast);
        }
        self.follow(&driver, outcome);
        Ok(())
    }

    async fn rebroadcast(&self) -> Result<()> {
        let mut driver = self.driver.lock().await;
        let parts = driver.parts().clone();
        let home = parts.home.view().await;
        if driver.is_open(home.height, home.round) {
            return Ok(());
        }

        let attempts = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempts >= MAX_JOIN_ATTEMPTS {
            warn!(
                node = %parts.ctx.address,
                "No INIT majority after {} attempts; resyncing", attempts
            );
            parts.transition.request(NodeState::Syncing, StartContext::default());
            return Ok(());
        }

        debug!(node = %parts.ctx.address, attempt = attempts, "Re-broadcasting INIT");
        driver.broadcast_init().await?;
        driver.set_timer(TimerId::JoinBroadcast, parts.ctx.policy.join_interval, home.height, home.round);
        Ok(())
    }

    fn follow(&self, driver: &RoundDriver, outcome: DriverOutcome) {
        if outcome == DriverOutcome::NeedsSync {
            driver
                .parts()
                .transition
                .request(NodeState::Syncing, StartContext::default());
        }
    }

    async fn handle(&self, event: HandlerEvent) -> Result<()> {
        match event {
            HandlerEvent::Start(ctx) => self.start(ctx).await,
            HandlerEvent::VoteResult(result) => self.vote_result(result).await,
            HandlerEvent::Proposal(proposal) => {
                let mut driver = self.driver.lock().await;
                let outcome = driver.on_proposal(&proposal).await?;
                self.follow(&driver, outcome);
                Ok(())
            }
            HandlerEvent::Timeout {
                id: TimerId::JoinBroadcast,
                ..
            } => self.rebroadcast().await,
            HandlerEvent::Timeout {
                id: TimerId::Round,
                height,
                round,
            } => {
                let mut driver = self.driver.lock().await;
                let outcome = driver.on_timeout(height, round).await?;
                self.follow(&driver, outcome);
                Ok(())
            }
            HandlerEvent::Timeout { id, .. } => {
                debug!(?id, "Joining ignores timer");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl StateLogic for JoiningLogic {
    const STATE: NodeState = NodeState::Joining;

    async fn on_event(&self, event: HandlerEvent) {
        if let Err(e) = self.handle(event).await {
            let driver = self.driver.lock().await;
            warn!(node = %driver.parts().ctx.address, "Joining failed: {}; resyncing", e);
            driver
                .parts()
                .transition
                .request(NodeState::Syncing, StartContext::default());
        }
    }

    async fn on_stop(&self) {
        self.driver.lock().await.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{majority, rig, Rig};
    use quorum_types::{Hash, Height, Round};

    fn joining(rig: &Rig) -> (JoiningLogic, mpsc::UnboundedReceiver<HandlerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let driver = Arc::new(Mutex::new(RoundDriver::new(rig.parts.clone())));
        (JoiningLogic::new(driver, tx), rx)
    }

    fn join_timeout() -> HandlerEvent {
        HandlerEvent::Timeout {
            id: TimerId::JoinBroadcast,
            height: Height(0),
            round: Round(0),
        }
    }

    #[tokio::test]
    async fn test_gives_up_after_max_join_attempts() {
        let mut rig = rig(4);
        let (logic, _events) = joining(&rig);
        logic.on_event(HandlerEvent::Start(StartContext::default())).await;

        for _ in 1..MAX_JOIN_ATTEMPTS {
            logic.on_event(join_timeout()).await;
        }
        assert!(rig.no_request());
        assert_eq!(
            rig.broadcaster.ballots(Stage::Init).await.len(),
            MAX_JOIN_ATTEMPTS as usize
        );

        logic.on_event(join_timeout()).await;
        let (to, _) = rig.next_request().await.unwrap();
        assert_eq!(to, NodeState::Syncing);
    }

    #[tokio::test]
    async fn test_init_then_accept_hands_over_to_consensus() {
        let mut rig = rig(4);
        let (logic, _events) = joining(&rig);
        logic.on_event(HandlerEvent::Start(StartContext::default())).await;

        logic
            .on_event(HandlerEvent::VoteResult(majority(0, 0, Stage::Init, None)))
            .await;
        assert!(rig.no_request());

        let proposal = rig.proposal(&rig.keys[1], 0, 0, Hash::ZERO);
        rig.parts.pool.add(proposal.clone()).await;
        let accept = majority(0, 0, Stage::Accept, Some(&proposal));
        logic.on_event(HandlerEvent::VoteResult(accept.clone())).await;

        let (to, ctx) = rig.next_request().await.unwrap();
        assert_eq!(to, NodeState::Consensus);
        assert_eq!(ctx.vote_result, Some(accept));
        // consensus finalizes, not joining
        assert_eq!(rig.parts.home.height().await, Height(0));
    }

    #[tokio::test]
    async fn test_accept_before_init_does_not_hand_over() {
        let mut rig = rig(4);
        let (logic, _events) = joining(&rig);
        logic.on_event(HandlerEvent::Start(StartContext::default())).await;

        let proposal = rig.proposal(&rig.keys[1], 0, 0, Hash::ZERO);
        let accept = majority(0, 0, Stage::Accept, Some(&proposal));
        logic.on_event(HandlerEvent::VoteResult(accept)).await;

        // the decided block is unknown here, so the node resyncs
        let (to, _) = rig.next_request().await.unwrap();
        assert_eq!(to, NodeState::Syncing);
        assert!(rig.no_request());
        assert_eq!(rig.parts.home.height().await, Height(0));
    }

    #[tokio::test]
    async fn test_accept_before_init_with_known_proposal_stays_joining() {
        let mut rig = rig(4);
        let (logic, _events) = joining(&rig);
        logic.on_event(HandlerEvent::Start(StartContext::default())).await;

        let proposal = rig.proposal(&rig.keys[1], 0, 0, Hash::ZERO);
        rig.parts.pool.add(proposal.clone()).await;
        logic
            .on_event(HandlerEvent::VoteResult(majority(0, 0, Stage::Accept, Some(&proposal))))
            .await;

        assert!(rig.no_request());
        assert_eq!(rig.storage.len().await, 1);
        assert_eq!(rig.parts.home.height().await, Height(1));
    }
}
