use async_trait::async_trait;
use quorum_crypto::verify_seal;
use quorum_types::{Address, BlockProof, ConsensusError, Height, NodeState, Result, Round};
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::components::Components;
use crate::state::{Handler, HandlerEvent, StartContext, StateLogic};
use crate::timer::{TimerId, TimerManager};

pub type SyncingState = Handler<SyncingLogic>;

/// Failed attempts in a row before the node gives up and rejoins at its
/// current height.
pub const MAX_SYNC_FAILURES: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncStep {
    CaughtUp,
    Applied(usize),
}

/// Catches the node up with the highest validator it can reach, one batch
/// of finalized blocks at a time, then hands over to joining.
pub struct SyncingLogic {
    parts: Components,
    sender: mpsc::UnboundedSender<HandlerEvent>,
    timers: Mutex<TimerManager<HandlerEvent>>,
    failures: AtomicU32,
}

impl SyncingLogic {
    pub fn new(parts: Components, sender: mpsc::UnboundedSender<HandlerEvent>) -> Self {
        Self {
            parts,
            timers: Mutex::new(TimerManager::new(sender.clone())),
            sender,
            failures: AtomicU32::new(0),
        }
    }

    fn peers(&self) -> Vec<Address> {
        let me = &self.parts.ctx.address;
        self.parts
            .suffrage
            .validators()
            .into_iter()
            .filter(|address| address != me)
            .collect()
    }

    async fn sync_once(&self) -> Result<SyncStep> {
        let peers = self.peers();
        if peers.is_empty() {
            return Ok(SyncStep::CaughtUp);
        }

        let home = self.parts.home.view().await;
        let network_id = &self.parts.ctx.policy.network_id;
        let infos: Vec<_> = self
            .parts
            .network
            .request_node_info(&peers)
            .await?
            .into_iter()
            .filter(|info| {
                let same = &info.network_id == network_id;
                if !same {
                    debug!("Ignoring {} from network {}", info, info.network_id);
                }
                same
            })
            .collect();

        let Some(target) = infos.iter().map(|info| info.height).max() else {
            return Ok(SyncStep::CaughtUp);
        };
        if target <= home.height {
            return Ok(SyncStep::CaughtUp);
        }

        let ahead: Vec<Address> = infos
            .iter()
            .filter(|info| info.height > home.height)
            .map(|info| info.address.clone())
            .collect();
        // a peer at height h has finalized up to h - 1
        let last = target.previous()?;
        info!(
            node = %self.parts.ctx.address,
            "Syncing blocks {}..={} from {} peers", home.height, last, ahead.len()
        );

        let proofs = self
            .parts
            .network
            .request_blocks(home.height, last, &ahead)
            .await?;
        if proofs.is_empty() {
            return Err(ConsensusError::Network(format!(
                "no peer served blocks from height {}",
                home.height
            )));
        }

        let mut applied = 0;
        for proof in proofs {
            self.apply_proof(&proof, &ahead).await?;
            applied += 1;
        }
        Ok(SyncStep::Applied(applied))
    }

    async fn apply_proof(&self, proof: &BlockProof, peers: &[Address]) -> Result<()> {
        let home = self.parts.home.view().await;
        let proposal = &proof.proposal;

        if proof.block.height != home.height {
            return Err(ConsensusError::HeightOutOfWindow {
                home: home.height,
                got: proof.block.height,
            });
        }
        if proposal.body.current_block != home.current_block {
            return Err(ConsensusError::BlockMismatch {
                height: proof.block.height,
                expected: home.current_block,
                got: proposal.body.current_block,
            });
        }

        verify_seal(self.parts.ctx.network_id(), proposal)?;
        let body = &proposal.body;
        if proposal.signer != body.proposer || !self.parts.suffrage.is_validator(&proposal.signer) {
            return Err(ConsensusError::InvalidSeal {
                hash: proposal.hash,
                reason: format!("{} can not propose for {}", proposal.signer, body.proposer),
            });
        }
        let expected = self.parts.suffrage.proposer(body.height, body.round);
        if expected != body.proposer {
            return Err(ConsensusError::InvalidSeal {
                hash: proposal.hash,
                reason: format!("{} is not the proposer, {} is", body.proposer, expected),
            });
        }
        self.parts
            .network
            .request_block_proof(&proof.block.hash, peers)
            .await?;

        let (block, batch) = self.parts.storage.new_block(proposal).await?;
        if block.hash != proof.block.hash {
            return Err(ConsensusError::BlockMismatch {
                height: block.height,
                expected: proof.block.hash,
                got: block.hash,
            });
        }

        self.parts.storage.apply(batch).await?;
        self.parts.home.advance(&block).await?;
        self.parts.ctx.metrics.blocks_finalized.inc();
        self.parts.ballotbox.clean(block.height).await;
        self.parts.pool.clean(block.height.next()?).await;
        debug!(node = %self.parts.ctx.address, "Synced {}", block);
        Ok(())
    }

    async fn step(&self) {
        match self.sync_once().await {
            Ok(SyncStep::CaughtUp) => {
                let home = self.parts.home.view().await;
                info!(node = %self.parts.ctx.address, height = %home.height, "Caught up");
                self.parts
                    .transition
                    .request(NodeState::Joining, StartContext::default());
            }
            Ok(SyncStep::Applied(count)) => {
                // keep pulling until peers report nothing newer
                self.failures.store(0, Ordering::SeqCst);
                debug!(node = %self.parts.ctx.address, "Applied {} blocks", count);
                let _ = self.sender.send(retry_event());
            }
            Err(e) => {
                let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= MAX_SYNC_FAILURES {
                    warn!(
                        node = %self.parts.ctx.address,
                        "Sync failed {} times ({}); rejoining", failures, e
                    );
                    self.parts
                        .transition
                        .request(NodeState::Joining, StartContext::default());
                    return;
                }
                warn!(node = %self.parts.ctx.address, "Sync failed: {}", e);
                self.timers.lock().await.set_timer(
                    TimerId::SyncRetry,
                    self.parts.ctx.policy.sync_retry_interval,
                    retry_event(),
                );
            }
        }
    }
}

fn retry_event() -> HandlerEvent {
    HandlerEvent::Timeout {
        id: TimerId::SyncRetry,
        height: Height::GENESIS,
        round: Round::ZERO,
    }
}

#[async_trait]
impl StateLogic for SyncingLogic {
    const STATE: NodeState = NodeState::Syncing;

    async fn on_event(&self, event: HandlerEvent) {
        match event {
            HandlerEvent::Start(_) => {
                self.failures.store(0, Ordering::SeqCst);
                self.step().await
            }
            HandlerEvent::Timeout {
                id: TimerId::SyncRetry,
                ..
            } => self.step().await,
            other => debug!("Syncing ignores {:?}", other),
        }
    }

    async fn on_stop(&self) {
        self.timers.lock().await.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{rig, Rig};
    use quorum_types::Hash;

    fn syncing(rig: &Rig) -> (SyncingLogic, mpsc::UnboundedReceiver<HandlerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (SyncingLogic::new(rig.parts.clone(), tx), rx)
    }

    async fn serve(rig: &Rig, proofs: Vec<BlockProof>, peer_height: u64) {
        *rig.network.proofs.lock().await = proofs;
        *rig.network.infos.lock().await = vec![rig.peer_at(peer_height)];
    }

    #[tokio::test]
    async fn test_applies_proofs_then_rejoins() {
        let mut rig = rig(4);
        let proofs = rig.chain(3);
        serve(&rig, proofs.clone(), 3).await;
        let (logic, mut events) = syncing(&rig);

        logic.on_event(HandlerEvent::Start(StartContext::default())).await;
        assert_eq!(rig.storage.len().await, 3);
        assert_eq!(rig.parts.home.height().await, Height(3));
        assert!(rig.no_request());

        // the applied batch queues another pass, which finds nothing newer
        let retry = events.recv().await.unwrap();
        logic.on_event(retry).await;
        let (to, _) = rig.next_request().await.unwrap();
        assert_eq!(to, NodeState::Joining);
        let served: Vec<_> = proofs.into_iter().map(|proof| proof.block).collect();
        assert_eq!(rig.storage.blocks().await, served);
    }

    #[tokio::test]
    async fn test_rejects_proof_with_wrong_block_hash() {
        let rig = rig(4);
        let (logic, _events) = syncing(&rig);
        let mut proof = rig.chain(1).remove(0);
        proof.block.hash = Hash([0xEE; 32]);

        let peers = vec![rig.keys[1].address().clone()];
        assert!(matches!(
            logic.apply_proof(&proof, &peers).await,
            Err(ConsensusError::BlockMismatch { .. })
        ));
        assert_eq!(rig.storage.len().await, 0);
        assert_eq!(rig.parts.home.height().await, Height(0));
    }

    #[tokio::test]
    async fn test_rejects_proof_from_wrong_signer() {
        let rig = rig(4);
        let (logic, _events) = syncing(&rig);
        let peers = vec![rig.keys[1].address().clone()];

        let stranger = quorum_crypto::KeyPair::generate();
        let outsider = rig.proposal(&stranger, 0, 0, Hash::ZERO);
        // a validator, but not the selected proposer
        let validator = rig.proposal(&rig.keys[2], 0, 0, Hash::ZERO);

        for proposal in [outsider, validator] {
            let proof = BlockProof {
                block: quorum_storage::build_block(&proposal).unwrap(),
                proposal,
            };
            assert!(matches!(
                logic.apply_proof(&proof, &peers).await,
                Err(ConsensusError::InvalidSeal { .. })
            ));
        }
        assert_eq!(rig.storage.len().await, 0);
    }

    #[tokio::test]
    async fn test_rejoins_after_max_sync_failures() {
        let mut rig = rig(4);
        let mut chain = rig.chain(2);
        chain[0].block.hash = Hash([0xEE; 32]);
        serve(&rig, chain, 2).await;
        let (logic, _events) = syncing(&rig);

        logic.on_event(HandlerEvent::Start(StartContext::default())).await;
        for _ in 1..MAX_SYNC_FAILURES {
            assert!(rig.no_request());
            logic.on_event(retry_event()).await;
        }

        let (to, _) = rig.next_request().await.unwrap();
        assert_eq!(to, NodeState::Joining);
        assert_eq!(rig.network.block_requests(), MAX_SYNC_FAILURES as usize);
        assert_eq!(rig.storage.len().await, 0);
    }

    #[tokio::test]
    async fn test_failure_count_resets() {
        let rig = rig(4);
        serve(&rig, rig.chain(1), 1).await;
        let (logic, _events) = syncing(&rig);

        logic.failures.store(MAX_SYNC_FAILURES - 1, Ordering::SeqCst);
        logic.on_event(retry_event()).await;
        assert_eq!(rig.storage.len().await, 1);
        assert_eq!(logic.failures.load(Ordering::SeqCst), 0);

        logic.failures.store(MAX_SYNC_FAILURES - 1, Ordering::SeqCst);
        logic.on_event(HandlerEvent::Start(StartContext::default())).await;
        assert_eq!(logic.failures.load(Ordering::SeqCst), 0);
    }
}
