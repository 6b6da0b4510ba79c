use async_trait::async_trait;
use chrono::Utc;
use quorum_crypto::KeyPair;
use quorum_network::{Broadcaster, NetworkClient, Outbound};
use quorum_storage::{build_block, BlockStorage, MemoryBlockStorage, WriteBatch};
use quorum_types::{
    Address, Ballot, Block, BlockProof, ConsensusError, ConsensusPolicy, Hash, Height, NodeInfo,
    NodeState, Proposal, ProposalBody, Result, Round, SignedMessage, Stage, VoteResult,
    VoteResultKind,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

use crate::ballotbox::Ballotbox;
use crate::components::Components;
use crate::context::NodeContext;
use crate::home_state::HomeState;
use crate::proposal_pool::ProposalPool;
use crate::proposer::FixedProposerSelector;
use crate::state::{StartContext, TransitionEvent, TransitionSender};
use crate::suffrage::Suffrage;
use crate::threshold::Threshold;

pub const NETWORK: &str = "consensus-test";

pub fn keypairs(count: usize) -> Vec<KeyPair> {
    (0..count).map(|_| KeyPair::generate()).collect()
}

/// Seals and records outbound messages without delivering them.
pub struct RecordingBroadcaster {
    key: KeyPair,
    sent: Mutex<Vec<SignedMessage>>,
}

impl RecordingBroadcaster {
    pub fn new(key: &KeyPair) -> Self {
        Self {
            key: key.clone(),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub async fn ballots(&self, stage: Stage) -> Vec<Ballot> {
        self.sent
            .lock()
            .await
            .iter()
            .filter_map(|m| match m {
                SignedMessage::Ballot(b) if b.body.stage == stage => Some(b.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Broadcaster for RecordingBroadcaster {
    async fn send(&self, message: Outbound, _excludes: &[Address]) -> Result<SignedMessage> {
        let network = NETWORK.as_bytes();
        let signed = match message {
            Outbound::Ballot(body) => self.key.seal(network, body)?.into_message(),
            Outbound::Proposal(body) => self.key.seal(network, body)?.into_message(),
        };
        self.sent.lock().await.push(signed.clone());
        Ok(signed)
    }
}

/// Answers node info and block requests from a fixed script.
#[derive(Default)]
pub struct ScriptedNetwork {
    pub infos: Mutex<Vec<NodeInfo>>,
    pub proofs: Mutex<Vec<BlockProof>>,
    pub block_requests: AtomicUsize,
}

impl ScriptedNetwork {
    pub fn block_requests(&self) -> usize {
        self.block_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NetworkClient for ScriptedNetwork {
    async fn propose(&self, _proposal: Proposal) -> Result<()> {
        Ok(())
    }

    async fn vote(&self, _ballot: Ballot) -> Result<()> {
        Ok(())
    }

    async fn request_node_info(&self, _addresses: &[Address]) -> Result<Vec<NodeInfo>> {
        Ok(self.infos.lock().await.clone())
    }

    async fn request_block_proof(&self, _block: &Hash, _addresses: &[Address]) -> Result<()> {
        Ok(())
    }

    async fn request_blocks(&self, from: Height, to: Height, _addresses: &[Address]) -> Result<Vec<BlockProof>> {
        self.block_requests.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .proofs
            .lock()
            .await
            .iter()
            .filter(|proof| proof.block.height >= from && proof.block.height <= to)
            .cloned()
            .collect())
    }
}

/// Storage whose reads always fail.
pub struct BrokenStorage;

#[async_trait]
impl BlockStorage for BrokenStorage {
    async fn new_block(&self, _proposal: &Proposal) -> Result<(Block, WriteBatch)> {
        Err(ConsensusError::Storage("disk unavailable".into()))
    }

    async fn apply(&self, _batch: WriteBatch) -> Result<()> {
        Err(ConsensusError::Storage("disk unavailable".into()))
    }

    async fn latest_block(&self) -> Result<Option<Block>> {
        Err(ConsensusError::Storage("disk unavailable".into()))
    }

    async fn block_proof(&self, _height: Height) -> Result<Option<BlockProof>> {
        Err(ConsensusError::Storage("disk unavailable".into()))
    }

    async fn has_block(&self, _hash: &Hash) -> Result<bool> {
        Err(ConsensusError::Storage("disk unavailable".into()))
    }
}

/// One node's parts: `keys[0]` is this node and `keys[1]` proposes every
/// round. Starts before genesis on empty memory storage.
pub struct Rig {
    pub keys: Vec<KeyPair>,
    pub parts: Components,
    pub broadcaster: Arc<RecordingBroadcaster>,
    pub network: Arc<ScriptedNetwork>,
    pub storage: Arc<MemoryBlockStorage>,
    pub transitions: mpsc::UnboundedReceiver<TransitionEvent>,
}

pub fn rig(total: usize) -> Rig {
    let keys = keypairs(total);
    let me = keys[0].address().clone();
    let mut policy = ConsensusPolicy::new(NETWORK, total, 75)
        .unwrap()
        .with_round_timeout(Duration::from_secs(30))
        .with_join_interval(Duration::from_secs(30));
    policy.sync_retry_interval = Duration::from_millis(10);

    let suffrage = Suffrage::new(
        keys.iter().map(|k| k.address().clone()).collect::<Vec<_>>(),
        Arc::new(FixedProposerSelector::new(keys[1].address().clone())),
    )
    .unwrap();
    let (tx, transitions) = mpsc::unbounded_channel();
    let broadcaster = Arc::new(RecordingBroadcaster::new(&keys[0]));
    let network = Arc::new(ScriptedNetwork::default());
    let storage = Arc::new(MemoryBlockStorage::new());

    let parts = Components {
        ctx: NodeContext::new(me.clone(), policy.clone()).unwrap(),
        home: Arc::new(HomeState::new(me)),
        suffrage,
        ballotbox: Arc::new(Ballotbox::new(Threshold::from_policy(&policy).unwrap())),
        pool: Arc::new(ProposalPool::new()),
        storage: Arc::clone(&storage) as Arc<dyn BlockStorage>,
        broadcaster: Arc::clone(&broadcaster) as Arc<dyn Broadcaster>,
        network: Arc::clone(&network) as Arc<dyn NetworkClient>,
        transition: TransitionSender::from_sender(tx),
    };

    Rig {
        keys,
        parts,
        broadcaster,
        network,
        storage,
        transitions,
    }
}

impl Rig {
    pub fn proposal(&self, signer: &KeyPair, height: u64, round: u64, current_block: Hash) -> Proposal {
        signer
            .seal(
                NETWORK.as_bytes(),
                ProposalBody::new(signer.address().clone(), Height(height), Round(round), current_block),
            )
            .unwrap()
    }

    /// Finalized chain of `len` blocks proposed by the round proposer.
    pub fn chain(&self, len: u64) -> Vec<BlockProof> {
        let mut proofs = Vec::new();
        let mut previous = Hash::ZERO;
        for height in 0..len {
            let proposal = self.proposal(&self.keys[1], height, 0, previous);
            let block = build_block(&proposal).unwrap();
            previous = block.hash;
            proofs.push(BlockProof { block, proposal });
        }
        proofs
    }

    pub fn peer_at(&self, height: u64) -> NodeInfo {
        NodeInfo {
            address: self.keys[1].address().clone(),
            public_key: self.keys[1].public_key(),
            network_id: NETWORK.to_string(),
            started_at: Utc::now(),
            block: Hash::ZERO,
            height: Height(height),
            state: NodeState::Consensus,
        }
    }

    /// Next state change requested, skipping routed events.
    pub async fn next_request(&mut self) -> Option<(NodeState, StartContext)> {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(2), self.transitions.recv())
                .await
                .ok()??;
            if let TransitionEvent::ChangeState { to, ctx } = event {
                return Some((to, ctx));
            }
        }
    }

    pub fn no_request(&mut self) -> bool {
        loop {
            match self.transitions.try_recv() {
                Ok(TransitionEvent::ChangeState { .. }) => return false,
                Ok(_) => continue,
                Err(_) => return true,
            }
        }
    }
}

pub fn majority(height: u64, round: u64, stage: Stage, proposal: Option<&Proposal>) -> VoteResult {
    let (current_block, next_block) = match proposal {
        Some(p) => (p.body.current_block, build_block(p).unwrap().hash),
        None => (Hash::ZERO, Hash::ZERO),
    };
    VoteResult {
        bucket: Hash([stage.as_u8(); 32]),
        height: Height(height),
        round: Round(round),
        stage,
        proposal: proposal.map(|p| p.hash),
        current_block,
        next_block,
        kind: VoteResultKind::GotMajority,
    }
}
