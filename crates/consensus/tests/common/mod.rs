//! Shared fixtures for consensus integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use quorum_consensus::{
    Ballotbox, Components, ConsensusNode, DefaultProposerSelector, FixedProposerSelector,
    HomeState, NodeBuilder, NodeContext, ProposalPool, Suffrage, Threshold, TransitionSender,
};
use quorum_crypto::KeyPair;
use quorum_network::{
    Broadcaster, ChannelEndpoint, ChannelNetwork, NetworkClient, Outbound, SealBroadcaster,
};
use quorum_storage::{build_block, BlockStorage, MemoryBlockStorage, WriteBatch};
use quorum_types::{
    Address, Ballot, Block, BlockProof, ConsensusError, ConsensusPolicy, Hash, Height, NodeInfo,
    Proposal, Result, Round, SignedMessage,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

pub const NETWORK: &str = "quorum-test";

pub fn keypairs(count: usize) -> Vec<KeyPair> {
    (0..count).map(|_| KeyPair::generate()).collect()
}

pub fn addresses(keys: &[KeyPair]) -> Vec<Address> {
    keys.iter().map(|k| k.address().clone()).collect()
}

pub fn policy(total: usize, percent: u32) -> ConsensusPolicy {
    let mut policy = ConsensusPolicy::new(NETWORK, total, percent)
        .unwrap()
        .with_round_timeout(Duration::from_millis(800))
        .with_join_interval(Duration::from_millis(150));
    policy.sync_retry_interval = Duration::from_millis(100);
    policy
}

/// Block at `height` whose hash is derived from the height alone.
pub fn tip(height: u64) -> Block {
    Block {
        height: Height(height),
        round: Round(0),
        proposal: Hash([0xAA; 32]),
        previous: Hash([height as u8; 32]),
        hash: Hash([(height + 1) as u8; 32]),
    }
}

/// Seals messages like the real broadcaster but only records them.
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

    pub async fn ballots(&self) -> Vec<Ballot> {
        self.sent
            .lock()
            .await
            .iter()
            .filter_map(|m| match m {
                SignedMessage::Ballot(b) => Some(b.clone()),
                SignedMessage::Proposal(_) => None,
            })
            .collect()
    }

    pub async fn proposals(&self) -> Vec<Proposal> {
        self.sent
            .lock()
            .await
            .iter()
            .filter_map(|m| match m {
                SignedMessage::Proposal(p) => Some(p.clone()),
                SignedMessage::Ballot(_) => None,
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

pub struct IsolatedNetwork;

#[async_trait]
impl NetworkClient for IsolatedNetwork {
    async fn propose(&self, _proposal: Proposal) -> Result<()> {
        Ok(())
    }

    async fn vote(&self, _ballot: Ballot) -> Result<()> {
        Ok(())
    }

    async fn request_node_info(&self, _addresses: &[Address]) -> Result<Vec<NodeInfo>> {
        Ok(Vec::new())
    }

    async fn request_block_proof(&self, block: &Hash, _addresses: &[Address]) -> Result<()> {
        Err(ConsensusError::Network(format!("no peer holds {}", block)))
    }

    async fn request_blocks(&self, _from: Height, _to: Height, _addresses: &[Address]) -> Result<Vec<BlockProof>> {
        Ok(Vec::new())
    }
}

/// Builds blocks from any proposal without checking the chain tip, for
/// driving a node that starts mid-chain.
#[derive(Default)]
pub struct DetachedStorage {
    applied: Mutex<Vec<Block>>,
}

impl DetachedStorage {
    pub async fn applied(&self) -> Vec<Block> {
        self.applied.lock().await.clone()
    }
}

#[async_trait]
impl BlockStorage for DetachedStorage {
    async fn new_block(&self, proposal: &Proposal) -> Result<(Block, WriteBatch)> {
        let block = build_block(proposal)?;
        let batch = WriteBatch {
            proof: BlockProof {
                block: block.clone(),
                proposal: proposal.clone(),
            },
            expected_tip: None,
            entries: Vec::new(),
        };
        Ok((block, batch))
    }

    async fn apply(&self, batch: WriteBatch) -> Result<()> {
        self.applied.lock().await.push(batch.proof.block);
        Ok(())
    }

    async fn latest_block(&self) -> Result<Option<Block>> {
        Ok(self.applied.lock().await.last().cloned())
    }

    async fn block_proof(&self, _height: Height) -> Result<Option<BlockProof>> {
        Ok(None)
    }

    async fn has_block(&self, hash: &Hash) -> Result<bool> {
        Ok(self.applied.lock().await.iter().any(|b| &b.hash == hash))
    }
}

/// One node's parts wired to recording collaborators, positioned right
/// after `tip(height - 1)`.
pub struct Harness {
    pub keys: Vec<KeyPair>,
    pub parts: Components,
    pub broadcaster: Arc<RecordingBroadcaster>,
    pub storage: Arc<DetachedStorage>,
    pub transitions: mpsc::UnboundedReceiver<quorum_consensus::state::TransitionEvent>,
}

pub async fn harness(total: usize, percent: u32, height: u64) -> Harness {
    let keys = keypairs(total);
    let me = keys[0].address().clone();
    let policy = policy(total, percent);
    let ctx = NodeContext::new(me.clone(), policy.clone()).unwrap();
    let suffrage = Suffrage::new(
        addresses(&keys),
        Arc::new(FixedProposerSelector::new(keys[1].address().clone())),
    )
    .unwrap();

    let home = Arc::new(HomeState::new(me));
    if height > 0 {
        home.reset_to(Some(&tip(height - 1))).await.unwrap();
    }

    let (tx, transitions) = mpsc::unbounded_channel();
    let broadcaster = Arc::new(RecordingBroadcaster::new(&keys[0]));
    let storage = Arc::new(DetachedStorage::default());
    let parts = Components {
        ctx,
        home,
        suffrage,
        ballotbox: Arc::new(Ballotbox::new(Threshold::from_policy(&policy).unwrap())),
        pool: Arc::new(ProposalPool::new()),
        storage: Arc::clone(&storage) as Arc<dyn BlockStorage>,
        broadcaster: Arc::clone(&broadcaster) as Arc<dyn Broadcaster>,
        network: Arc::new(IsolatedNetwork),
        transition: TransitionSender::from_sender(tx),
    };

    Harness {
        keys,
        parts,
        broadcaster,
        storage,
        transitions,
    }
}

pub struct ClusterNode {
    pub address: Address,
    pub node: ConsensusNode,
    pub storage: Arc<MemoryBlockStorage>,
    pub endpoint: Arc<ChannelEndpoint>,
}

/// Validators connected through one in-process channel network.
pub struct Cluster {
    pub network: ChannelNetwork,
    pub keys: Vec<KeyPair>,
    pub nodes: Vec<ClusterNode>,
}

impl Cluster {
    pub async fn new(total: usize, percent: u32) -> Self {
        let keys = keypairs(total);
        let network = ChannelNetwork::new();
        let mut nodes = Vec::with_capacity(total);
        for key in keys.iter() {
            nodes.push(Self::node(&network, &keys, key, percent, Arc::new(MemoryBlockStorage::new())).await);
        }
        Self { network, keys, nodes }
    }

    pub async fn node(
        network: &ChannelNetwork,
        keys: &[KeyPair],
        key: &KeyPair,
        percent: u32,
        storage: Arc<MemoryBlockStorage>,
    ) -> ClusterNode {
        let validators = addresses(keys);
        let address = key.address().clone();
        let ctx = NodeContext::new(address.clone(), policy(keys.len(), percent)).unwrap();
        let suffrage = Suffrage::new(
            validators.clone(),
            Arc::new(DefaultProposerSelector::new(validators.clone()).unwrap()),
        )
        .unwrap();

        let builder = NodeBuilder::new(ctx, suffrage, Arc::clone(&storage) as Arc<dyn BlockStorage>).unwrap();
        let service = builder.service(key.public_key(), Utc::now());
        let endpoint = Arc::new(
            network
                .join(address.clone(), NETWORK, service, builder.inbound())
                .await,
        );
        let broadcaster = Arc::new(SealBroadcaster::new(
            key.clone(),
            NETWORK,
            validators,
            Arc::clone(&endpoint) as Arc<dyn quorum_network::Transport>,
        ));
        let node = builder
            .build(broadcaster, Arc::clone(&endpoint) as Arc<dyn NetworkClient>)
            .await
            .unwrap();

        ClusterNode {
            address,
            node,
            storage,
            endpoint,
        }
    }

    pub async fn start(&self) {
        for member in self.nodes.iter() {
            member.node.start().await.unwrap();
        }
    }

    pub async fn stop(&self) {
        for member in self.nodes.iter() {
            let _ = member.node.stop().await;
        }
    }
}

/// Polls `check` until it holds or `timeout` passes.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
