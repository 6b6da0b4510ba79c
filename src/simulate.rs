use chrono::Utc;
use quorum_consensus::{ConsensusNode, DefaultProposerSelector, NodeBuilder, NodeContext, Suffrage};
use quorum_crypto::KeyPair;
use quorum_network::{ChannelEndpoint, ChannelNetwork, NetworkClient, SealBroadcaster, Transport};
use quorum_storage::{BlockStorage, MemoryBlockStorage};
use quorum_types::{Address, Block, ConsensusError, ConsensusPolicy, Height, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const NETWORK_ID: &str = "quorum-simulation";

struct SimulatedNode {
    address: Address,
    node: ConsensusNode,
    storage: Arc<MemoryBlockStorage>,
    _endpoint: Arc<ChannelEndpoint>,
}

/// Chains finalized by each validator of a simulated cluster.
pub struct SimulationReport {
    pub chains: Vec<(Address, Vec<Block>)>,
    pub elapsed: Duration,
}

impl SimulationReport {
    /// Whether every validator holds a prefix of the longest chain.
    pub fn consistent(&self) -> bool {
        let Some(longest) = self.chains.iter().map(|(_, c)| c).max_by_key(|c| c.len()) else {
            return true;
        };
        self.chains
            .iter()
            .all(|(_, chain)| chain.iter().zip(longest.iter()).all(|(a, b)| a == b))
    }
}

async fn spawn_node(
    network: &ChannelNetwork,
    policy: &ConsensusPolicy,
    validators: &[Address],
    key: &KeyPair,
) -> Result<SimulatedNode> {
    let address = key.address().clone();
    let ctx = NodeContext::new(address.clone(), policy.clone())?;
    let selector = DefaultProposerSelector::new(validators.to_vec())?;
    let suffrage = Suffrage::new(validators.to_vec(), Arc::new(selector))?;
    let storage = Arc::new(MemoryBlockStorage::new());

    let builder = NodeBuilder::new(ctx, suffrage, Arc::clone(&storage) as Arc<dyn BlockStorage>)?;
    let service = builder.service(key.public_key(), Utc::now());
    let endpoint = Arc::new(
        network
            .join(address.clone(), NETWORK_ID, service, builder.inbound())
            .await,
    );
    let broadcaster = SealBroadcaster::new(
        key.clone(),
        NETWORK_ID,
        validators.to_vec(),
        Arc::clone(&endpoint) as Arc<dyn Transport>,
    );
    let node = builder
        .build(
            Arc::new(broadcaster),
            Arc::clone(&endpoint) as Arc<dyn NetworkClient>,
        )
        .await?;

    Ok(SimulatedNode {
        address,
        node,
        storage,
        _endpoint: endpoint,
    })
}

/// Runs `total` validators over the channel network until each has
/// finalized `heights` blocks or `timeout` passes.
pub async fn run_simulation(
    total: usize,
    heights: u64,
    percent: u32,
    timeout: Duration,
) -> Result<SimulationReport> {
    let policy = ConsensusPolicy::new(NETWORK_ID, total, percent)?
        .with_round_timeout(Duration::from_secs(1))
        .with_join_interval(Duration::from_millis(250));
    let keys: Vec<KeyPair> = (0..total).map(|_| KeyPair::generate()).collect();
    let validators: Vec<Address> = keys.iter().map(|k| k.address().clone()).collect();

    let network = ChannelNetwork::new();
    let mut nodes = Vec::with_capacity(total);
    for key in keys.iter() {
        nodes.push(spawn_node(&network, &policy, &validators, key).await?);
    }

    info!("Simulating {} validators for {} heights", total, heights);
    let started = tokio::time::Instant::now();
    for member in nodes.iter() {
        member.node.start().await?;
    }

    let target = Height(heights);
    let deadline = started + timeout;
    let mut reached = false;
    while tokio::time::Instant::now() < deadline {
        let mut lowest = None;
        for member in nodes.iter() {
            let height = member.node.home().height().await;
            lowest = Some(lowest.map_or(height, |h: Height| h.min(height)));
        }
        if lowest.map_or(false, |h| h >= target) {
            reached = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let elapsed = started.elapsed();

    for member in nodes.iter() {
        member.node.stop().await?;
    }

    let mut chains = Vec::with_capacity(nodes.len());
    for member in nodes.iter() {
        chains.push((member.address.clone(), member.storage.blocks().await));
    }

    if !reached {
        return Err(ConsensusError::Network(format!(
            "cluster did not reach height {} within {:?}",
            heights, timeout
        )));
    }
    Ok(SimulationReport { chains, elapsed })
}
