use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use quorum_types::{Block, BlockProof, ConsensusError, Hash, Height, Proposal, Result};
use tokio::sync::RwLock;
use tracing::info;

use crate::{prepare_batch, BlockStorage, WriteBatch};

#[derive(Default)]
struct Chain {
    by_height: BTreeMap<Height, BlockProof>,
    by_hash: HashMap<Hash, Height>,
}

/// Block store kept entirely in memory. Used by tests and the local
/// simulation.
#[derive(Default)]
pub struct MemoryBlockStorage {
    chain: RwLock<Chain>,
}

impl MemoryBlockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.chain.read().await.by_height.len()
    }

    pub async fn blocks(&self) -> Vec<Block> {
        let chain = self.chain.read().await;
        chain.by_height.values().map(|proof| proof.block.clone()).collect()
    }
}

#[async_trait]
impl BlockStorage for MemoryBlockStorage {
    async fn new_block(&self, proposal: &Proposal) -> Result<(Block, WriteBatch)> {
        let chain = self.chain.read().await;
        let tip = chain.by_height.values().next_back().map(|proof| &proof.block);
        prepare_batch(tip, proposal)
    }

    async fn apply(&self, batch: WriteBatch) -> Result<()> {
        let mut chain = self.chain.write().await;

        let tip = chain.by_height.values().next_back().map(|proof| proof.block.hash);
        if tip != batch.expected_tip {
            return Err(ConsensusError::Storage(format!(
                "tip moved while applying block {}",
                batch.block().hash
            )));
        }

        let block = batch.proof.block.clone();
        chain.by_hash.insert(block.hash, block.height);
        chain.by_height.insert(block.height, batch.proof);

        info!("Stored block height={} hash={}", block.height, block.hash);

        Ok(())
    }

    async fn latest_block(&self) -> Result<Option<Block>> {
        let chain = self.chain.read().await;
        Ok(chain.by_height.values().next_back().map(|proof| proof.block.clone()))
    }

    async fn block_proof(&self, height: Height) -> Result<Option<BlockProof>> {
        let chain = self.chain.read().await;
        Ok(chain.by_height.get(&height).cloned())
    }

    async fn has_block(&self, hash: &Hash) -> Result<bool> {
        let chain = self.chain.read().await;
        Ok(chain.by_hash.contains_key(hash))
    }
}
