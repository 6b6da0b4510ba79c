use async_trait::async_trait;
use etcd_client::{Client, Compare, CompareOp, Txn, TxnOp};
use quorum_types::{Block, BlockProof, ConsensusError, Hash, Height, Proposal, Result};
use tracing::{info, warn};

use crate::{hash_key, height_key, prepare_batch, BlockStorage, WriteBatch, LATEST_KEY};

/// Block store backed by etcd. Each block is written together with the
/// height index and the tip pointer in a single transaction guarded on the
/// tip it was built against.
pub struct EtcdBlockStorage {
    client: Client,
}

impl EtcdBlockStorage {
    pub async fn new(endpoints: Vec<String>) -> Result<Self> {
        let client = Client::connect(endpoints, None)
            .await
            .map_err(|e| ConsensusError::Storage(format!("Failed to connect to etcd: {}", e)))?;

        Ok(Self { client })
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut client = self.client.clone();
        let resp = client
            .get(key.as_bytes(), None)
            .await
            .map_err(|e| ConsensusError::Storage(format!("Failed to get {}: {}", key, e)))?;

        Ok(resp.kvs().first().map(|kv| kv.value().to_vec()))
    }

    async fn latest_height(&self) -> Result<Option<Height>> {
        let Some(value) = self.get(LATEST_KEY).await? else {
            return Ok(None);
        };

        let height = String::from_utf8_lossy(&value)
            .parse::<u64>()
            .map_err(|e| ConsensusError::Storage(format!("Failed to parse latest height: {}", e)))?;

        Ok(Some(Height(height)))
    }
}

#[async_trait]
impl BlockStorage for EtcdBlockStorage {
    async fn new_block(&self, proposal: &Proposal) -> Result<(Block, WriteBatch)> {
        let tip = self.latest_block().await?;
        prepare_batch(tip.as_ref(), proposal)
    }

    async fn apply(&self, batch: WriteBatch) -> Result<()> {
        let block = batch.block().clone();

        let guard = match batch.expected_tip {
            Some(_) => {
                let previous = block.height.previous()?;
                Compare::value(
                    LATEST_KEY,
                    CompareOp::Equal,
                    previous.value().to_string(),
                )
            }
            None => Compare::create_revision(LATEST_KEY, CompareOp::Equal, 0),
        };

        let ops = batch
            .entries
            .iter()
            .map(|(key, value)| TxnOp::put(key.as_bytes(), value.clone(), None))
            .collect::<Vec<_>>();

        let txn = Txn::new().when(vec![guard]).and_then(ops).or_else(vec![]);

        let mut client = self.client.clone();
        let resp = client
            .txn(txn)
            .await
            .map_err(|e| ConsensusError::Storage(format!("Failed to store block: {}", e)))?;

        if !resp.succeeded() {
            warn!("Tip moved before block height={} was stored", block.height);
            return Err(ConsensusError::Storage(format!(
                "tip moved while applying block {}",
                block.hash
            )));
        }

        info!("Stored block height={} hash={}", block.height, block.hash);

        Ok(())
    }

    async fn latest_block(&self) -> Result<Option<Block>> {
        match self.latest_height().await? {
            Some(height) => Ok(self.block_proof(height).await?.map(|proof| proof.block)),
            None => Ok(None),
        }
    }

    async fn block_proof(&self, height: Height) -> Result<Option<BlockProof>> {
        let Some(value) = self.get(&height_key(height)).await? else {
            return Ok(None);
        };

        let proof = serde_json::from_slice(&value)
            .map_err(|e| ConsensusError::Storage(format!("Failed to parse block: {}", e)))?;

        Ok(Some(proof))
    }

    async fn has_block(&self, hash: &Hash) -> Result<bool> {
        Ok(self.get(&hash_key(hash)).await?.is_some())
    }
}
