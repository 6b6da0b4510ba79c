//! Block storage contract used by the round driver, plus the in-memory and
//! etcd-backed stores that implement it.

pub mod etcd;
pub mod memory;

pub use etcd::EtcdBlockStorage;
pub use memory::MemoryBlockStorage;

use async_trait::async_trait;
use quorum_crypto::hash_data;
use quorum_types::{Block, BlockProof, ConsensusError, Hash, Height, Proposal, Result};

#[derive(Debug, Clone)]
pub struct WriteBatch {
    pub proof: BlockProof,
    /// Parent the batch was built against; apply fails if the tip moved.
    pub expected_tip: Option<Hash>,
    pub entries: Vec<(String, Vec<u8>)>,
}

impl WriteBatch {
    pub fn block(&self) -> &Block {
        &self.proof.block
    }
}

#[async_trait]
pub trait BlockStorage: Send + Sync {
    /// Builds the block for `proposal` on top of the current tip without
    /// persisting anything.
    async fn new_block(&self, proposal: &Proposal) -> Result<(Block, WriteBatch)>;

    /// Applies a batch from [`BlockStorage::new_block`] atomically.
    async fn apply(&self, batch: WriteBatch) -> Result<()>;

    async fn latest_block(&self) -> Result<Option<Block>>;

    async fn block_proof(&self, height: Height) -> Result<Option<BlockProof>>;

    async fn has_block(&self, hash: &Hash) -> Result<bool>;
}

pub(crate) const LATEST_KEY: &str = "/blocks/latest";

pub(crate) fn height_key(height: Height) -> String {
    format!("/blocks/height/{:020}", height.value())
}

pub(crate) fn hash_key(hash: &Hash) -> String {
    format!("/blocks/hash/{}", hash.to_hex())
}

/// Derives the block a proposal produces. Every node computes the same
/// block from the same proposal.
pub fn build_block(proposal: &Proposal) -> Result<Block> {
    let body = &proposal.body;
    let canonical = Block::canonical_bytes(body.height, body.round, &proposal.hash, &body.current_block)?;
    Ok(Block {
        height: body.height,
        round: body.round,
        proposal: proposal.hash,
        previous: body.current_block,
        hash: hash_data(&canonical),
    })
}

/// Checks `proposal` extends `tip` and prepares the batch for it.
pub fn prepare_batch(tip: Option<&Block>, proposal: &Proposal) -> Result<(Block, WriteBatch)> {
    let (expected_height, expected_previous) = match tip {
        Some(tip) => (tip.height.next()?, tip.hash),
        None => (Height::GENESIS, Hash::ZERO),
    };

    let body = &proposal.body;
    if body.height != expected_height {
        return Err(ConsensusError::HeightOutOfWindow {
            home: expected_height,
            got: body.height,
        });
    }
    if body.current_block != expected_previous {
        return Err(ConsensusError::BlockMismatch {
            height: body.height,
            expected: expected_previous,
            got: body.current_block,
        });
    }

    let block = build_block(proposal)?;
    let proof = BlockProof {
        block: block.clone(),
        proposal: proposal.clone(),
    };

    let encoded = serde_json::to_vec(&proof)
        .map_err(|e| ConsensusError::Storage(format!("Failed to serialize block: {}", e)))?;
    let entries = vec![
        (height_key(block.height), encoded),
        (hash_key(&block.hash), block.height.value().to_string().into_bytes()),
        (LATEST_KEY.to_string(), block.height.value().to_string().into_bytes()),
    ];

    Ok((
        block,
        WriteBatch {
            proof,
            expected_tip: tip.map(|tip| tip.hash),
            entries,
        },
    ))
}


#[cfg(test)]
mod tests {
    use super::test_support::proposal;
    use super::*;
    use quorum_crypto::KeyPair;

    #[test]
    fn test_build_block_is_deterministic() {
        let keypair = KeyPair::generate();
        let proposal = proposal(&keypair, 0, Hash::ZERO);

        let first = build_block(&proposal).unwrap();
        let second = build_block(&proposal).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.proposal, proposal.hash);
        assert_eq!(first.previous, Hash::ZERO);
    }

    #[test]
    fn test_prepare_batch_rejects_wrong_parent() {
        let keypair = KeyPair::generate();
        let genesis = build_block(&proposal(&keypair, 0, Hash::ZERO)).unwrap();

        let wrong_parent = proposal(&keypair, 1, Hash([3u8; 32]));
        assert!(matches!(
            prepare_batch(Some(&genesis), &wrong_parent),
            Err(ConsensusError::BlockMismatch { .. })
        ));

        let wrong_height = proposal(&keypair, 2, genesis.hash);
        assert!(matches!(
            prepare_batch(Some(&genesis), &wrong_height),
            Err(ConsensusError::HeightOutOfWindow { .. })
        ));

        assert!(prepare_batch(Some(&genesis), &proposal(&keypair, 1, genesis.hash)).is_ok());
    }
}
