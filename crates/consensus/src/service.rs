use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quorum_network::PeerService;
use quorum_storage::BlockStorage;
use quorum_types::{BlockProof, Hash, Height, NodeInfo, Result};
use std::sync::Arc;

use crate::home_state::HomeState;

pub struct NodeService {
    home: Arc<HomeState>,
    storage: Arc<dyn BlockStorage>,
    public_key: Vec<u8>,
    network_id: String,
    started_at: DateTime<Utc>,
}

impl NodeService {
    pub fn new(
        home: Arc<HomeState>,
        storage: Arc<dyn BlockStorage>,
        public_key: Vec<u8>,
        network_id: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            home,
            storage,
            public_key,
            network_id: network_id.into(),
            started_at,
        }
    }
}

#[async_trait]
impl PeerService for NodeService {
    async fn node_info(&self) -> Result<NodeInfo> {
        let view = self.home.view().await;
        Ok(NodeInfo {
            address: self.home.address().clone(),
            public_key: self.public_key.clone(),
            network_id: self.network_id.clone(),
            started_at: self.started_at,
            block: view.current_block,
            height: view.height,
            state: view.state,
        })
    }

    /// Finalized blocks in `from..=to`, stopping at the first gap.
    async fn block_proofs(&self, from: Height, to: Height) -> Result<Vec<BlockProof>> {
        let mut proofs = Vec::new();
        let mut height = from;
        while height <= to {
            match self.storage.block_proof(height).await? {
                Some(proof) => proofs.push(proof),
                None => break,
            }
            height = height.next()?;
        }
        Ok(proofs)
    }

    async fn has_block(&self, hash: &Hash) -> Result<bool> {
        self.storage.has_block(hash).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorum_crypto::KeyPair;
    use quorum_storage::MemoryBlockStorage;
    use quorum_types::{NodeState, ProposalBody, Round};

    #[tokio::test]
    async fn test_serves_contiguous_blocks() {
        let keypair = KeyPair::generate();
        let storage = Arc::new(MemoryBlockStorage::new());
        let home = Arc::new(HomeState::new(keypair.address().clone()));

        let mut previous = Hash::ZERO;
        for height in 0..3 {
            let proposal = keypair
                .seal(
                    b"net",
                    ProposalBody::new(keypair.address().clone(), Height(height), Round(0), previous),
                )
                .unwrap();
            let (block, batch) = storage.new_block(&proposal).await.unwrap();
            storage.apply(batch).await.unwrap();
            home.advance(&block).await.unwrap();
            previous = block.hash;
        }

        let service = NodeService::new(
            Arc::clone(&home),
            storage,
            keypair.public_key(),
            "net",
            Utc::now(),
        );

        let proofs = service.block_proofs(Height(1), Height(10)).await.unwrap();
        assert_eq!(proofs.len(), 2);
        assert_eq!(proofs[0].block.height, Height(1));
        assert_eq!(proofs[1].block.hash, previous);
        assert!(service.has_block(&previous).await.unwrap());

        let info = service.node_info().await.unwrap();
        assert_eq!(info.height, Height(3));
        assert_eq!(info.block, previous);
        assert_eq!(info.state, NodeState::Booting);
        assert_eq!(info.network_id, "net");
    }
}
