use quorum_types::{Hash, Height, Proposal, Round};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Proposals admitted by the compiler, kept until their height is finalized.
#[derive(Default)]
pub struct ProposalPool {
    proposals: RwLock<HashMap<Hash, Proposal>>,
}

impl ProposalPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the proposal was already pooled.
    pub async fn add(&self, proposal: Proposal) -> bool {
        let mut proposals = self.proposals.write().await;
        if proposals.contains_key(&proposal.hash) {
            return false;
        }
        proposals.insert(proposal.hash, proposal);
        true
    }

    pub async fn get(&self, hash: &Hash) -> Option<Proposal> {
        self.proposals.read().await.get(hash).cloned()
    }

    pub async fn find(&self, height: Height, round: Round) -> Option<Proposal> {
        self.proposals
            .read()
            .await
            .values()
            .find(|p| p.body.height == height && p.body.round == round)
            .cloned()
    }

    pub async fn clean(&self, height: Height) -> usize {
        let mut proposals = self.proposals.write().await;
        let before = proposals.len();
        proposals.retain(|_, p| p.body.height >= height);
        before - proposals.len()
    }

    pub async fn len(&self) -> usize {
        self.proposals.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorum_crypto::KeyPair;
    use quorum_types::ProposalBody;

    fn proposal(keypair: &KeyPair, height: u64, round: u64) -> Proposal {
        let body = ProposalBody::new(keypair.address().clone(), Height(height), Round(round), Hash::ZERO);
        keypair.seal(b"net", body).unwrap()
    }

    #[tokio::test]
    async fn test_add_find_clean() {
        let pool = ProposalPool::new();
        let keypair = KeyPair::generate();
        let first = proposal(&keypair, 3, 0);
        let second = proposal(&keypair, 4, 1);

        assert!(pool.add(first.clone()).await);
        assert!(!pool.add(first.clone()).await);
        assert!(pool.add(second.clone()).await);

        assert_eq!(pool.get(&first.hash).await, Some(first.clone()));
        assert_eq!(pool.find(Height(4), Round(1)).await, Some(second));
        assert_eq!(pool.find(Height(4), Round(0)).await, None);

        assert_eq!(pool.clean(Height(4)).await, 1);
        assert_eq!(pool.len().await, 1);
        assert_eq!(pool.get(&first.hash).await, None);
    }
}
