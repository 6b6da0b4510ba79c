use quorum_crypto::hash_data;
use quorum_types::{
    Ballot, BallotBody, ConsensusError, Hash, Height, Result, SealBody, Stage, VoteResult,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::threshold::Threshold;
use crate::vote_record::VoteRecords;

/// Keyed store of vote buckets.
///
/// Bucket creation is serialized by one lock; each bucket then has its own
/// lock so votes for different buckets do not contend.
pub struct Ballotbox {
    threshold: Threshold,
    buckets: Mutex<HashMap<Hash, Arc<RwLock<VoteRecords>>>>,
}

impl Ballotbox {
    pub fn new(threshold: Threshold) -> Self {
        Self {
            threshold,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Bucket key for a ballot. INIT ballots leave the proposal out so every
    /// INIT ballot of a height and round lands in the same bucket.
    pub fn bucket_key(body: &BallotBody) -> Hash {
        let mut bytes = Vec::with_capacity(8 + 8 + 1 + 32);
        bytes.extend_from_slice(&body.height.to_be_bytes());
        bytes.extend_from_slice(&body.round.to_be_bytes());
        bytes.push(body.stage.as_u8());
        if body.stage != Stage::Init {
            if let Some(proposal) = &body.proposal {
                bytes.extend_from_slice(proposal.as_bytes());
            }
        }
        hash_data(&bytes)
    }

    pub async fn vote(&self, ballot: &Ballot) -> Result<VoteResult> {
        ballot.body.validate()?;

        let key = Self::bucket_key(&ballot.body);
        // release the map lock before waiting on the bucket
        let bucket = {
            let mut buckets = self.buckets.lock().await;
            Arc::clone(buckets.entry(key).or_insert_with(|| {
                debug!("Opening vote records {} for {}", key, ballot.body);
                Arc::new(RwLock::new(VoteRecords::new(key, &ballot.body)))
            }))
        };

        let mut records = bucket.write().await;
        records.vote(ballot)?;
        let result = records.result(self.threshold.get(ballot.body.stage));

        debug!(
            "Vote from node={} height={} round={} stage={} counted: {} ({} votes)",
            ballot.body.node,
            ballot.body.height,
            ballot.body.round,
            ballot.body.stage,
            result.kind,
            records.len()
        );

        Ok(result)
    }

    /// Stops majority computation for a bucket; later votes are still kept.
    pub async fn close_vote_records(&self, key: &Hash) -> Result<()> {
        let bucket = {
            let buckets = self.buckets.lock().await;
            buckets
                .get(key)
                .cloned()
                .ok_or(ConsensusError::UnknownVoteRecords(*key))?
        };

        bucket.write().await.close();
        Ok(())
    }

    pub async fn is_closed(&self, key: &Hash) -> Option<bool> {
        let bucket = self.buckets.lock().await.get(key).cloned()?;
        let closed = bucket.read().await.is_closed();
        Some(closed)
    }

    pub async fn vote_count(&self, key: &Hash) -> Option<usize> {
        let bucket = self.buckets.lock().await.get(key).cloned()?;
        let count = bucket.read().await.len();
        Some(count)
    }

    /// Drops every bucket below `height`. Returns how many were removed.
    pub async fn clean(&self, height: Height) -> usize {
        let mut buckets = self.buckets.lock().await;
        let before = buckets.len();

        let mut kept = HashMap::with_capacity(before);
        for (key, bucket) in buckets.drain() {
            if bucket.read().await.height() >= height {
                kept.insert(key, bucket);
            }
        }
        *buckets = kept;

        let removed = before - buckets.len();
        if removed > 0 {
            info!("Cleaned {} vote records below height {}", removed, height);
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.buckets.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threshold::ThresholdPair;
    use quorum_crypto::KeyPair;
    use quorum_types::{Round, VoteResultKind};

    fn ballotbox(total: usize, threshold: usize) -> Ballotbox {
        Ballotbox::new(Threshold::new(ThresholdPair::new(total, threshold).unwrap()))
    }

    fn sign(keypair: &KeyPair, height: u64, proposal: Hash, next_block: Hash) -> Ballot {
        keypair
            .seal(
                b"net",
                BallotBody::new(
                    keypair.address().clone(),
                    Height(height),
                    Round(0),
                    Stage::Sign,
                    proposal,
                    Hash([1u8; 32]),
                    next_block,
                ),
            )
            .unwrap()
    }

    #[test]
    fn test_init_bucket_ignores_proposal() {
        let mut a = BallotBody::init("qv-a".into(), Height(3), Round(1), Hash::ZERO, Hash::ZERO);
        let b = BallotBody::init("qv-b".into(), Height(3), Round(1), Hash::ZERO, Hash::ZERO);
        assert_eq!(Ballotbox::bucket_key(&a), Ballotbox::bucket_key(&b));

        a.round = Round(2);
        assert_ne!(Ballotbox::bucket_key(&a), Ballotbox::bucket_key(&b));
    }

    #[test]
    fn test_sign_bucket_depends_on_proposal() {
        let a = BallotBody::new("qv-a".into(), Height(3), Round(0), Stage::Sign, Hash([1u8; 32]), Hash::ZERO, Hash::ZERO);
        let b = BallotBody::new("qv-a".into(), Height(3), Round(0), Stage::Sign, Hash([2u8; 32]), Hash::ZERO, Hash::ZERO);
        assert_ne!(Ballotbox::bucket_key(&a), Ballotbox::bucket_key(&b));
    }

    #[tokio::test]
    async fn test_majority_on_third_vote() {
        let ballotbox = ballotbox(4, 3);
        let keys: Vec<_> = (0..4).map(|_| KeyPair::generate()).collect();
        let proposal = Hash([9u8; 32]);
        let block = Hash([4u8; 32]);

        let first = ballotbox.vote(&sign(&keys[0], 10, proposal, block)).await.unwrap();
        let second = ballotbox.vote(&sign(&keys[1], 10, proposal, block)).await.unwrap();
        let third = ballotbox.vote(&sign(&keys[2], 10, proposal, block)).await.unwrap();

        assert_eq!(first.kind, VoteResultKind::NotYetMajority);
        assert_eq!(second.kind, VoteResultKind::NotYetMajority);
        assert_eq!(third.kind, VoteResultKind::GotMajority);
        assert_eq!(third.next_block, block);
        assert_eq!(third.proposal, Some(proposal));
    }

    #[tokio::test]
    async fn test_invalid_stage_is_rejected() {
        let ballotbox = ballotbox(4, 3);
        let keypair = KeyPair::generate();
        let body = BallotBody::init(keypair.address().clone(), Height(1), Round(0), Hash::ZERO, Hash::ZERO);
        let mut ballot = keypair.seal(b"net", body).unwrap();
        ballot.body.proposal = Some(Hash([1u8; 32]));

        assert!(matches!(
            ballotbox.vote(&ballot).await,
            Err(ConsensusError::InvalidStage { .. })
        ));
        assert_eq!(ballotbox.len().await, 0);
    }

    #[tokio::test]
    async fn test_close_and_clean() {
        let ballotbox = ballotbox(1, 1);
        let keypair = KeyPair::generate();
        let ballot = sign(&keypair, 5, Hash([9u8; 32]), Hash([4u8; 32]));
        let key = Ballotbox::bucket_key(&ballot.body);

        assert!(matches!(
            ballotbox.close_vote_records(&key).await,
            Err(ConsensusError::UnknownVoteRecords(_))
        ));

        assert!(ballotbox.vote(&ballot).await.unwrap().got_majority());
        ballotbox.close_vote_records(&key).await.unwrap();
        assert_eq!(ballotbox.is_closed(&key).await, Some(true));

        let again = sign(&keypair, 5, Hash([9u8; 32]), Hash([5u8; 32]));
        assert_eq!(ballotbox.vote(&again).await.unwrap().kind, VoteResultKind::Finished);
        assert_eq!(ballotbox.vote_count(&key).await, Some(1));

        let later = sign(&keypair, 6, Hash([9u8; 32]), Hash([4u8; 32]));
        ballotbox.vote(&later).await.unwrap();
        assert_eq!(ballotbox.clean(Height(6)).await, 1);
        assert_eq!(ballotbox.len().await, 1);
    }
}
