use chrono::{DateTime, Utc};
use quorum_types::{
    Address, Ballot, BallotBody, ConsensusError, Hash, Height, Result, Round, Stage, VoteResult,
    VoteResultKind,
};
use std::collections::{BTreeMap, HashMap};

use crate::threshold::ThresholdPair;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteRecord {
    pub node: Address,
    pub current_block: Hash,
    pub next_block: Hash,
    pub ballot: Hash,
    pub voted_at: DateTime<Utc>,
}

impl VoteRecord {
    pub fn from_ballot(ballot: &Ballot) -> Self {
        Self {
            node: ballot.body.node.clone(),
            current_block: ballot.body.current_block,
            next_block: ballot.body.next_block,
            ballot: ballot.hash,
            voted_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Majority {
    NotYet,
    Value(Hash),
    Draw,
}

/// Whether the distribution in `counts` is already decided: some value
/// reached `threshold`, or none can reach it with the votes still missing.
///
/// Monotonic: adding votes to a decided distribution keeps it decided.
pub fn can_count(total: usize, threshold: usize, counts: &[usize]) -> bool {
    let threshold = threshold.min(total);
    let voted: usize = counts.iter().sum();
    if voted >= total {
        return true;
    }

    let max = counts.iter().copied().max().unwrap_or(0);
    if max >= threshold {
        return true;
    }

    // nobody can still reach the threshold
    max + (total - voted) < threshold
}

/// Counts `values` against `pair`. When several values reach the threshold
/// the highest count wins, ties going to the smallest hash.
pub fn majority<'a>(pair: ThresholdPair, values: impl IntoIterator<Item = &'a Hash>) -> Majority {
    let mut tally: BTreeMap<Hash, usize> = BTreeMap::new();
    for value in values {
        *tally.entry(*value).or_insert(0) += 1;
    }

    let counts: Vec<usize> = tally.values().copied().collect();
    if !can_count(pair.total, pair.threshold, &counts) {
        return Majority::NotYet;
    }

    // tally iterates in hash order, so keeping the first of equal counts
    // leaves the smallest hash
    let mut winner: Option<(Hash, usize)> = None;
    for (value, count) in tally {
        match winner {
            Some((_, best)) if best >= count => {}
            _ => winner = Some((value, count)),
        }
    }

    match winner {
        Some((value, count)) if count >= pair.threshold.min(pair.total) => Majority::Value(value),
        _ => Majority::Draw,
    }
}

#[derive(Debug, Clone)]
pub struct VoteRecords {
    key: Hash,
    height: Height,
    round: Round,
    stage: Stage,
    proposal: Option<Hash>,
    records: HashMap<Address, VoteRecord>,
    closed: bool,
}

impl VoteRecords {
    pub fn new(key: Hash, body: &BallotBody) -> Self {
        Self {
            key,
            height: body.height,
            round: body.round,
            stage: body.stage,
            proposal: if body.stage == Stage::Init {
                None
            } else {
                body.proposal
            },
            records: HashMap::new(),
            closed: false,
        }
    }

    pub fn key(&self) -> Hash {
        self.key
    }

    pub fn height(&self) -> Height {
        self.height
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn record(&self, node: &Address) -> Option<&VoteRecord> {
        self.records.get(node)
    }

    /// Records `ballot`, replacing an earlier differing vote from the same
    /// validator.
    pub fn vote(&mut self, ballot: &Ballot) -> Result<()> {
        if let Some(existing) = self.records.get(&ballot.body.node) {
            if existing.ballot == ballot.hash {
                return Err(ConsensusError::AlreadyVoted {
                    node: ballot.body.node.clone(),
                    bucket: self.key,
                });
            }
        }

        self.records
            .insert(ballot.body.node.clone(), VoteRecord::from_ballot(ballot));
        Ok(())
    }

    /// Tabulates current and next block hashes independently.
    pub fn result(&self, pair: ThresholdPair) -> VoteResult {
        let mut result = VoteResult {
            bucket: self.key,
            height: self.height,
            round: self.round,
            stage: self.stage,
            proposal: self.proposal,
            current_block: Hash::ZERO,
            next_block: Hash::ZERO,
            kind: VoteResultKind::NotYetMajority,
        };

        if self.closed {
            result.kind = VoteResultKind::Finished;
            return result;
        }

        let current = majority(pair, self.records.values().map(|r| &r.current_block));
        let next = majority(pair, self.records.values().map(|r| &r.next_block));

        result.kind = match (current, next) {
            (Majority::Value(current), Majority::Value(next)) => {
                result.current_block = current;
                result.next_block = next;
                VoteResultKind::GotMajority
            }
            // one side still open means the bucket is not decided yet
            (Majority::NotYet, _) | (_, Majority::NotYet) => VoteResultKind::NotYetMajority,
            _ => VoteResultKind::Draw,
        };
        result
    }
}
