use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Address, ConsensusError, Hash, Height, NodeState, Proposal, Result, Round};

/// Finalized block. `hash` commits to every other field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Block {
    pub height: Height,
    pub round: Round,
    pub proposal: Hash,
    pub previous: Hash,
    pub hash: Hash,
}

impl Block {
    pub fn canonical_bytes(height: Height, round: Round, proposal: &Hash, previous: &Hash) -> Result<Vec<u8>> {
        bincode::serialize(&(height, round, proposal, previous))
            .map_err(|e| ConsensusError::Codec(format!("failed to encode block: {}", e)))
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "block(height={} round={} hash={} previous={})",
            self.height, self.round, self.hash, self.previous
        )
    }
}

/// A finalized block together with the proposal it was built from, as served
/// to syncing peers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockProof {
    pub block: Block,
    pub proposal: Proposal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeInfo {
    pub address: Address,
    pub public_key: Vec<u8>,
    pub network_id: String,
    pub started_at: DateTime<Utc>,
    pub block: Hash,
    pub height: Height,
    pub state: NodeState,
}

impl fmt::Display for NodeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "node(address={} height={} block={} state={})",
            self.address, self.height, self.block, self.state
        )
    }
}
