use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Address, Hash, Height, MessageKind, Result, Round, Seal, SealBody, SignedMessage};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProposalBody {
    pub proposer: Address,
    pub height: Height,
    pub round: Round,
    pub current_block: Hash,
    /// Opaque operation references; execution semantics live outside the core.
    pub operations: Vec<Hash>,
}

pub type Proposal = Seal<ProposalBody>;

impl ProposalBody {
    pub fn new(proposer: Address, height: Height, round: Round, current_block: Hash) -> Self {
        Self {
            proposer,
            height,
            round,
            current_block,
            operations: Vec::new(),
        }
    }
}

impl SealBody for ProposalBody {
    const KIND: MessageKind = MessageKind::Proposal;

    fn validate(&self) -> Result<()> {
        Ok(())
    }

    fn into_message(seal: Seal<Self>) -> SignedMessage {
        SignedMessage::Proposal(seal)
    }
}

impl fmt::Display for ProposalBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "proposal(proposer={} height={} round={} current={} operations={})",
            self.proposer,
            self.height,
            self.round,
            self.current_block,
            self.operations.len()
        )
    }
}
