use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{
    Address, ConsensusError, Hash, Height, MessageKind, Result, Round, Seal, SealBody,
    SignedMessage, Stage,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BallotBody {
    pub node: Address,
    pub height: Height,
    pub round: Round,
    pub stage: Stage,
    pub proposal: Option<Hash>,
    pub current_block: Hash,
    pub next_block: Hash,
}

pub type Ballot = Seal<BallotBody>;

impl BallotBody {
    pub fn init(node: Address, height: Height, round: Round, current_block: Hash, next_block: Hash) -> Self {
        Self {
            node,
            height,
            round,
            stage: Stage::Init,
            proposal: None,
            current_block,
            next_block,
        }
    }

    pub fn new(
        node: Address,
        height: Height,
        round: Round,
        stage: Stage,
        proposal: Hash,
        current_block: Hash,
        next_block: Hash,
    ) -> Self {
        Self {
            node,
            height,
            round,
            stage,
            proposal: Some(proposal),
            current_block,
            next_block,
        }
    }
}

impl SealBody for BallotBody {
    const KIND: MessageKind = MessageKind::Ballot;

    fn validate(&self) -> Result<()> {
        if self.stage.requires_proposal() != self.proposal.is_some() {
            return Err(ConsensusError::InvalidStage {
                stage: self.stage,
                has_proposal: self.proposal.is_some(),
            });
        }
        Ok(())
    }

    fn into_message(seal: Seal<Self>) -> SignedMessage {
        SignedMessage::Ballot(seal)
    }
}

impl fmt::Display for BallotBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ballot(node={} height={} round={} stage={}",
            self.node, self.height, self.round, self.stage
        )?;
        if let Some(proposal) = &self.proposal {
            write!(f, " proposal={}", proposal)?;
        }
        write!(f, " current={} next={})", self.current_block, self.next_block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_ballot_must_not_carry_proposal() {
        let mut body = BallotBody::init(Address::from("qv-a"), Height(3), Round(0), Hash::ZERO, Hash::ZERO);
        assert!(body.validate().is_ok());

        body.proposal = Some(Hash([1u8; 32]));
        assert_eq!(
            body.validate(),
            Err(ConsensusError::InvalidStage {
                stage: Stage::Init,
                has_proposal: true
            })
        );
    }

    #[test]
    fn test_sign_ballot_requires_proposal() {
        let mut body = BallotBody::new(
            Address::from("qv-a"),
            Height(3),
            Round(0),
            Stage::Sign,
            Hash([1u8; 32]),
            Hash::ZERO,
            Hash([2u8; 32]),
        );
        assert!(body.validate().is_ok());

        body.proposal = None;
        assert!(matches!(body.validate(), Err(ConsensusError::InvalidStage { .. })));
    }
}
