use quorum_crypto::double_sha256;
use quorum_types::{Address, ConsensusError, Height, Result, Round};

/// Picks the validator that proposes for a height and round.
pub trait ProposerSelector: Send + Sync {
    fn select(&self, height: Height, round: Round) -> Address;
}

/// Hash-based selection over the sorted validator set. Every node derives
/// the same proposer from the same inputs.
#[derive(Debug, Clone)]
pub struct DefaultProposerSelector {
    validators: Vec<Address>,
}

impl DefaultProposerSelector {
    pub fn new(validators: impl IntoIterator<Item = Address>) -> Result<Self> {
        let mut validators: Vec<Address> = validators.into_iter().collect();
        validators.sort();
        validators.dedup();

        if validators.is_empty() {
            return Err(ConsensusError::Config(
                "proposer selection needs at least one validator".to_string(),
            ));
        }

        Ok(Self { validators })
    }

    pub fn validators(&self) -> &[Address] {
        &self.validators
    }
}

impl ProposerSelector for DefaultProposerSelector {
    fn select(&self, height: Height, round: Round) -> Address {
        if self.validators.len() == 1 {
            return self.validators[0].clone();
        }

        let mut seed = Vec::new();
        for validator in &self.validators {
            seed.extend_from_slice(validator.as_bytes());
        }
        seed.extend_from_slice(&height.to_be_bytes());
        seed.extend_from_slice(&round.to_be_bytes());

        let digest = double_sha256(&seed);
        let sum: u64 = digest.as_bytes().iter().map(|b| *b as u64).sum();
        let index = (sum % self.validators.len() as u64) as usize;

        self.validators[index].clone()
    }
}

#[derive(Debug, Clone)]
pub struct FixedProposerSelector {
    proposer: Address,
}

impl FixedProposerSelector {
    pub fn new(proposer: Address) -> Self {
        Self { proposer }
    }
}

impl ProposerSelector for FixedProposerSelector {
    fn select(&self, _height: Height, _round: Round) -> Address {
        self.proposer.clone()
    }
}
