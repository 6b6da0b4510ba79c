use quorum_types::{Address, ConsensusError, Height, Result, Round};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::proposer::ProposerSelector;

/// Static set of acting validators and the proposer choice over it.
#[derive(Clone)]
pub struct Suffrage {
    validators: BTreeSet<Address>,
    selector: Arc<dyn ProposerSelector>,
}

impl Suffrage {
    pub fn new(
        validators: impl IntoIterator<Item = Address>,
        selector: Arc<dyn ProposerSelector>,
    ) -> Result<Self> {
        let validators: BTreeSet<Address> = validators.into_iter().collect();
        if validators.is_empty() {
            return Err(ConsensusError::Config("validator set is empty".to_string()));
        }
        Ok(Self { validators, selector })
    }

    pub fn is_validator(&self, address: &Address) -> bool {
        self.validators.contains(address)
    }

    pub fn validators(&self) -> Vec<Address> {
        self.validators.iter().cloned().collect()
    }

    pub fn total(&self) -> usize {
        self.validators.len()
    }

    pub fn proposer(&self, height: Height, round: Round) -> Address {
        self.selector.select(height, round)
    }

    pub fn is_proposer(&self, address: &Address, height: Height, round: Round) -> bool {
        &self.proposer(height, round) == address
    }
}
