use quorum_types::{Address, ConsensusPolicy, Result};

use crate::metrics::ConsensusMetrics;

#[derive(Clone)]
pub struct NodeContext {
    pub address: Address,
    pub policy: ConsensusPolicy,
    pub metrics: ConsensusMetrics,
}

impl NodeContext {
    pub fn new(address: Address, policy: ConsensusPolicy) -> Result<Self> {
        policy.validate()?;
        let metrics = ConsensusMetrics::new(address.as_str())?;
        Ok(Self {
            address,
            policy,
            metrics,
        })
    }

    pub fn network_id(&self) -> &[u8] {
        self.policy.network_id.as_bytes()
    }
}
