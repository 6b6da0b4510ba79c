use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{ConsensusError, Result, Stage};

/// Consensus parameters every validator must agree on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsensusPolicy {
    pub network_id: String,
    pub total: usize,
    /// Base percentage of `total` that must agree, in (0, 100].
    pub threshold_percent: u32,
    pub init_percent: Option<u32>,
    pub sign_percent: Option<u32>,
    pub accept_percent: Option<u32>,
    pub round_timeout: Duration,
    pub join_interval: Duration,
    pub sync_retry_interval: Duration,
    /// Expected wall time of one block round; used for metrics and backoff.
    pub block_round_interval: Duration,
}

impl ConsensusPolicy {
    pub fn new(network_id: impl Into<String>, total: usize, threshold_percent: u32) -> Result<Self> {
        let policy = Self {
            network_id: network_id.into(),
            total,
            threshold_percent,
            init_percent: None,
            sign_percent: None,
            accept_percent: None,
            round_timeout: Duration::from_secs(5),
            join_interval: Duration::from_secs(2),
            sync_retry_interval: Duration::from_secs(3),
            block_round_interval: Duration::from_secs(3),
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn with_round_timeout(mut self, timeout: Duration) -> Self {
        self.round_timeout = timeout;
        self
    }

    pub fn with_join_interval(mut self, interval: Duration) -> Self {
        self.join_interval = interval;
        self
    }

    pub fn with_stage_percent(mut self, stage: Stage, percent: u32) -> Self {
        match stage {
            Stage::Init => self.init_percent = Some(percent),
            Stage::Sign => self.sign_percent = Some(percent),
            Stage::Accept => self.accept_percent = Some(percent),
        }
        self
    }

    pub fn stage_percent(&self, stage: Stage) -> u32 {
        let overridden = match stage {
            Stage::Init => self.init_percent,
            Stage::Sign => self.sign_percent,
            Stage::Accept => self.accept_percent,
        };
        overridden.unwrap_or(self.threshold_percent)
    }

    pub fn validate(&self) -> Result<()> {
        if self.network_id.is_empty() {
            return Err(ConsensusError::Config("network id cannot be empty".to_string()));
        }

        if self.total == 0 {
            return Err(ConsensusError::Config(
                "Total validators must be at least 1".to_string(),
            ));
        }

        for stage in [Stage::Init, Stage::Sign, Stage::Accept] {
            let percent = self.stage_percent(stage);
            if percent == 0 || percent > 100 {
                return Err(ConsensusError::Config(format!(
                    "threshold percent for {} must be in 1..=100, got {}",
                    stage, percent
                )));
            }
        }

        if self.round_timeout.is_zero() {
            return Err(ConsensusError::Config("round timeout must be positive".to_string()));
        }

        Ok(())
    }
}
