use quorum_types::{ConsensusError, ConsensusPolicy, Result, Stage};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdPair {
    pub total: usize,
    pub threshold: usize,
}

impl ThresholdPair {
    pub fn new(total: usize, threshold: usize) -> Result<Self> {
        if total == 0 {
            return Err(ConsensusError::Config(
                "Total validators must be at least 1".to_string(),
            ));
        }
        if threshold == 0 || threshold > total {
            return Err(ConsensusError::Config(format!(
                "threshold must be in 1..={}, got {}",
                total, threshold
            )));
        }
        Ok(Self { total, threshold })
    }

    /// `ceil(total * percent / 100)`.
    pub fn from_percent(total: usize, percent: u32) -> Result<Self> {
        if percent == 0 || percent > 100 {
            return Err(ConsensusError::Config(format!(
                "threshold percent must be in 1..=100, got {}",
                percent
            )));
        }
        let scaled = total as u64 * percent as u64;
        let threshold = ((scaled + 99) / 100) as usize;
        Self::new(total, threshold)
    }
}

#[derive(Debug, Clone)]
pub struct Threshold {
    base: ThresholdPair,
    stages: HashMap<Stage, ThresholdPair>,
}

impl Threshold {
    pub fn new(base: ThresholdPair) -> Self {
        Self {
            base,
            stages: HashMap::new(),
        }
    }

    pub fn from_policy(policy: &ConsensusPolicy) -> Result<Self> {
        policy.validate()?;
        let mut threshold = Self::new(ThresholdPair::from_percent(
            policy.total,
            policy.threshold_percent,
        )?);
        for stage in [Stage::Init, Stage::Sign, Stage::Accept] {
            let percent = policy.stage_percent(stage);
            if percent != policy.threshold_percent {
                threshold.set(stage, ThresholdPair::from_percent(policy.total, percent)?);
            }
        }
        Ok(threshold)
    }

    pub fn set(&mut self, stage: Stage, pair: ThresholdPair) {
        self.stages.insert(stage, pair);
    }

    pub fn get(&self, stage: Stage) -> ThresholdPair {
        self.stages.get(&stage).copied().unwrap_or(self.base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_rounds_up() {
        assert_eq!(ThresholdPair::from_percent(4, 67).unwrap().threshold, 3);
        assert_eq!(ThresholdPair::from_percent(4, 66).unwrap().threshold, 3);
        assert_eq!(ThresholdPair::from_percent(4, 50).unwrap().threshold, 2);
        assert_eq!(ThresholdPair::from_percent(10, 67).unwrap().threshold, 7);
        assert_eq!(ThresholdPair::from_percent(1, 1).unwrap().threshold, 1);
        assert_eq!(ThresholdPair::from_percent(3, 100).unwrap().threshold, 3);
    }

    #[test]
    fn test_invalid_pairs() {
        assert!(ThresholdPair::new(0, 0).is_err());
        assert!(ThresholdPair::new(3, 4).is_err());
        assert!(ThresholdPair::from_percent(3, 0).is_err());
        assert!(ThresholdPair::from_percent(3, 101).is_err());
    }

    #[test]
    fn test_stage_override() {
        let policy = ConsensusPolicy::new("net", 4, 67)
            .unwrap()
            .with_stage_percent(Stage::Accept, 100);
        let threshold = Threshold::from_policy(&policy).unwrap();

        assert_eq!(threshold.get(Stage::Init), ThresholdPair { total: 4, threshold: 3 });
        assert_eq!(threshold.get(Stage::Sign), ThresholdPair { total: 4, threshold: 3 });
        assert_eq!(threshold.get(Stage::Accept), ThresholdPair { total: 4, threshold: 4 });
    }
}
