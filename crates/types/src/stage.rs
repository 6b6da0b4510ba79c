use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConsensusError;

/// Phase within a round. Ordering follows protocol progression.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Init,
    Sign,
    Accept,
}

impl Stage {
    /// Stage that follows this one. ACCEPT wraps to INIT of the next height.
    pub fn next(&self) -> Stage {
        match self {
            Stage::Init => Stage::Sign,
            Stage::Sign => Stage::Accept,
            Stage::Accept => Stage::Init,
        }
    }

    /// SIGN and ACCEPT ballots reference a proposal, INIT ballots must not.
    pub fn requires_proposal(&self) -> bool {
        matches!(self, Stage::Sign | Stage::Accept)
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            Stage::Init => 1,
            Stage::Sign => 2,
            Stage::Accept => 3,
        }
    }
}

impl FromStr for Stage {
    type Err = ConsensusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INIT" => Ok(Stage::Init),
            "SIGN" => Ok(Stage::Sign),
            "ACCEPT" => Ok(Stage::Accept),
            other => Err(ConsensusError::Codec(format!("unknown stage {}", other))),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Init => write!(f, "INIT"),
            Stage::Sign => write!(f, "SIGN"),
            Stage::Accept => write!(f, "ACCEPT"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_next() {
        assert_eq!(Stage::Init.next(), Stage::Sign);
        assert_eq!(Stage::Sign.next(), Stage::Accept);
        assert_eq!(Stage::Accept.next(), Stage::Init);
    }

    #[test]
    fn test_stage_ordering() {
        assert!(Stage::Init < Stage::Sign);
        assert!(Stage::Sign < Stage::Accept);
    }

    #[test]
    fn test_stage_from_str() {
        for stage in [Stage::Init, Stage::Sign, Stage::Accept] {
            assert_eq!(stage.to_string().parse::<Stage>().unwrap(), stage);
        }
        assert!(matches!("COMMIT".parse::<Stage>(), Err(ConsensusError::Codec(_))));
    }
}
