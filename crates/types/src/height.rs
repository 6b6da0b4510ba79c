use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{ConsensusError, Result};

/// Block height. Arithmetic is checked and never wraps.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Height(pub u64);

impl Height {
    pub const GENESIS: Height = Height(0);

    pub fn new(height: u64) -> Self {
        Height(height)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn checked_add(&self, delta: u64) -> Result<Height> {
        self.0
            .checked_add(delta)
            .map(Height)
            .ok_or(ConsensusError::HeightOverflow {
                height: *self,
                delta,
            })
    }

    pub fn checked_sub(&self, delta: u64) -> Result<Height> {
        self.0
            .checked_sub(delta)
            .map(Height)
            .ok_or(ConsensusError::HeightUnderflow {
                height: *self,
                delta,
            })
    }

    pub fn next(&self) -> Result<Height> {
        self.checked_add(1)
    }

    pub fn previous(&self) -> Result<Height> {
        self.checked_sub(1)
    }

    pub fn to_be_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for Height {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Height {
    fn from(height: u64) -> Self {
        Height(height)
    }
}

/// Retry counter within a height. Resets to zero when the height advances.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Round(pub u64);

impl Round {
    pub const ZERO: Round = Round(0);

    pub fn value(&self) -> u64 {
        self.0
    }

    /// Rounds saturate instead of wrapping; a node never reaches `u64::MAX`
    /// rounds within one height in practice.
    pub fn next(&self) -> Round {
        Round(self.0.saturating_add(1))
    }

    pub fn to_be_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for Round {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Round {
    fn from(round: u64) -> Self {
        Round(round)
    }
}
