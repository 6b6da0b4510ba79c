use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Hash, Height, Round, Stage};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum VoteResultKind {
    NotYetMajority,
    GotMajority,
    Draw,
    Finished,
}

impl fmt::Display for VoteResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoteResultKind::NotYetMajority => write!(f, "NOT_YET_MAJORITY"),
            VoteResultKind::GotMajority => write!(f, "GOT_MAJORITY"),
            VoteResultKind::Draw => write!(f, "DRAW"),
            VoteResultKind::Finished => write!(f, "FINISHED"),
        }
    }
}

/// Outcome of tabulating one bucket after a vote.
///
/// `current_block` and `next_block` carry the winning values only when
/// `kind` is [`VoteResultKind::GotMajority`]; otherwise they are zero.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoteResult {
    pub bucket: Hash,
    pub height: Height,
    pub round: Round,
    pub stage: Stage,
    pub proposal: Option<Hash>,
    pub current_block: Hash,
    pub next_block: Hash,
    pub kind: VoteResultKind,
}

impl VoteResult {
    pub fn got_majority(&self) -> bool {
        self.kind == VoteResultKind::GotMajority
    }

    pub fn is_draw(&self) -> bool {
        self.kind == VoteResultKind::Draw
    }

    /// Position of this result within a height; later rounds and stages
    /// compare greater.
    pub fn position(&self) -> (Round, Stage) {
        (self.round, self.stage)
    }
}

impl fmt::Display for VoteResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "vote_result(height={} round={} stage={} kind={} next={})",
            self.height, self.round, self.stage, self.kind, self.next_block
        )
    }
}
