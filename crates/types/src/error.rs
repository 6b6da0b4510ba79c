use thiserror::Error;

use crate::{Address, Hash, Height, NodeState, Round, Stage};

/// Errors raised by the consensus core and its collaborators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    // Protocol-stale
    /// The same validator resubmitted a byte-identical ballot.
    #[error("{node} already voted in bucket {bucket}")]
    AlreadyVoted { node: Address, bucket: Hash },

    #[error("stale ballot from {node}: {reason}")]
    StaleBallot { node: Address, reason: String },

    #[error("stale proposal {proposal}: {reason}")]
    StaleProposal { proposal: Hash, reason: String },

    #[error("stale vote result at height={height} round={round} stage={stage}")]
    StaleVoteResult {
        height: Height,
        round: Round,
        stage: Stage,
    },

    // Malformed input
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("invalid seal {hash}: {reason}")]
    InvalidSeal { hash: Hash, reason: String },

    #[error("codec error: {0}")]
    Codec(String),

    // Invariant violations
    #[error("stage {stage} can not be voted with proposal={has_proposal}")]
    InvalidStage { stage: Stage, has_proposal: bool },

    #[error("unknown vote records: {0}")]
    UnknownVoteRecords(Hash),

    #[error("height overflow: {height} + {delta}")]
    HeightOverflow { height: Height, delta: u64 },

    #[error("height underflow: {height} - {delta}")]
    HeightUnderflow { height: Height, delta: u64 },

    #[error("height {got} is out of window; home height is {home}")]
    HeightOutOfWindow { home: Height, got: Height },

    #[error("block mismatch at height {height}: expected {expected}, got {got}")]
    BlockMismatch {
        height: Height,
        expected: Hash,
        got: Hash,
    },

    #[error("proposal {0} is not known")]
    UnknownProposal(Hash),

    // Lifecycle
    #[error("{0} is already started")]
    AlreadyStarted(String),

    #[error("{0} is not started")]
    NotStarted(String),

    #[error("state handler for {0} is not registered")]
    MissingStateHandler(NodeState),

    #[error("node is already in state {0}")]
    SameState(NodeState),

    #[error("no active state handler")]
    NoActiveHandler,

    #[error("node can not move from {from} to {to}")]
    InvalidTransition { from: NodeState, to: NodeState },

    // Collaborators
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ConsensusError {
    /// True for stale traffic that is dropped with a log line.
    pub fn is_stale(&self) -> bool {
        matches!(
            self,
            ConsensusError::AlreadyVoted { .. }
                | ConsensusError::StaleBallot { .. }
                | ConsensusError::StaleProposal { .. }
                | ConsensusError::StaleVoteResult { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ConsensusError>;
