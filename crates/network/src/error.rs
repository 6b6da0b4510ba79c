//! Error types for the wire codec.

use thiserror::Error;
use quorum_types::{ConsensusError, MessageKind};

/// Errors raised while encoding or decoding signed message frames.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// Frame shorter than its fixed header.
    #[error("truncated frame: {len} bytes")]
    Truncated { len: usize },

    /// Frame written by an incompatible peer.
    #[error("unsupported wire version {0}")]
    UnsupportedVersion(u8),

    /// No decoder is registered for this discriminant.
    #[error("unknown message type {0}")]
    UnknownMessageType(u8),

    #[error("invalid {kind} payload: {reason}")]
    Payload { kind: MessageKind, reason: String },
}

impl From<CodecError> for ConsensusError {
    fn from(err: CodecError) -> Self {
        ConsensusError::Codec(err.to_string())
    }
}
