use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Address, Ballot, ConsensusError, Hash, Proposal, Result};

/// Explicit discriminant of each signed message variant on the wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Ballot,
    Proposal,
}

impl MessageKind {
    pub fn discriminant(&self) -> u8 {
        match self {
            MessageKind::Ballot => 1,
            MessageKind::Proposal => 2,
        }
    }

    pub fn from_discriminant(value: u8) -> Option<Self> {
        match value {
            1 => Some(MessageKind::Ballot),
            2 => Some(MessageKind::Proposal),
            _ => None,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Ballot => write!(f, "ballot"),
            MessageKind::Proposal => write!(f, "proposal"),
        }
    }
}

pub trait SealBody: Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static {
    const KIND: MessageKind;

    /// Structural checks that do not need any node-local state.
    fn validate(&self) -> Result<()>;

    fn into_message(seal: Seal<Self>) -> SignedMessage;
}

/// Signed envelope shared by every message variant.
///
/// `hash` is the sha256 of the canonical encoding (everything but `hash`
/// and `signature`); `signature` covers the network id followed by that
/// same encoding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Seal<T> {
    pub body: T,
    pub signer: Address,
    pub public_key: Vec<u8>,
    pub signed_at: DateTime<Utc>,
    pub hash: Hash,
    pub signature: Vec<u8>,
}

impl<T: SealBody> Seal<T> {
    pub fn canonical_bytes(
        body: &T,
        signer: &Address,
        public_key: &[u8],
        signed_at: &DateTime<Utc>,
    ) -> Result<Vec<u8>> {
        bincode::serialize(&(T::KIND.discriminant(), body, signer, public_key, signed_at))
            .map_err(|e| ConsensusError::Codec(format!("failed to encode {}: {}", T::KIND, e)))
    }

    pub fn signing_bytes(&self) -> Result<Vec<u8>> {
        Self::canonical_bytes(&self.body, &self.signer, &self.public_key, &self.signed_at)
    }

    pub fn kind(&self) -> MessageKind {
        T::KIND
    }

    pub fn into_message(self) -> SignedMessage {
        T::into_message(self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SignedMessage {
    Ballot(Ballot),
    Proposal(Proposal),
}

impl SignedMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            SignedMessage::Ballot(_) => MessageKind::Ballot,
            SignedMessage::Proposal(_) => MessageKind::Proposal,
        }
    }

    pub fn hash(&self) -> Hash {
        match self {
            SignedMessage::Ballot(seal) => seal.hash,
            SignedMessage::Proposal(seal) => seal.hash,
        }
    }

    pub fn signer(&self) -> &Address {
        match self {
            SignedMessage::Ballot(seal) => &seal.signer,
            SignedMessage::Proposal(seal) => &seal.signer,
        }
    }
}

impl fmt::Display for SignedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignedMessage::Ballot(ballot) => write!(f, "{}", ballot.body),
            SignedMessage::Proposal(proposal) => write!(f, "{}", proposal.body),
        }
    }
}
