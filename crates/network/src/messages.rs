use serde::{Deserialize, Serialize};
use quorum_types::{Address, BlockProof, Hash, Height, NodeInfo};

/// Envelope exchanged over TCP connections. Signed messages travel as
/// opaque codec frames inside [`NetworkMessage::Seal`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NetworkMessage {
    Hello { address: Address },
    Seal(Vec<u8>),
    NodeInfoRequest { request_id: u64 },
    NodeInfoResponse { request_id: u64, info: NodeInfo },
    BlocksRequest { request_id: u64, from: Height, to: Height },
    BlocksResponse { request_id: u64, proofs: Vec<BlockProof> },
    BlockProofRequest { request_id: u64, block: Hash },
    BlockProofResponse { request_id: u64, known: bool },
    Error { request_id: u64, reason: String },
    Ping,
    Pong,
}

impl NetworkMessage {
    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Id of the request this message answers, if it is a response.
    pub fn response_id(&self) -> Option<u64> {
        match self {
            NetworkMessage::NodeInfoResponse { request_id, .. }
            | NetworkMessage::BlocksResponse { request_id, .. }
            | NetworkMessage::BlockProofResponse { request_id, .. }
            | NetworkMessage::Error { request_id, .. } => Some(*request_id),
            _ => None,
        }
    }
}
