//! Contracts the consensus core uses to reach other validators, and the
//! transports that implement them.
//!
//! - [`Broadcaster`] signs outbound ballots and proposals and fans them out
//! - [`NetworkClient`] covers request/response traffic used while joining
//!   and syncing
//! - [`SealCodec`] turns signed messages into wire frames and back
//! - [`ChannelNetwork`] connects validators inside one process
//! - [`TcpNode`] connects validators over length-prefixed TCP streams

pub mod broadcaster;
pub mod channel;
pub mod codec;
pub mod error;
pub mod messages;
pub mod tcp;

pub use broadcaster::{Outbound, SealBroadcaster};
pub use channel::{ChannelEndpoint, ChannelNetwork};
pub use codec::{SealCodec, WIRE_VERSION};
pub use error::CodecError;
pub use messages::NetworkMessage;
pub use tcp::TcpNode;

use async_trait::async_trait;
use quorum_types::{Address, Ballot, BlockProof, Hash, Height, NodeInfo, Proposal, Result, SignedMessage};

/// Signs and delivers messages to this node and every known validator.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Seals `message` with the node key and network id, then delivers it to
    /// self plus all validators not listed in `excludes`.
    async fn send(&self, message: Outbound, excludes: &[Address]) -> Result<SignedMessage>;
}

#[async_trait]
pub trait NetworkClient: Send + Sync {
    async fn propose(&self, proposal: Proposal) -> Result<()>;

    async fn vote(&self, ballot: Ballot) -> Result<()>;

    async fn request_node_info(&self, addresses: &[Address]) -> Result<Vec<NodeInfo>>;

    /// Succeeds when at least one of `addresses` holds the block.
    async fn request_block_proof(&self, block: &Hash, addresses: &[Address]) -> Result<()>;

    /// Finalized blocks in `from..=to`, served by the first address that has
    /// them.
    async fn request_blocks(&self, from: Height, to: Height, addresses: &[Address]) -> Result<Vec<BlockProof>>;
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(&self, to: &Address, frame: Vec<u8>) -> Result<()>;
}

#[async_trait]
pub trait PeerService: Send + Sync {
    async fn node_info(&self) -> Result<NodeInfo>;

    async fn block_proofs(&self, from: Height, to: Height) -> Result<Vec<BlockProof>>;

    async fn has_block(&self, hash: &Hash) -> Result<bool>;
}
