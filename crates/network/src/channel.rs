use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use quorum_types::{
    Address, Ballot, BlockProof, ConsensusError, Hash, Height, NodeInfo, Proposal, Result,
    SignedMessage,
};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{NetworkClient, PeerService, SealCodec, Transport};

struct Member {
    frames: mpsc::UnboundedSender<Vec<u8>>,
    service: Arc<dyn PeerService>,
}

/// In-process network connecting validators through channels. Frames still
/// go through the codec and seal verification, exactly like a socket
/// transport.
#[derive(Clone, Default)]
pub struct ChannelNetwork {
    members: Arc<RwLock<HashMap<Address, Member>>>,
}

impl ChannelNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `address` and starts forwarding verified inbound messages
    /// to `inbound`.
    pub async fn join(
        &self,
        address: Address,
        network_id: impl Into<Vec<u8>>,
        service: Arc<dyn PeerService>,
        inbound: mpsc::UnboundedSender<SignedMessage>,
    ) -> ChannelEndpoint {
        let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let network_id = network_id.into();
        let codec = SealCodec::default();

        {
            let mut members = self.members.write().await;
            members.insert(
                address.clone(),
                Member {
                    frames: frames_tx,
                    service,
                },
            );
        }

        let reader_codec = codec.clone();
        let reader_address = address.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = frames_rx.recv().await {
                match reader_codec.open(&network_id, &frame) {
                    Ok(message) => {
                        if inbound.send(message).is_err() {
                            debug!("Inbound queue of {} closed", reader_address);
                            break;
                        }
                    }
                    Err(e) => warn!("Discarding frame for {}: {}", reader_address, e),
                }
            }
        });

        ChannelEndpoint {
            address,
            network: self.clone(),
            codec,
            reader,
        }
    }

    /// Removes `address`; frames sent to it afterwards fail.
    pub async fn leave(&self, address: &Address) {
        self.members.write().await.remove(address);
    }

    pub async fn addresses(&self) -> Vec<Address> {
        let mut addresses: Vec<_> = self.members.read().await.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    async fn service(&self, address: &Address) -> Option<Arc<dyn PeerService>> {
        let members = self.members.read().await;
        members.get(address).map(|member| Arc::clone(&member.service))
    }
}

pub struct ChannelEndpoint {
    address: Address,
    network: ChannelNetwork,
    codec: SealCodec,
    reader: JoinHandle<()>,
}

impl ChannelEndpoint {
    pub fn address(&self) -> &Address {
        &self.address
    }

    async fn relay(&self, message: SignedMessage) -> Result<()> {
        let frame = self.codec.encode(&message)?;
        for address in self.network.addresses().await {
            if address == self.address {
                continue;
            }
            if let Err(e) = self.deliver(&address, frame.clone()).await {
                warn!("Failed to relay {} to {}: {}", message.kind(), address, e);
            }
        }
        Ok(())
    }
}

impl Drop for ChannelEndpoint {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl Transport for ChannelEndpoint {
    async fn deliver(&self, to: &Address, frame: Vec<u8>) -> Result<()> {
        let members = self.network.members.read().await;
        let member = members
            .get(to)
            .ok_or_else(|| ConsensusError::Network(format!("{} is not connected", to)))?;

        member
            .frames
            .send(frame)
            .map_err(|_| ConsensusError::Network(format!("{} stopped receiving", to)))
    }
}

#[async_trait]
impl NetworkClient for ChannelEndpoint {
    async fn propose(&self, proposal: Proposal) -> Result<()> {
        self.relay(SignedMessage::Proposal(proposal)).await
    }

    async fn vote(&self, ballot: Ballot) -> Result<()> {
        self.relay(SignedMessage::Ballot(ballot)).await
    }

    async fn request_node_info(&self, addresses: &[Address]) -> Result<Vec<NodeInfo>> {
        let mut infos = Vec::with_capacity(addresses.len());
        for address in addresses {
            let Some(service) = self.network.service(address).await else {
                debug!("Node info of {} unavailable: not connected", address);
                continue;
            };
            match service.node_info().await {
                Ok(info) => infos.push(info),
                Err(e) => warn!("Node info request to {} failed: {}", address, e),
            }
        }
        Ok(infos)
    }

    async fn request_block_proof(&self, block: &Hash, addresses: &[Address]) -> Result<()> {
        for address in addresses {
            if let Some(service) = self.network.service(address).await {
                if service.has_block(block).await.unwrap_or(false) {
                    return Ok(());
                }
            }
        }
        Err(ConsensusError::Network(format!("no peer holds block {}", block)))
    }

    async fn request_blocks(&self, from: Height, to: Height, addresses: &[Address]) -> Result<Vec<BlockProof>> {
        for address in addresses {
            let Some(service) = self.network.service(address).await else {
                continue;
            };
            match service.block_proofs(from, to).await {
                Ok(proofs) if !proofs.is_empty() => return Ok(proofs),
                Ok(_) => debug!("{} has no blocks in {}..={}", address, from, to),
                Err(e) => warn!("Block request to {} failed: {}", address, e),
            }
        }
        Err(ConsensusError::Network(format!(
            "no peer served blocks {}..={}",
            from, to
        )))
    }
}
