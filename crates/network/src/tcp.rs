use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use quorum_types::{
    Address, Ballot, BlockProof, ConsensusError, Hash, Height, NodeInfo, Proposal, Result,
    SignedMessage,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::messages::NetworkMessage;
use crate::{NetworkClient, PeerService, SealCodec, Transport};

const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

struct PeerConnection {
    write_tx: mpsc::UnboundedSender<Vec<u8>>,
    addr: SocketAddr,
}

struct Inner {
    address: Address,
    network_id: Vec<u8>,
    codec: SealCodec,
    peers: RwLock<HashMap<Address, PeerConnection>>,
    pending: Mutex<HashMap<u64, oneshot::Sender<NetworkMessage>>>,
    next_request: AtomicU64,
    inbound: mpsc::UnboundedSender<SignedMessage>,
    service: Arc<dyn PeerService>,
    request_timeout: Duration,
}

/// Validator endpoint speaking length-prefixed JSON envelopes over TCP.
///
/// Each connection starts with a `Hello` exchange naming both validator
/// addresses; afterwards one task owns the read half and another drains
/// the per-peer write channel.
#[derive(Clone)]
pub struct TcpNode {
    inner: Arc<Inner>,
}

impl TcpNode {
    pub fn new(
        address: Address,
        network_id: impl Into<Vec<u8>>,
        service: Arc<dyn PeerService>,
        inbound: mpsc::UnboundedSender<SignedMessage>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                address,
                network_id: network_id.into(),
                codec: SealCodec::default(),
                peers: RwLock::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                next_request: AtomicU64::new(1),
                inbound,
                service,
                request_timeout: Duration::from_secs(5),
            }),
        }
    }

    pub fn address(&self) -> &Address {
        &self.inner.address
    }

    /// Binds `addr` and accepts peers in the background. Returns the bound
    /// address, which differs from `addr` when port 0 was requested.
    pub async fn listen_on(&self, addr: SocketAddr) -> anyhow::Result<SocketAddr> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let inner = Arc::clone(&self.inner);

        info!("Listening for validator connections on {}", local_addr);

        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((socket, peer_addr)) => {
                        let inner = Arc::clone(&inner);
                        tokio::spawn(async move {
                            if let Err(e) = Inner::run_connection(inner, socket, peer_addr).await {
                                warn!("Connection from {} ended: {}", peer_addr, e);
                            }
                        });
                    }
                    Err(e) => error!("Failed to accept connection: {}", e),
                }
            }
        });

        Ok(local_addr)
    }

    pub async fn connect_to_peer(&self, peer_addr: SocketAddr) -> anyhow::Result<Address> {
        let mut socket = TcpStream::connect(peer_addr).await?;
        let peer = Inner::handshake(&self.inner.address, &mut socket).await?;

        info!("Connected to peer {} at {}", peer, peer_addr);

        let write_rx = self.inner.register(&peer, peer_addr).await;
        let inner = Arc::clone(&self.inner);
        let registered = peer.clone();
        tokio::spawn(async move {
            if let Err(e) = Inner::serve(inner, socket, registered.clone(), write_rx).await {
                warn!("Connection to {} ended: {}", registered, e);
            }
        });

        Ok(peer)
    }

    pub async fn connected_peers(&self) -> Vec<Address> {
        let peers = self.inner.peers.read().await;
        let mut addresses: Vec<_> = peers.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    pub async fn peer_socket(&self, address: &Address) -> Option<SocketAddr> {
        let peers = self.inner.peers.read().await;
        peers.get(address).map(|peer| peer.addr)
    }

    async fn relay(&self, message: SignedMessage) -> Result<()> {
        let frame = self.inner.codec.encode(&message)?;
        for address in self.connected_peers().await {
            if let Err(e) = self.deliver(&address, frame.clone()).await {
                warn!("Failed to relay {} to {}: {}", message.kind(), address, e);
            }
        }
        Ok(())
    }
}

impl Inner {
    async fn handshake(me: &Address, socket: &mut TcpStream) -> anyhow::Result<Address> {
        let hello = NetworkMessage::Hello { address: me.clone() }.to_bytes()?;
        write_message(socket, &hello).await?;

        match NetworkMessage::from_bytes(&read_message(socket).await?)? {
            NetworkMessage::Hello { address } => Ok(address),
            other => Err(anyhow::anyhow!("expected hello, got {:?}", other)),
        }
    }

    async fn run_connection(inner: Arc<Inner>, mut socket: TcpStream, peer_addr: SocketAddr) -> anyhow::Result<()> {
        let peer = Self::handshake(&inner.address, &mut socket).await?;
        info!("Peer {} connected from {}", peer, peer_addr);
        let write_rx = inner.register(&peer, peer_addr).await;
        Self::serve(inner, socket, peer, write_rx).await
    }

    /// Makes `peer` reachable through a fresh write channel, replacing any
    /// previous connection to it.
    async fn register(&self, peer: &Address, peer_addr: SocketAddr) -> mpsc::UnboundedReceiver<Vec<u8>> {
        let (write_tx, write_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let mut peers = self.peers.write().await;
        peers.insert(
            peer.clone(),
            PeerConnection {
                write_tx,
                addr: peer_addr,
            },
        );
        write_rx
    }

    async fn serve(
        inner: Arc<Inner>,
        socket: TcpStream,
        peer: Address,
        mut write_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    ) -> anyhow::Result<()> {
        let (mut reader, mut writer) = socket.into_split();
        let reply_tx = {
            let peers = inner.peers.read().await;
            peers
                .get(&peer)
                .map(|connection| connection.write_tx.clone())
                .ok_or_else(|| anyhow::anyhow!("peer {} is not registered", peer))?
        };

        let writer_peer = peer.clone();
        let writer_task = tokio::spawn(async move {
            while let Some(data) = write_rx.recv().await {
                if let Err(e) = write_message(&mut writer, &data).await {
                    error!("Failed to write to peer {}: {}", writer_peer, e);
                    break;
                }
            }
        });

        let result = loop {
            match read_message(&mut reader).await {
                Ok(data) => inner.handle_message(&peer, &data, &reply_tx).await,
                Err(e) => break Err(e),
            }
        };

        writer_task.abort();
        inner.peers.write().await.remove(&peer);
        info!("Peer {} disconnected", peer);

        result
    }

    async fn handle_message(&self, peer: &Address, data: &[u8], reply: &mpsc::UnboundedSender<Vec<u8>>) {
        let message = match NetworkMessage::from_bytes(data) {
            Ok(message) => message,
            Err(e) => {
                warn!("Failed to deserialize message from peer {}: {}", peer, e);
                return;
            }
        };

        if let Some(request_id) = message.response_id() {
            match self.pending.lock().await.remove(&request_id) {
                Some(waiter) => {
                    let _ = waiter.send(message);
                }
                None => debug!("Late response {} from {}", request_id, peer),
            }
            return;
        }

        let response = match message {
            NetworkMessage::Seal(frame) => {
                self.accept_frame(&frame);
                None
            }
            NetworkMessage::NodeInfoRequest { request_id } => Some(match self.service.node_info().await {
                Ok(info) => NetworkMessage::NodeInfoResponse { request_id, info },
                Err(e) => NetworkMessage::Error {
                    request_id,
                    reason: e.to_string(),
                },
            }),
            NetworkMessage::BlocksRequest { request_id, from, to } => {
                Some(match self.service.block_proofs(from, to).await {
                    Ok(proofs) => NetworkMessage::BlocksResponse { request_id, proofs },
                    Err(e) => NetworkMessage::Error {
                        request_id,
                        reason: e.to_string(),
                    },
                })
            }
            NetworkMessage::BlockProofRequest { request_id, block } => {
                Some(match self.service.has_block(&block).await {
                    Ok(known) => NetworkMessage::BlockProofResponse { request_id, known },
                    Err(e) => NetworkMessage::Error {
                        request_id,
                        reason: e.to_string(),
                    },
                })
            }
            NetworkMessage::Ping => Some(NetworkMessage::Pong),
            NetworkMessage::Pong => {
                debug!("Received pong from peer {}", peer);
                None
            }
            other => {
                warn!("Unexpected message from peer {}: {:?}", peer, other);
                None
            }
        };

        if let Some(response) = response {
            match response.to_bytes() {
                Ok(bytes) => {
                    if reply.send(bytes).is_err() {
                        debug!("Peer {} closed before response was sent", peer);
                    }
                }
                Err(e) => error!("Failed to serialize response for {}: {}", peer, e),
            }
        }
    }

    fn accept_frame(&self, frame: &[u8]) {
        match self.codec.open(&self.network_id, frame) {
            Ok(message) => {
                if self.inbound.send(message).is_err() {
                    debug!("Inbound queue closed; dropping frame");
                }
            }
            Err(e) => warn!("Discarding frame: {}", e),
        }
    }

    async fn send_to(&self, to: &Address, data: Vec<u8>) -> Result<()> {
        let peers = self.peers.read().await;
        let peer = peers
            .get(to)
            .ok_or_else(|| ConsensusError::Network(format!("{} is not connected", to)))?;
        peer.write_tx
            .send(data)
            .map_err(|_| ConsensusError::Network(format!("connection to {} is closing", to)))
    }

    async fn request(&self, to: &Address, build: impl FnOnce(u64) -> NetworkMessage) -> Result<NetworkMessage> {
        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let data = build(request_id)
            .to_bytes()
            .map_err(|e| ConsensusError::Network(format!("Failed to serialize request: {}", e)))?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(request_id, tx);

        if let Err(e) = self.send_to(to, data).await {
            self.pending.lock().await.remove(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(NetworkMessage::Error { reason, .. })) => Err(ConsensusError::Network(reason)),
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(ConsensusError::Network(format!("request to {} dropped", to))),
            Err(_) => {
                self.pending.lock().await.remove(&request_id);
                Err(ConsensusError::Network(format!("request to {} timed out", to)))
            }
        }
    }
}

#[async_trait]
impl Transport for TcpNode {
    async fn deliver(&self, to: &Address, frame: Vec<u8>) -> Result<()> {
        if *to == self.inner.address {
            self.inner.accept_frame(&frame);
            return Ok(());
        }

        let data = NetworkMessage::Seal(frame)
            .to_bytes()
            .map_err(|e| ConsensusError::Network(format!("Failed to serialize frame: {}", e)))?;
        self.inner.send_to(to, data).await
    }
}

#[async_trait]
impl NetworkClient for TcpNode {
    async fn propose(&self, proposal: Proposal) -> Result<()> {
        self.relay(SignedMessage::Proposal(proposal)).await
    }

    async fn vote(&self, ballot: Ballot) -> Result<()> {
        self.relay(SignedMessage::Ballot(ballot)).await
    }

    async fn request_node_info(&self, addresses: &[Address]) -> Result<Vec<NodeInfo>> {
        let requests = addresses.iter().map(|address| async move {
            if *address == self.inner.address {
                return match self.inner.service.node_info().await {
                    Ok(info) => Some(info),
                    Err(e) => {
                        warn!("Local node info unavailable: {}", e);
                        None
                    }
                };
            }
            match self
                .inner
                .request(address, |request_id| NetworkMessage::NodeInfoRequest { request_id })
                .await
            {
                Ok(NetworkMessage::NodeInfoResponse { info, .. }) => Some(info),
                Ok(other) => {
                    warn!("Unexpected node info response from {}: {:?}", address, other);
                    None
                }
                Err(e) => {
                    warn!("Node info request to {} failed: {}", address, e);
                    None
                }
            }
        });
        Ok(join_all(requests).await.into_iter().flatten().collect())
    }

    async fn request_block_proof(&self, block: &Hash, addresses: &[Address]) -> Result<()> {
        for address in addresses {
            let response = self
                .inner
                .request(address, |request_id| NetworkMessage::BlockProofRequest {
                    request_id,
                    block: *block,
                })
                .await;
            match response {
                Ok(NetworkMessage::BlockProofResponse { known: true, .. }) => return Ok(()),
                Ok(_) => debug!("{} does not hold block {}", address, block),
                Err(e) => warn!("Block proof request to {} failed: {}", address, e),
            }
        }
        Err(ConsensusError::Network(format!("no peer holds block {}", block)))
    }

    async fn request_blocks(&self, from: Height, to: Height, addresses: &[Address]) -> Result<Vec<BlockProof>> {
        for address in addresses {
            let response = self
                .inner
                .request(address, |request_id| NetworkMessage::BlocksRequest { request_id, from, to })
                .await;
            match response {
                Ok(NetworkMessage::BlocksResponse { proofs, .. }) if !proofs.is_empty() => return Ok(proofs),
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

async fn write_message<W: AsyncWrite + Unpin>(stream: &mut W, data: &[u8]) -> anyhow::Result<()> {
    // Length prefix (4 bytes)
    let len = u32::try_from(data.len())?;
    stream.write_all(&len.to_be_bytes()).await?;

    stream.write_all(data).await?;
    stream.flush().await?;

    Ok(())
}

async fn read_message<R: AsyncRead + Unpin>(stream: &mut R) -> anyhow::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;

    if len > MAX_FRAME_LEN {
        return Err(anyhow::anyhow!("frame of {} bytes exceeds limit", len));
    }

    let mut data = vec![0u8; len];
    stream.read_exact(&mut data).await?;

    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use quorum_crypto::KeyPair;
    use quorum_types::{BallotBody, NodeState, Round};

    struct FixedService {
        info: NodeInfo,
    }

    #[async_trait]
    impl PeerService for FixedService {
        async fn node_info(&self) -> Result<NodeInfo> {
            Ok(self.info.clone())
        }

        async fn block_proofs(&self, _from: Height, _to: Height) -> Result<Vec<BlockProof>> {
            Ok(Vec::new())
        }

        async fn has_block(&self, hash: &Hash) -> Result<bool> {
            Ok(*hash == self.info.block)
        }
    }

    fn node(keypair: &KeyPair) -> (TcpNode, mpsc::UnboundedReceiver<SignedMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = Arc::new(FixedService {
            info: NodeInfo {
                address: keypair.address().clone(),
                public_key: keypair.public_key(),
                network_id: "net".to_string(),
                started_at: Utc::now(),
                block: Hash([8u8; 32]),
                height: Height(12),
                state: NodeState::Consensus,
            },
        });
        (TcpNode::new(keypair.address().clone(), "net", service, tx), rx)
    }

    #[tokio::test]
    async fn test_frame_length_prefix() {
        let (mut client, mut server) = tokio::io::duplex(64);
        write_message(&mut client, b"hello").await.unwrap();
        assert_eq!(read_message(&mut server).await.unwrap(), b"hello".to_vec());
    }

    #[tokio::test]
    async fn test_tcp_exchange() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let (node_a, _rx_a) = node(&a);
        let (node_b, mut rx_b) = node(&b);

        let b_addr = node_b.listen_on("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let peer = node_a.connect_to_peer(b_addr).await.unwrap();
        assert_eq!(&peer, b.address());

        let infos = node_a.request_node_info(&[b.address().clone()]).await.unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].height, Height(12));

        assert!(node_a
            .request_block_proof(&Hash([8u8; 32]), &[b.address().clone()])
            .await
            .is_ok());

        let body = BallotBody::init(a.address().clone(), Height(12), Round(0), Hash::ZERO, Hash::ZERO);
        let ballot = a.seal(b"net", body).unwrap();
        node_a.vote(ballot.clone()).await.unwrap();

        assert_eq!(rx_b.recv().await, Some(SignedMessage::Ballot(ballot)));
    }
}
