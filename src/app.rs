use crate::config::{AppConfig, StorageBackend};
use chrono::Utc;
use quorum_consensus::{
    ConsensusNode, DefaultProposerSelector, NodeBuilder, NodeContext, Suffrage, Threshold,
};
use quorum_crypto::KeyPair;
use quorum_network::{NetworkClient, SealBroadcaster, TcpNode, Transport};
use quorum_storage::{BlockStorage, EtcdBlockStorage, MemoryBlockStorage};
use quorum_types::{Address, ConsensusError, ConsensusPolicy, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const STATUS_INTERVAL: Duration = Duration::from_secs(10);

pub struct QuorumApp {
    config: AppConfig,
    keypair: KeyPair,
    policy: ConsensusPolicy,
}

impl QuorumApp {
    pub fn new(config: AppConfig) -> Result<Self> {
        config.validate()?;
        let policy = config.policy()?;
        let keypair = config.keypair()?;
        if config.node.private_key.is_empty() {
            warn!("No private key configured; using a throwaway key");
        }

        info!("Initializing quorum validator");
        info!("Address: {}", keypair.address());
        info!("Network: {}", policy.network_id);
        info!("Validators: {}", policy.total);

        Ok(Self {
            config,
            keypair,
            policy,
        })
    }

    pub fn address(&self) -> &Address {
        self.keypair.address()
    }

    pub fn public_key(&self) -> Vec<u8> {
        self.keypair.public_key()
    }

    pub fn policy(&self) -> &ConsensusPolicy {
        &self.policy
    }

    pub fn thresholds(&self) -> Result<Threshold> {
        Threshold::from_policy(&self.policy)
    }

    pub fn suffrage(&self) -> Result<Suffrage> {
        let validators = self.config.validators();
        let selector = DefaultProposerSelector::new(validators.clone())?;
        Suffrage::new(validators, Arc::new(selector))
    }

    async fn open_storage(&self) -> Result<Arc<dyn BlockStorage>> {
        match self.config.storage.backend {
            StorageBackend::Memory => {
                warn!("Using in-memory block storage; the chain is lost on exit");
                Ok(Arc::new(MemoryBlockStorage::new()))
            }
            StorageBackend::Etcd => {
                let storage = EtcdBlockStorage::new(self.config.storage.etcd_endpoints.clone()).await?;
                info!("Connected to etcd at {:?}", self.config.storage.etcd_endpoints);
                Ok(Arc::new(storage))
            }
        }
    }

    pub async fn run(self) -> Result<()> {
        let address = self.address().clone();
        let storage = self.open_storage().await?;
        let ctx = NodeContext::new(address.clone(), self.policy.clone())?;
        let builder = NodeBuilder::new(ctx, self.suffrage()?, storage)?;
        let service = builder.service(self.public_key(), Utc::now());

        let tcp = TcpNode::new(
            address.clone(),
            self.policy.network_id.clone(),
            service,
            builder.inbound(),
        );
        let listen_addr = self.config.listen_addr()?;
        let bound = tcp
            .listen_on(listen_addr)
            .await
            .map_err(|e| ConsensusError::Network(format!("Failed to listen: {}", e)))?;
        info!("Listening on {}", bound);

        let peers: Vec<_> = self
            .config
            .peer_endpoints()?
            .into_iter()
            .filter(|(peer, _)| *peer != address)
            .collect();
        let reconnect = Duration::from_millis(self.config.network.reconnect_interval_ms);
        let connector = tokio::spawn(maintain_connections(tcp.clone(), peers, reconnect));

        let broadcaster = SealBroadcaster::new(
            self.keypair,
            self.policy.network_id.clone(),
            self.config.validators(),
            Arc::new(tcp.clone()) as Arc<dyn Transport>,
        );
        let node = builder
            .build(Arc::new(broadcaster), Arc::new(tcp.clone()) as Arc<dyn NetworkClient>)
            .await?;
        node.start().await?;

        let mut status = tokio::time::interval(STATUS_INTERVAL);
        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = status.tick() => report_status(&node, &tcp).await,
            }
        }

        info!("Shutting down");
        connector.abort();
        node.stop().await?;
        debug!("Final metrics:\n{}", node.ctx().metrics.render());
        Ok(())
    }
}

async fn report_status(node: &ConsensusNode, tcp: &TcpNode) {
    let home = node.home().view().await;
    let peers = tcp.connected_peers().await;
    info!(
        height = %home.height,
        round = %home.round,
        state = %home.state,
        "Status: {} peers connected",
        peers.len()
    );
}

/// Dials every validator that is not connected, then waits `interval`
/// and tries again.
async fn maintain_connections(tcp: TcpNode, peers: Vec<(Address, SocketAddr)>, interval: Duration) {
    loop {
        let connected = tcp.connected_peers().await;
        for (peer, addr) in peers.iter() {
            if connected.contains(peer) {
                continue;
            }
            match tcp.connect_to_peer(*addr).await {
                Ok(answered) if &answered == peer => info!("Connected to validator {} at {}", peer, addr),
                Ok(answered) => warn!("{} answered as {}, expected {}", addr, answered, peer),
                Err(e) => debug!("Validator {} at {} unavailable: {}", peer, addr, e),
            }
        }
        tokio::time::sleep(interval).await;
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
