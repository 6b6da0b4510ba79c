use async_trait::async_trait;
use std::sync::Arc;
use quorum_crypto::KeyPair;
use quorum_types::{Address, BallotBody, ProposalBody, Result, SignedMessage};
use tracing::{debug, warn};

use crate::{Broadcaster, SealCodec, Transport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Ballot(BallotBody),
    Proposal(ProposalBody),
}

/// Broadcaster that seals with the node key and pushes frames through a
/// [`Transport`].
pub struct SealBroadcaster {
    keypair: KeyPair,
    network_id: Vec<u8>,
    validators: Vec<Address>,
    transport: Arc<dyn Transport>,
    codec: SealCodec,
}

impl SealBroadcaster {
    pub fn new(
        keypair: KeyPair,
        network_id: impl Into<Vec<u8>>,
        validators: Vec<Address>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            keypair,
            network_id: network_id.into(),
            validators,
            transport,
            codec: SealCodec::default(),
        }
    }

    fn recipients(&self, excludes: &[Address]) -> Vec<Address> {
        let me = self.keypair.address();
        let mut recipients = vec![me.clone()];
        recipients.extend(self.validators.iter().filter(|a| *a != me).cloned());
        recipients.retain(|address| !excludes.contains(address));
        recipients
    }
}

#[async_trait]
impl Broadcaster for SealBroadcaster {
    async fn send(&self, message: Outbound, excludes: &[Address]) -> Result<SignedMessage> {
        let signed = match message {
            Outbound::Ballot(body) => self.keypair.seal(&self.network_id, body)?.into_message(),
            Outbound::Proposal(body) => self.keypair.seal(&self.network_id, body)?.into_message(),
        };
        let frame = self.codec.encode(&signed)?;

        let recipients = self.recipients(excludes);
        debug!("Broadcasting {} to {} recipients", signed, recipients.len());

        for address in recipients.iter() {
            if let Err(e) = self.transport.deliver(address, frame.clone()).await {
                warn!("Failed to deliver {} to {}: {}", signed.kind(), address, e);
            }
        }

        Ok(signed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorum_types::{Hash, Height, Round};
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        delivered: Mutex<Vec<(Address, Vec<u8>)>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn deliver(&self, to: &Address, frame: Vec<u8>) -> Result<()> {
            self.delivered.lock().await.push((to.clone(), frame));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_send_reaches_self_and_validators_minus_excludes() {
        let keypair = KeyPair::generate();
        let me = keypair.address().clone();
        let validators = vec![me.clone(), Address::from("qv-b"), Address::from("qv-c")];
        let transport = Arc::new(RecordingTransport::default());
        let broadcaster = SealBroadcaster::new(keypair, "net", validators, transport.clone());

        let body = BallotBody::init(me.clone(), Height(1), Round(0), Hash::ZERO, Hash::ZERO);
        let signed = broadcaster
            .send(Outbound::Ballot(body), &[Address::from("qv-c")])
            .await
            .unwrap();

        let delivered = transport.delivered.lock().await;
        let recipients: Vec<_> = delivered.iter().map(|(to, _)| to.clone()).collect();
        assert_eq!(recipients, vec![me, Address::from("qv-b")]);

        let codec = SealCodec::default();
        assert_eq!(codec.open(b"net", &delivered[0].1).unwrap(), signed);
    }
}
