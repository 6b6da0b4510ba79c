use chrono::Utc;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use quorum_types::{Address, ConsensusError, Hash, Result, Seal, SealBody};

pub struct KeyPair {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
    address: Address,
}

impl KeyPair {
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 32 {
            return Err(ConsensusError::Config(
                "Invalid key length: expected 32 bytes".to_string(),
            ));
        }

        let signing_key = SigningKey::from_bytes(
            bytes
                .try_into()
                .map_err(|_| ConsensusError::Config("Failed to parse signing key".to_string()))?,
        );

        Ok(Self::from_signing_key(signing_key))
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| ConsensusError::Config(format!("Invalid private key hex: {}", e)))?;
        Self::from_bytes(&bytes)
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let verifying_key = signing_key.verifying_key();
        let address = address_from_public_key(verifying_key.as_bytes());
        Self {
            signing_key,
            verifying_key,
            address,
        }
    }

    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let signature = self.signing_key.sign(message);
        signature.to_bytes().to_vec()
    }

    pub fn public_key(&self) -> Vec<u8> {
        self.verifying_key.to_bytes().to_vec()
    }

    pub fn private_key(&self) -> Vec<u8> {
        self.signing_key.to_bytes().to_vec()
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Wraps `body` in a signed envelope bound to `network_id`.
    pub fn seal<T: SealBody>(&self, network_id: &[u8], body: T) -> Result<Seal<T>> {
        body.validate()?;

        let public_key = self.public_key();
        let signed_at = Utc::now();
        let canonical = Seal::canonical_bytes(&body, &self.address, &public_key, &signed_at)?;
        let hash = hash_data(&canonical);
        let signature = self.sign(&signing_message(network_id, &canonical));

        Ok(Seal {
            body,
            signer: self.address.clone(),
            public_key,
            signed_at,
            hash,
            signature,
        })
    }
}

impl Clone for KeyPair {
    fn clone(&self) -> Self {
        Self::from_signing_key(self.signing_key.clone())
    }
}

pub fn verify_signature(public_key: &[u8], message: &[u8], signature: &[u8]) -> Result<()> {
    if public_key.len() != 32 {
        return Err(ConsensusError::InvalidSignature);
    }

    if signature.len() != 64 {
        return Err(ConsensusError::InvalidSignature);
    }

    let verifying_key = VerifyingKey::from_bytes(
        public_key
            .try_into()
            .map_err(|_| ConsensusError::InvalidSignature)?,
    )
    .map_err(|_| ConsensusError::InvalidSignature)?;

    let signature = Signature::from_bytes(
        signature
            .try_into()
            .map_err(|_| ConsensusError::InvalidSignature)?,
    );

    verifying_key
        .verify(message, &signature)
        .map_err(|_| ConsensusError::InvalidSignature)
}

/// Checks that a received seal is well formed and signed by its claimed
/// signer for this network.
pub fn verify_seal<T: SealBody>(network_id: &[u8], seal: &Seal<T>) -> Result<()> {
    if address_from_public_key(&seal.public_key) != seal.signer {
        return Err(ConsensusError::InvalidSeal {
            hash: seal.hash,
            reason: format!("signer {} does not match public key", seal.signer),
        });
    }

    let canonical = seal.signing_bytes()?;
    if hash_data(&canonical) != seal.hash {
        return Err(ConsensusError::InvalidSeal {
            hash: seal.hash,
            reason: "hash does not match contents".to_string(),
        });
    }

    verify_signature(
        &seal.public_key,
        &signing_message(network_id, &canonical),
        &seal.signature,
    )?;

    seal.body.validate()
}

fn signing_message(network_id: &[u8], canonical: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(network_id.len() + canonical.len());
    message.extend_from_slice(network_id);
    message.extend_from_slice(canonical);
    message
}

pub fn hash_data(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&hasher.finalize());
    Hash(digest)
}

pub fn double_sha256(data: &[u8]) -> Hash {
    let first = hash_data(data);
    hash_data(first.as_bytes())
}

/// Address is the prefix followed by the first 20 bytes of sha256(public key).
pub fn address_from_public_key(public_key: &[u8]) -> Address {
    let digest = hash_data(public_key);
    Address(format!("{}{}", Address::PREFIX, hex::encode(&digest.as_bytes()[..20])))
}
