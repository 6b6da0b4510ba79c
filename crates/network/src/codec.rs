//! Binary codec for signed messages.
//!
//! Frame layout: `[wire version: u8][discriminant: u8][bincode payload]`.
//! Each message variant registers its own decoder under its discriminant;
//! frames with an unregistered discriminant fail cleanly.

use std::collections::HashMap;
use quorum_crypto::verify_seal;
use quorum_types::{BallotBody, MessageKind, ProposalBody, Result, Seal, SealBody, SignedMessage};

use crate::error::CodecError;

pub const WIRE_VERSION: u8 = 1;

const HEADER_LEN: usize = 2;

type DecodeFn = fn(&[u8]) -> std::result::Result<SignedMessage, CodecError>;

#[derive(Clone)]
pub struct SealCodec {
    decoders: HashMap<u8, DecodeFn>,
}

impl SealCodec {
    pub fn empty() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    pub fn register<T: SealBody>(&mut self) {
        self.decoders.insert(T::KIND.discriminant(), decode_seal::<T>);
    }

    pub fn is_registered(&self, kind: MessageKind) -> bool {
        self.decoders.contains_key(&kind.discriminant())
    }

    pub fn encode(&self, message: &SignedMessage) -> std::result::Result<Vec<u8>, CodecError> {
        let kind = message.kind();
        if !self.is_registered(kind) {
            return Err(CodecError::UnknownMessageType(kind.discriminant()));
        }

        let payload = match message {
            SignedMessage::Ballot(seal) => bincode::serialize(seal),
            SignedMessage::Proposal(seal) => bincode::serialize(seal),
        }
        .map_err(|e| CodecError::Payload {
            kind,
            reason: e.to_string(),
        })?;

        let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
        frame.push(WIRE_VERSION);
        frame.push(kind.discriminant());
        frame.extend_from_slice(&payload);
        Ok(frame)
    }

    pub fn decode(&self, frame: &[u8]) -> std::result::Result<SignedMessage, CodecError> {
        if frame.len() < HEADER_LEN {
            return Err(CodecError::Truncated { len: frame.len() });
        }

        if frame[0] != WIRE_VERSION {
            return Err(CodecError::UnsupportedVersion(frame[0]));
        }

        let decode = self
            .decoders
            .get(&frame[1])
            .ok_or(CodecError::UnknownMessageType(frame[1]))?;

        decode(&frame[HEADER_LEN..])
    }

    /// Decodes a frame and verifies its seal against `network_id`.
    pub fn open(&self, network_id: &[u8], frame: &[u8]) -> Result<SignedMessage> {
        let message = self.decode(frame)?;
        match &message {
            SignedMessage::Ballot(seal) => verify_seal(network_id, seal)?,
            SignedMessage::Proposal(seal) => verify_seal(network_id, seal)?,
        }
        Ok(message)
    }
}

impl Default for SealCodec {
    fn default() -> Self {
        let mut codec = Self::empty();
        codec.register::<BallotBody>();
        codec.register::<ProposalBody>();
        codec
    }
}

fn decode_seal<T: SealBody>(payload: &[u8]) -> std::result::Result<SignedMessage, CodecError> {
    let seal: Seal<T> = bincode::deserialize(payload).map_err(|e| CodecError::Payload {
        kind: T::KIND,
        reason: e.to_string(),
    })?;
    Ok(T::into_message(seal))
}
