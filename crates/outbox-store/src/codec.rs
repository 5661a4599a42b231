//! Payload codecs.
//!
//! The store only ever persists byte sequences. A [`MessageCodec`] is injected
//! at construction and converts the caller's message type at the boundary.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Codec failure, surfaced to callers as `OutboxError::Encoding`.
#[derive(Error, Debug)]
pub enum CodecError {
    /// The message could not be serialized.
    #[error("failed to encode message: {0}")]
    Encode(#[source] BoxError),

    /// A stored payload could not be deserialized.
    #[error("failed to decode message: {0}")]
    Decode(#[source] BoxError),
}

/// Encode/decode pair for outbox message payloads.
pub trait MessageCodec<M>: Send + Sync {
    /// Serialize a message into the bytes stored in the `data` column.
    fn encode(&self, message: &M) -> Result<Vec<u8>, CodecError>;

    /// Deserialize bytes read from the `data` column.
    fn decode(&self, bytes: &[u8]) -> Result<M, CodecError>;
}

/// JSON codec for any serde message type.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<M> MessageCodec<M> for JsonCodec
where
    M: Serialize + DeserializeOwned,
{
    fn encode(&self, message: &M) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(message).map_err(|e| CodecError::Encode(Box::new(e)))
    }

    fn decode(&self, bytes: &[u8]) -> Result<M, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(Box::new(e)))
    }
}

/// Pass-through codec for callers that already hold encoded payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl MessageCodec<Vec<u8>> for RawCodec {
    fn encode(&self, message: &Vec<u8>) -> Result<Vec<u8>, CodecError> {
        Ok(message.clone())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(bytes.to_vec())
    }
}
