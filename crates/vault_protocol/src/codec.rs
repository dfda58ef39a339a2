//! CBOR codec for wire messages.
//!
//! All request, response and stream frames cross the wire boundary as CBOR
//! produced by `ciborium` from the serde derives of the protocol types.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors raised while encoding or decoding wire messages.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Serialization failed.
    #[error("encode failed: {0}")]
    Encode(String),

    /// The input was not a valid message of the expected type.
    #[error("decode failed: {0}")]
    Decode(String),
}

/// Encodes a message to CBOR bytes.
pub fn encode<T: Serialize>(message: &T) -> CodecResult<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::into_writer(message, &mut out).map_err(|e| CodecError::Encode(e.to_string()))?;
    Ok(out)
}

/// Decodes a message from CBOR bytes.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    ciborium::from_reader(bytes).map_err(|e| CodecError::Decode(e.to_string()))
}
