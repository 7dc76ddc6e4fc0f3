//! Codec trait and the JSON implementation.
//!
//! The exchange endpoint and the durable session mirror both speak JSON.
//! Callers go through [`Codec`] so neither hard-codes `serde_json`.

use serde::{de::DeserializeOwned, Serialize};

use crate::ProtocolError;

/// Turns wire bodies into bytes and back.
///
/// Shared by the HTTP backend and the file mirror, so implementations must
/// be `Send + Sync + 'static`.
pub trait Codec: Send + Sync + 'static {
    /// # Errors
    /// `ProtocolError::Encode` if `value` cannot be serialized.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// # Errors
    /// `ProtocolError::Decode` for bytes that are not a `T` (an HTML error
    /// page, a truncated body, a field of the wrong type).
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// JSON via `serde_json`.
///
/// ```rust
/// use keyward_protocol::{Codec, ExchangeRequest, JsonCodec};
///
/// let codec = JsonCodec;
/// let body = ExchangeRequest::new("eyJhbGciOi...");
///
/// let bytes = codec.encode(&body).unwrap();
/// assert_eq!(bytes, br#"{"provider_token":"eyJhbGciOi..."}"#);
///
/// let decoded: ExchangeRequest = codec.decode(&bytes).unwrap();
/// assert_eq!(decoded, body);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
