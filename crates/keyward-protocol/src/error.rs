//! Error types for the protocol layer.
//!
//! Each crate in keyward defines its own error enum. A `ProtocolError`
//! always means the bytes were wrong, never the network or the session.

/// A wire body could not be encoded or decoded.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Usually a proxy answering with HTML, or a truncated body.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),
}
