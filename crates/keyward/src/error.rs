//! Unified error type for keyward.

use keyward_protocol::ProtocolError;
use keyward_session::{AuthError, MirrorError};
use keyward_transport::{ExchangeError, TransportError};

/// Top-level error that wraps all crate-specific errors.
///
/// Session operations themselves return [`AuthError`], the vocabulary the
/// UI shows to people. `KeywardError` is for the wiring around them:
/// building transports, reading the mirror, encoding request bodies.
#[derive(Debug, thiserror::Error)]
pub enum KeywardError {
    /// An authentication outcome (credentials, expiry, backend rejection).
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// A transport-level error (connect, timeout, client setup).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The provider-token exchange failed.
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    /// A protocol-level error (encode, decode).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The durable session mirror could not be read or written.
    #[error(transparent)]
    Mirror(#[from] MirrorError),
}
