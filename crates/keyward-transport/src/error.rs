use keyward_protocol::ProtocolError;

/// Errors that can occur while moving a request over the network.
///
/// None of these say anything about the validity of a token; they only
/// mean the other side could not be asked.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Connecting, sending, or reading the reply failed.
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    /// The request did not complete within its timeout.
    #[error("request timed out")]
    TimedOut,

    /// The transport could not be constructed (bad base URL, TLS setup).
    #[error("invalid transport configuration: {0}")]
    Config(String),
}

/// Errors from the provider-token exchange endpoint.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    /// The backend answered with a non-2xx status. `detail` is what the
    /// backend said, extracted from its error body.
    #[error("exchange rejected ({status}): {detail}")]
    Rejected { status: u16, detail: String },

    /// The backend could not be reached at all.
    #[error(transparent)]
    Unavailable(#[from] TransportError),

    /// The request body could not be encoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
