//! Wire protocol for keyward.
//!
//! This crate defines what the client and the authentication backend say
//! to each other, and nothing else:
//!
//! - **Types** ([`ExchangeRequest`], [`ExchangeResponse`], [`ErrorBody`]):
//!   the JSON bodies of `POST <backend>/auth/exchange` and of error replies.
//! - **Identifiers** ([`SubjectId`], [`Generation`]): newtypes shared by
//!   every layer above.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how those bodies are
//!   converted to/from bytes.
//! - **Errors** ([`ProtocolError`]): what can go wrong while doing so.
//!
//! # Architecture
//!
//! ```text
//! Transport (HTTP bytes) → Protocol (typed bodies) → Session (who is signed in)
//! ```

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

mod codec;
mod error;
mod types;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use codec::{Codec, JsonCodec};
pub use error::ProtocolError;
pub use types::{
    ErrorBody, ExchangeRequest, ExchangeResponse, Generation, SubjectId,
};
