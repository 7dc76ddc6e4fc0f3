//! Transport abstraction layer for keyward.
//!
//! Two traits describe everything keyward sends over the network:
//!
//! - [`ExchangeBackend`]: trades an identity-provider token for an
//!   application session at `POST <backend>/auth/exchange`.
//! - [`ApiTransport`]: sends one outbound API call with a bearer
//!   credential attached.
//!
//! The request authorizer decides *which* credential to attach and what to
//! do with a 401; the transports only move bytes.
//!
//! # Feature Flags
//!
//! - `http` (default): [`HttpBackend`] and [`HttpTransport`] via `reqwest`

mod error;
#[cfg(feature = "http")]
mod http;

pub use error::{ExchangeError, TransportError};
#[cfg(feature = "http")]
pub use http::{HttpBackend, HttpTransport};

use std::fmt;
use std::future::Future;

use keyward_protocol::{
    Codec, ErrorBody, ExchangeResponse, JsonCodec, ProtocolError,
};
use serde::{de::DeserializeOwned, Serialize};

// ---------------------------------------------------------------------------
// Requests and responses
// ---------------------------------------------------------------------------

/// HTTP method of an outbound API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// An outbound API call, minus its credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the backend base URL, e.g. `/subjects`.
    pub path: String,
    /// JSON body, already encoded.
    pub body: Option<Vec<u8>>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    /// A request with a JSON body.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if `body` cannot be serialized.
    pub fn json<T: Serialize>(
        method: Method,
        path: impl Into<String>,
        body: &T,
    ) -> Result<Self, ProtocolError> {
        Ok(Self {
            method,
            path: path.into(),
            body: Some(JsonCodec.encode(body)?),
        })
    }
}

/// A request on its way through the authorizer.
///
/// `retried` flips from `false` to `true` at most once: a request that has
/// already been resent after a 401 is never resent again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedRequest {
    pub request: ApiRequest,
    retried: bool,
}

impl AuthorizedRequest {
    pub fn new(request: ApiRequest) -> Self {
        Self {
            request,
            retried: false,
        }
    }

    pub fn retried(&self) -> bool {
        self.retried
    }

    /// Marks the request as retried. Returns `false` if it already was, in
    /// which case it must not be sent again.
    pub fn mark_retried(&mut self) -> bool {
        !std::mem::replace(&mut self.retried, true)
    }
}

/// The raw reply to an outbound API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decodes the body as JSON.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the body is not the expected JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        JsonCodec.decode(&self.body)
    }

    /// The structured error body, if the reply carries one.
    pub fn error_body(&self) -> Option<ErrorBody> {
        ErrorBody::from_bytes(&self.body)
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Exchanges an identity-provider token for an application session.
pub trait ExchangeBackend: Send + Sync + 'static {
    /// Posts `{"provider_token": ...}` and returns the backend's view of
    /// the identity.
    fn exchange(
        &self,
        provider_token: &str,
    ) -> impl Future<Output = Result<ExchangeResponse, ExchangeError>> + Send;
}

/// Sends outbound API calls.
pub trait ApiTransport: Send + Sync + 'static {
    /// Sends `request` with `Authorization: Bearer <bearer>`.
    ///
    /// Any HTTP status is a successful send; interpreting 401/403 is the
    /// authorizer's job. Only failures to talk to the server are errors.
    fn send(
        &self,
        request: &ApiRequest,
        bearer: &str,
    ) -> impl Future<Output = Result<ApiResponse, TransportError>> + Send;
}

/// Builds the user-facing detail for a rejected exchange.
///
/// Order of preference: the error body's `detail`/`message`, then the raw
/// text, then a fixed phrase for 422, then the status reason.
pub fn rejection_detail(
    status: u16,
    body: &[u8],
    reason: Option<&str>,
) -> String {
    if let Some(detail) =
        ErrorBody::from_bytes(body).and_then(|b| b.detail_text())
    {
        return detail;
    }
    if status == 422 {
        return "Unprocessable Entity".to_string();
    }
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if !text.is_empty() {
        return text.to_string();
    }
    reason.unwrap_or("request failed").to_string()
}
