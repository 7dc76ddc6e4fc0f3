//! Core protocol types.
//!
//! These structures travel "on the wire" between the client and the
//! authentication backend, plus the two identifier newtypes every other
//! crate passes around.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Canonical identifier of the signed-in subject.
///
/// Opaque: it may be the backend's user id or, when the backend does not
/// return one, the identity provider's uid. It never changes for the life
/// of a session.
///
/// `#[serde(transparent)]` makes `SubjectId("u1")` serialize as just
/// `"u1"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(pub String);

impl SubjectId {
    /// Creates a `SubjectId` from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrows the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A counter distinguishing successive sessions.
///
/// Every session start and every session end moves the counter forward.
/// Asynchronous work (a validation, a token refresh, a retried request)
/// remembers the generation it was issued under; when it finishes, a
/// mismatch with the live generation means the work belongs to a session
/// that no longer exists and its result is thrown away.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
    Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Generation(pub u64);

impl Generation {
    /// The generation that follows this one.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Exchange endpoint
// ---------------------------------------------------------------------------

/// Body of `POST <backend>/auth/exchange`.
///
/// The field name is fixed: the backend contract is a single
/// `provider_token` key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRequest {
    /// The identity token freshly obtained from the identity provider.
    pub provider_token: String,
}

impl ExchangeRequest {
    pub fn new(provider_token: impl Into<String>) -> Self {
        Self {
            provider_token: provider_token.into(),
        }
    }
}

/// Successful reply of the exchange endpoint.
///
/// Every field is optional: the backend may echo only what it knows.
/// Missing fields fall back to the identity provider's values during
/// reconciliation. `#[serde(default)]` turns absent keys into `None`
/// instead of a decode error, and unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeResponse {
    pub id: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub avatar: Option<String>,
    /// Backend-minted bearer credential for outbound API calls.
    pub access_token: Option<String>,
}

// ---------------------------------------------------------------------------
// Error bodies
// ---------------------------------------------------------------------------

/// The JSON body the backend attaches to a non-2xx reply.
///
/// `detail` is usually a string, but validation failures (HTTP 422) often
/// carry a list of objects instead, so it is kept as a raw JSON value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorBody {
    pub detail: Option<serde_json::Value>,
    pub message: Option<String>,
}

impl ErrorBody {
    /// Parses an error body. Returns `None` for anything that is not a
    /// JSON object (HTML error pages, empty bodies, plain text).
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        match serde_json::from_slice::<serde_json::Value>(data).ok()? {
            value @ serde_json::Value::Object(_) => {
                serde_json::from_value(value).ok()
            }
            _ => None,
        }
    }

    /// The human-readable detail: `detail` when present (strings as-is,
    /// anything else rendered as compact JSON), otherwise `message`.
    pub fn detail_text(&self) -> Option<String> {
        match &self.detail {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Null) | None => self.message.clone(),
            Some(other) => Some(other.to_string()),
        }
    }

    /// Whether the server says, by content, that the token has expired.
    pub fn asserts_expiry(&self) -> bool {
        let detail_says = matches!(
            &self.detail,
            Some(serde_json::Value::String(s)) if s.contains("expired")
        );
        let message_says = self
            .message
            .as_deref()
            .is_some_and(|m| m.contains("expired"));
        detail_says || message_says
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_next_is_strictly_greater() {
        let g = Generation(7);
        assert!(g.next() > g);
        assert_eq!(g.next(), Generation(8));
    }

    #[test]
    fn test_generation_display() {
        assert_eq!(Generation(3).to_string(), "gen-3");
    }

    #[test]
    fn test_subject_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&SubjectId::new("u1")).unwrap();
        assert_eq!(json, r#""u1""#);
    }

    #[test]
    fn test_exchange_response_missing_fields_are_none() {
        let resp: ExchangeResponse =
            serde_json::from_str(r#"{"id":"u1","access_token":"T1"}"#)
                .unwrap();

        assert_eq!(resp.id.as_deref(), Some("u1"));
        assert_eq!(resp.access_token.as_deref(), Some("T1"));
        assert!(resp.name.is_none());
        assert!(resp.avatar.is_none());
    }

    #[test]
    fn test_exchange_response_ignores_unknown_fields() {
        let resp: ExchangeResponse =
            serde_json::from_str(r#"{"id":"u1","plan":"pro"}"#).unwrap();
        assert_eq!(resp.id.as_deref(), Some("u1"));
    }

    #[test]
    fn test_error_body_string_detail() {
        let body = ErrorBody::from_bytes(br#"{"detail":"bad token"}"#)
            .expect("object body");
        assert_eq!(body.detail_text().as_deref(), Some("bad token"));
    }

    #[test]
    fn test_error_body_list_detail_rendered_as_json() {
        // FastAPI-style validation errors.
        let body = ErrorBody::from_bytes(
            br#"{"detail":[{"loc":["body","provider_token"],"msg":"field required"}]}"#,
        )
        .unwrap();

        let text = body.detail_text().unwrap();
        assert!(text.starts_with('['));
        assert!(text.contains("field required"));
    }

    #[test]
    fn test_error_body_falls_back_to_message() {
        let body =
            ErrorBody::from_bytes(br#"{"message":"rate limited"}"#).unwrap();
        assert_eq!(body.detail_text().as_deref(), Some("rate limited"));
    }

    #[test]
    fn test_error_body_non_object_is_none() {
        assert!(ErrorBody::from_bytes(b"Internal Server Error").is_none());
        assert!(ErrorBody::from_bytes(b"").is_none());
        assert!(ErrorBody::from_bytes(br#""just a string""#).is_none());
    }

    #[test]
    fn test_asserts_expiry_detects_detail_and_message() {
        let by_detail =
            ErrorBody::from_bytes(br#"{"detail":"Token has expired"}"#)
                .unwrap();
        let by_message =
            ErrorBody::from_bytes(br#"{"message":"session expired"}"#)
                .unwrap();
        let unrelated =
            ErrorBody::from_bytes(br#"{"detail":"not found"}"#).unwrap();

        assert!(by_detail.asserts_expiry());
        assert!(by_message.asserts_expiry());
        assert!(!unrelated.asserts_expiry());
    }
}
