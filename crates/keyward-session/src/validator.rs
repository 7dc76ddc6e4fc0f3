//! Token freshness checks against the identity provider.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use keyward_protocol::Generation;
use keyward_provider::{IdentityProvider, ProviderError};

use crate::{AuthError, SessionReader};

/// Verdict of one [`TokenValidator::validate`] call.
///
/// Produced fresh every time; never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub is_expired: bool,
    pub error: Option<AuthError>,
    /// The session generation that was live when the check was issued.
    pub generation: Generation,
    /// Expiry reported by the provider, when it answered.
    pub expires_at: Option<SystemTime>,
}

impl ValidationResult {
    fn valid(generation: Generation, expires_at: SystemTime) -> Self {
        Self {
            is_valid: true,
            is_expired: false,
            error: None,
            generation,
            expires_at: Some(expires_at),
        }
    }

    fn expired(
        generation: Generation,
        error: AuthError,
        expires_at: Option<SystemTime>,
    ) -> Self {
        Self {
            is_valid: false,
            is_expired: true,
            error: Some(error),
            generation,
            expires_at,
        }
    }

    fn failed(generation: Generation, error: AuthError) -> Self {
        Self {
            is_valid: false,
            is_expired: false,
            error: Some(error),
            generation,
            expires_at: None,
        }
    }

    /// `true` when the check could not reach a conclusion about the token.
    pub fn is_transient(&self) -> bool {
        !self.is_valid
            && !self.is_expired
            && self.error.as_ref().is_some_and(AuthError::is_transient)
    }
}

/// Forces a non-cached check of the current identity against the provider.
///
/// Has no side effects beyond the provider's own refresh; it never touches
/// the session store.
pub struct TokenValidator<P> {
    provider: Arc<P>,
    reader: SessionReader,
    timeout: Duration,
}

impl<P> Clone for TokenValidator<P> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            reader: self.reader.clone(),
            timeout: self.timeout,
        }
    }
}

impl<P: IdentityProvider> TokenValidator<P> {
    /// `timeout` bounds the provider round trip; hitting it counts as a
    /// network failure.
    pub fn new(provider: Arc<P>, reader: SessionReader, timeout: Duration) -> Self {
        Self {
            provider,
            reader,
            timeout,
        }
    }

    pub async fn validate(&self) -> ValidationResult {
        let generation = self.reader.generation();

        if self.provider.current_identity().is_none() {
            return ValidationResult::failed(
                generation,
                AuthError::UnauthenticatedRequest,
            );
        }

        let outcome = tokio::time::timeout(
            self.timeout,
            self.provider.get_token_result(true),
        )
        .await;

        let result = match outcome {
            Err(_) => {
                tracing::warn!(
                    generation = %generation,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "token validation timed out"
                );
                ValidationResult::failed(generation, AuthError::NetworkUnavailable)
            }
            Ok(Err(e @ (ProviderError::TokenExpired | ProviderError::TokenRevoked))) => {
                ValidationResult::expired(generation, e.into(), None)
            }
            Ok(Err(e)) => ValidationResult::failed(generation, e.into()),
            Ok(Ok(token)) => {
                // Judge the expiry the provider reported, not anything cached
                // locally.
                if SystemTime::now() >= token.expiration_time {
                    ValidationResult::expired(
                        generation,
                        AuthError::TokenExpired,
                        Some(token.expiration_time),
                    )
                } else {
                    ValidationResult::valid(generation, token.expiration_time)
                }
            }
        };

        tracing::debug!(
            generation = %generation,
            valid = result.is_valid,
            expired = result.is_expired,
            "token validated"
        );
        result
    }
}
