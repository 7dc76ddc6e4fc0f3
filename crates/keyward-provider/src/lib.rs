//! Identity provider abstraction for keyward.
//!
//! keyward doesn't issue identity tokens. An external identity provider
//! (Firebase Auth, Auth0, Supabase, a corporate IdP, ...) does. This crate
//! defines the narrow surface keyward consumes from it: the
//! [`IdentityProvider`] trait, the values crossing that boundary, and the
//! provider's error vocabulary.
//!
//! # Feature Flags
//!
//! - `memory`: [`MemoryProvider`], an in-process provider with scripted
//!   failures, used by tests and the demo binary.

mod error;
#[cfg(feature = "memory")]
mod memory;

pub use error::ProviderError;
#[cfg(feature = "memory")]
pub use memory::{FederatedMode, MemoryProvider};

use std::future::Future;
use std::time::SystemTime;

use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// Boundary values
// ---------------------------------------------------------------------------

/// What the provider knows about the signed-in identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderIdentity {
    /// The provider's stable identifier for this identity.
    pub uid: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub photo_url: Option<String>,
}

/// A token together with its absolute expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenResult {
    pub token: String,
    pub expiration_time: SystemTime,
}

/// A change in the provider's signed-in state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStateEvent {
    /// An identity is now signed in (interactive login, redirect
    /// completion, or restored at startup).
    SignedIn(ProviderIdentity),
    /// No identity is signed in any more.
    SignedOut,
}

// ---------------------------------------------------------------------------
// IdentityProvider
// ---------------------------------------------------------------------------

/// The operations keyward needs from an identity provider.
///
/// # Trait bounds
///
/// - `Send + Sync` → the provider is shared between interactive flows, the
///   background refresh task, and every outbound request.
/// - `'static` → it lives as long as the session controller.
///
/// Methods return `impl Future + Send` rather than using `async fn`
/// directly so that callers can hold the futures across `tokio::spawn`.
/// Implementors may still write plain `async fn`.
pub trait IdentityProvider: Send + Sync + 'static {
    /// Authenticates with an identifier (usually an email) and a secret.
    fn sign_in(
        &self,
        identifier: &str,
        secret: &str,
    ) -> impl Future<Output = Result<ProviderIdentity, ProviderError>> + Send;

    /// Creates an account and signs it in.
    fn sign_up(
        &self,
        display_name: &str,
        identifier: &str,
        secret: &str,
    ) -> impl Future<Output = Result<ProviderIdentity, ProviderError>> + Send;

    /// Signs the current identity out.
    fn sign_out(
        &self,
    ) -> impl Future<Output = Result<(), ProviderError>> + Send;

    /// The identity currently signed in, if any. Never performs I/O.
    fn current_identity(&self) -> Option<ProviderIdentity>;

    /// Returns an identity token. With `force_refresh` the provider must
    /// contact its server instead of returning a cached token, which is how
    /// revocation and disabled accounts are observed.
    fn get_token(
        &self,
        force_refresh: bool,
    ) -> impl Future<Output = Result<String, ProviderError>> + Send;

    /// Like [`get_token`](Self::get_token) but also reports the expiry.
    fn get_token_result(
        &self,
        force_refresh: bool,
    ) -> impl Future<Output = Result<TokenResult, ProviderError>> + Send;

    /// Runs the provider-native interactive federated flow.
    ///
    /// Returns [`ProviderError::InteractiveUnavailable`] when the flow
    /// cannot complete here (blocked popup, headless environment).
    fn federated_sign_in(
        &self,
    ) -> impl Future<Output = Result<ProviderIdentity, ProviderError>> + Send;

    /// Starts the redirect-based federated flow. Completion is reported
    /// later through an [`AuthStateEvent::SignedIn`].
    fn federated_sign_in_redirect(
        &self,
    ) -> impl Future<Output = Result<(), ProviderError>> + Send;

    /// Subscribes to sign-in state changes. Dropping the receiver
    /// unsubscribes.
    fn subscribe(&self) -> broadcast::Receiver<AuthStateEvent>;
}
