//! Merging the provider's and the backend's view of an identity.
//!
//! For every field the backend wins, then the provider, then (sign-up
//! only) what the user typed, then a generated placeholder. Empty strings
//! count as absent.

use keyward_protocol::{ExchangeResponse, SubjectId};
use keyward_provider::{ProviderIdentity, TokenResult};
use keyward_session::SessionDraft;

/// Name used when nothing better is known.
const FALLBACK_NAME: &str = "User";

/// What seeds the placeholder avatar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AvatarSeed {
    /// The email address (password flows).
    Email,
    /// The provider uid (federated flows, restored identities).
    Uid,
}

/// Inputs of one reconciliation.
pub(crate) struct Reconcile<'a> {
    pub identity: &'a ProviderIdentity,
    pub backend: &'a ExchangeResponse,
    pub provider_token: &'a TokenResult,
    /// Display name typed during sign-up.
    pub supplied_name: Option<&'a str>,
    pub seed: AvatarSeed,
    pub avatar_base: &'a str,
}

impl Reconcile<'_> {
    pub fn into_draft(self) -> SessionDraft {
        let backend = self.backend;
        let identity = self.identity;

        let email = first([backend.email.as_deref(), identity.email.as_deref()])
            .unwrap_or_default()
            .to_string();

        let display_name = first([
            backend.name.as_deref(),
            identity.display_name.as_deref(),
            self.supplied_name,
        ])
        .map(str::to_string)
        .unwrap_or_else(|| placeholder_name(&email));

        let avatar_ref = first([backend.avatar.as_deref(), identity.photo_url.as_deref()])
            .map(str::to_string)
            .unwrap_or_else(|| {
                let seed = match self.seed {
                    AvatarSeed::Email if !email.is_empty() => email.as_str(),
                    _ => identity.uid.as_str(),
                };
                placeholder_avatar(self.avatar_base, seed)
            });

        let subject_id = first([backend.id.as_deref()]).unwrap_or(identity.uid.as_str());

        // The backend's own credential when it minted one; otherwise the
        // provider token doubles as the bearer.
        let access_token = first([backend.access_token.as_deref()])
            .unwrap_or(self.provider_token.token.as_str())
            .to_string();

        SessionDraft {
            subject_id: SubjectId::new(subject_id),
            provider_uid: identity.uid.clone(),
            display_name,
            email,
            avatar_ref,
            access_token,
            token_expiry: self.provider_token.expiration_time,
        }
    }
}

fn first<'a, const N: usize>(candidates: [Option<&'a str>; N]) -> Option<&'a str> {
    candidates
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty())
}

/// The local part of `email`, or `"User"`.
pub(crate) fn placeholder_name(email: &str) -> String {
    email
        .split('@')
        .next()
        .filter(|local| !local.is_empty() && email.contains('@'))
        .unwrap_or(FALLBACK_NAME)
        .to_string()
}

/// Deterministic avatar URL for `seed`.
pub(crate) fn placeholder_avatar(avatar_base: &str, seed: &str) -> String {
    format!("{avatar_base}?seed={seed}")
}
