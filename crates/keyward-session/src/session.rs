//! Session types: the data structures that describe who is signed in.
//!
//! A session is the application's local record of the authenticated
//! identity. It tracks:
//! - WHO is signed in (`subject_id`, plus the display fields)
//! - WHAT credential to present (`access_token`)
//! - UNTIL WHEN that credential is good (`token_expiry`)
//! - WHICH session this is (`generation`)

use std::fmt;
use std::time::{Duration, SystemTime};

use keyward_protocol::{Generation, SubjectId};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// The single live authentication context.
///
/// Sessions are only created by the session controller and only live
/// inside the [`SessionStore`](crate::SessionStore); everything else gets
/// clones.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    /// Canonical subject identifier. Immutable for the session.
    pub subject_id: SubjectId,

    /// The identity provider's uid for the same person. Used to recognise
    /// provider notifications about an identity that already has a session.
    pub provider_uid: String,

    pub display_name: String,
    pub email: String,
    pub avatar_ref: String,

    /// Bearer credential for outbound API calls.
    pub access_token: String,

    /// Absolute instant after which `access_token` must not be used.
    pub token_expiry: SystemTime,

    /// Identifies this session among all sessions of the process.
    pub generation: Generation,
}

impl Session {
    /// Time left before `token_expiry`, or zero if already past.
    pub fn remaining_lifetime(&self, now: SystemTime) -> Duration {
        self.token_expiry
            .duration_since(now)
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        now >= self.token_expiry
    }

    /// `true` once the remaining lifetime has dropped to `threshold` or
    /// below.
    pub fn needs_refresh(&self, threshold: Duration, now: SystemTime) -> bool {
        self.remaining_lifetime(now) <= threshold
    }

    /// The subset of the session that survives a restart.
    pub fn to_persisted(&self) -> PersistedSession {
        PersistedSession {
            subject_id: self.subject_id.clone(),
            provider_uid: self.provider_uid.clone(),
            display_name: self.display_name.clone(),
            email: self.email.clone(),
            avatar_ref: self.avatar_ref.clone(),
            access_token: self.access_token.clone(),
        }
    }
}

// Hand-written so tokens never end up in logs through `{:?}`.
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("subject_id", &self.subject_id)
            .field("provider_uid", &self.provider_uid)
            .field("display_name", &self.display_name)
            .field("email", &self.email)
            .field("avatar_ref", &self.avatar_ref)
            .field("access_token", &"<redacted>")
            .field("token_expiry", &self.token_expiry)
            .field("generation", &self.generation)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// SessionDraft
// ---------------------------------------------------------------------------

/// A fully reconciled session that has not been given a generation yet.
///
/// The store assigns the generation when it installs the draft, so no
/// caller can pick (or reuse) one.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionDraft {
    pub subject_id: SubjectId,
    pub provider_uid: String,
    pub display_name: String,
    pub email: String,
    pub avatar_ref: String,
    pub access_token: String,
    pub token_expiry: SystemTime,
}

impl SessionDraft {
    pub(crate) fn into_session(self, generation: Generation) -> Session {
        Session {
            subject_id: self.subject_id,
            provider_uid: self.provider_uid,
            display_name: self.display_name,
            email: self.email,
            avatar_ref: self.avatar_ref,
            access_token: self.access_token,
            token_expiry: self.token_expiry,
            generation,
        }
    }

    /// Rebuilds a draft from the durable mirror, with a freshly validated
    /// expiry.
    pub fn from_persisted(
        persisted: PersistedSession,
        token_expiry: SystemTime,
    ) -> Self {
        Self {
            subject_id: persisted.subject_id,
            provider_uid: persisted.provider_uid,
            display_name: persisted.display_name,
            email: persisted.email,
            avatar_ref: persisted.avatar_ref,
            access_token: persisted.access_token,
            token_expiry,
        }
    }
}

impl fmt::Debug for SessionDraft {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionDraft")
            .field("subject_id", &self.subject_id)
            .field("display_name", &self.display_name)
            .field("access_token", &"<redacted>")
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// PersistedSession
// ---------------------------------------------------------------------------

/// What the durable mirror stores: display fields and the access token.
///
/// No expiry: a restored session is always revalidated against the
/// provider before use.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSession {
    pub subject_id: SubjectId,
    pub provider_uid: String,
    pub display_name: String,
    pub email: String,
    pub avatar_ref: String,
    pub access_token: String,
}

impl fmt::Debug for PersistedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistedSession")
            .field("subject_id", &self.subject_id)
            .field("provider_uid", &self.provider_uid)
            .field("access_token", &"<redacted>")
            .finish_non_exhaustive()
    }
}
