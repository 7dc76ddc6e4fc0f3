//! The single canonical session slot.
//!
//! `SessionStore` is the only place a [`Session`] lives. Every mutation is a
//! compare-and-set on the [`Generation`] the caller observed, so a slow
//! operation that started under an older session can never overwrite a newer
//! one. The durable mirror is updated inside the same critical section as
//! the in-memory slot, which keeps the two from disagreeing.
//!
//! Readers get a [`SessionReader`], a cheap cloneable view backed by a
//! `tokio::sync::watch` channel, so they can also await changes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use keyward_protocol::Generation;
use tokio::sync::watch;

use crate::{PersistedSession, Session, SessionDraft, SessionMirror};

/// The live generation and the session that owns it, if any.
#[derive(Debug, Clone, Default)]
pub struct SessionSlot {
    pub generation: Generation,
    pub session: Option<Session>,
}

// ---------------------------------------------------------------------------
// SessionStore
// ---------------------------------------------------------------------------

/// Owner of the session slot and the durable mirror.
pub struct SessionStore {
    slot: watch::Sender<SessionSlot>,
    mirror: Arc<dyn SessionMirror>,
    /// Set while the mirror may still hold a session that has ended.
    clear_pending: AtomicBool,
}

impl SessionStore {
    pub fn new(mirror: Arc<dyn SessionMirror>) -> Self {
        let (slot, _) = watch::channel(SessionSlot::default());
        Self {
            slot,
            mirror,
            clear_pending: AtomicBool::new(false),
        }
    }

    /// A read-only view of the slot.
    pub fn reader(&self) -> SessionReader {
        SessionReader {
            rx: self.slot.subscribe(),
        }
    }

    pub fn current(&self) -> Option<Session> {
        self.slot.borrow().session.clone()
    }

    pub fn generation(&self) -> Generation {
        self.slot.borrow().generation
    }

    /// What the durable mirror holds, as left by this or a previous run.
    pub fn persisted(&self) -> Option<PersistedSession> {
        match self.mirror.load() {
            Ok(persisted) => persisted,
            Err(e) => {
                tracing::warn!(error = %e, "session mirror unreadable, ignoring");
                None
            }
        }
    }

    /// Clears the durable mirror without touching the live slot.
    ///
    /// Used at startup when the provider has no identity to resume, and to
    /// retry a clear that failed during teardown.
    pub fn discard_persisted(&self) {
        self.clear_mirror();
    }

    /// `true` when the last attempt to clear the mirror failed, so it may
    /// still hold the token of an ended session.
    pub fn mirror_clear_pending(&self) -> bool {
        self.clear_pending.load(Ordering::SeqCst)
    }

    fn clear_mirror(&self) {
        match self.mirror.clear() {
            Ok(()) => self.clear_pending.store(false, Ordering::SeqCst),
            Err(e) => {
                tracing::error!(error = %e, "failed to clear session mirror");
                self.clear_pending.store(true, Ordering::SeqCst);
            }
        }
    }

    /// Installs `draft` as the live session, provided nothing started or
    /// ended a session since the caller observed `expected`.
    ///
    /// Returns the installed session, or `None` when `expected` is stale.
    pub fn begin(
        &self,
        expected: Generation,
        draft: SessionDraft,
    ) -> Option<Session> {
        let mut installed = None;
        self.slot.send_if_modified(|slot| {
            if slot.generation != expected {
                return false;
            }
            let session = draft.into_session(slot.generation.next());
            match self.mirror.save(&session.to_persisted()) {
                // The new session overwrote whatever was left behind.
                Ok(()) => self.clear_pending.store(false, Ordering::SeqCst),
                Err(e) => tracing::warn!(error = %e, "failed to persist session"),
            }
            slot.generation = session.generation;
            slot.session = Some(session.clone());
            installed = Some(session);
            true
        });

        match &installed {
            Some(s) => tracing::info!(
                generation = %s.generation,
                subject = %s.subject_id,
                "session started"
            ),
            None => tracing::debug!(
                expected = %expected,
                "session start discarded: generation moved on"
            ),
        }
        installed
    }

    /// Replaces the access token of the session identified by
    /// `generation`. The generation itself is unchanged.
    ///
    /// Returns the renewed session, or `None` if that session is gone.
    pub fn renew(
        &self,
        generation: Generation,
        access_token: String,
        token_expiry: SystemTime,
    ) -> Option<Session> {
        let mut renewed = None;
        self.slot.send_if_modified(|slot| {
            let Some(session) = slot.session.as_mut() else {
                return false;
            };
            if session.generation != generation {
                return false;
            }
            session.access_token = access_token;
            session.token_expiry = token_expiry;
            if let Err(e) = self.mirror.save(&session.to_persisted()) {
                tracing::warn!(error = %e, "failed to persist renewed token");
            }
            renewed = Some(session.clone());
            true
        });

        if renewed.is_some() {
            tracing::debug!(generation = %generation, "session token renewed");
        }
        renewed
    }

    /// Ends whatever session is live, unconditionally.
    ///
    /// The generation advances even when no session is live, which makes
    /// interactive flows still in flight land as stale. The durable mirror
    /// is always cleared.
    pub fn end(&self) -> Option<Session> {
        let mut ended = None;
        self.slot.send_modify(|slot| {
            ended = self.take(slot);
        });
        ended
    }

    /// Ends the session only if `generation` is still the live one.
    ///
    /// Returns the ended session; `None` means some other flow already
    /// ended or replaced it.
    pub fn end_if_current(&self, generation: Generation) -> Option<Session> {
        let mut ended = None;
        self.slot.send_if_modified(|slot| {
            let owns = slot
                .session
                .as_ref()
                .is_some_and(|s| s.generation == generation);
            if !owns {
                return false;
            }
            ended = self.take(slot);
            true
        });
        ended
    }

    fn take(&self, slot: &mut SessionSlot) -> Option<Session> {
        let ended = slot.session.take();
        slot.generation = slot.generation.next();
        self.clear_mirror();
        match &ended {
            Some(s) => tracing::info!(
                generation = %s.generation,
                subject = %s.subject_id,
                "session ended"
            ),
            None => tracing::debug!(
                generation = %slot.generation,
                "session end with no live session"
            ),
        }
        ended
    }
}

// ---------------------------------------------------------------------------
// SessionReader
// ---------------------------------------------------------------------------

/// Read-only, cloneable view of the session slot.
#[derive(Debug, Clone)]
pub struct SessionReader {
    rx: watch::Receiver<SessionSlot>,
}

impl SessionReader {
    pub fn current(&self) -> Option<Session> {
        self.rx.borrow().session.clone()
    }

    pub fn generation(&self) -> Generation {
        self.rx.borrow().generation
    }

    /// `true` while `generation` names the live session.
    pub fn is_current(&self, generation: Generation) -> bool {
        self.rx
            .borrow()
            .session
            .as_ref()
            .is_some_and(|s| s.generation == generation)
    }

    /// Waits until the slot changes. Returns `false` once the store is
    /// gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}
