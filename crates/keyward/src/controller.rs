//! Session lifecycle orchestration.
//!
//! [`SessionController`] is the only component that starts or ends a
//! session. It runs the interactive flows (login, sign-up, federated
//! login), the startup resume, the reaction to provider state changes, and
//! every teardown, whether asked for by the user or forced by the refresh
//! task or the request authorizer.
//!
//! # Consistency model
//!
//! Establishing flows are serialized by an async mutex, so two sign-ins
//! never race each other. Teardown deliberately does *not* take that lock:
//! logout is immediate and unconditional. A flow that was in flight when a
//! logout landed notices at the very end, because the store refuses to
//! install a session whose expected generation has moved on, and reports
//! [`AuthError::Superseded`].

use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use keyward_protocol::{ExchangeResponse, Generation};
use keyward_provider::{
    AuthStateEvent, IdentityProvider, ProviderError, ProviderIdentity, TokenResult,
};
use keyward_refresh::{RefreshScheduler, RefreshTick, TickFlow};
use keyward_session::{
    AuthError, FileMirror, MemoryMirror, Session, SessionDraft, SessionMirror, SessionReader,
    SessionStore, TokenValidator,
};
use keyward_transport::{ExchangeBackend, ExchangeError};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::reconcile::{AvatarSeed, Reconcile};
use crate::KeywardConfig;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

struct ControllerState<P, B> {
    provider: Arc<P>,
    backend: B,
    store: SessionStore,
    validator: TokenValidator<P>,
    scheduler: RefreshScheduler,
    config: KeywardConfig,
    /// Serializes the flows that establish a session.
    flow: Mutex<()>,
    /// Single-flights token refreshes.
    refresh: Mutex<()>,
}

/// Orchestrates the session lifecycle. Cheap to clone; clones share state.
pub struct SessionController<P, B> {
    inner: Arc<ControllerState<P, B>>,
}

impl<P, B> Clone for SessionController<P, B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for a [`SessionController`].
///
/// ```rust,ignore
/// let controller = SessionController::builder(provider, backend)
///     .config(KeywardConfig::from_env())
///     .build();
/// ```
pub struct SessionControllerBuilder<P, B> {
    provider: Arc<P>,
    backend: B,
    config: KeywardConfig,
    mirror: Option<Arc<dyn SessionMirror>>,
}

impl<P: IdentityProvider, B: ExchangeBackend> SessionControllerBuilder<P, B> {
    pub fn config(mut self, config: KeywardConfig) -> Self {
        self.config = config;
        self
    }

    /// Overrides the durable mirror chosen from the config.
    pub fn mirror(mut self, mirror: Arc<dyn SessionMirror>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    pub fn build(self) -> SessionController<P, B> {
        let config = self.config.validated();
        let mirror: Arc<dyn SessionMirror> = match (self.mirror, &config.mirror_path) {
            (Some(mirror), _) => mirror,
            (None, Some(path)) => Arc::new(FileMirror::new(path)),
            (None, None) => Arc::new(MemoryMirror::new()),
        };
        let store = SessionStore::new(mirror);
        let validator = TokenValidator::new(
            Arc::clone(&self.provider),
            store.reader(),
            config.call_timeout,
        );
        let scheduler = RefreshScheduler::new(config.refresh_config());

        SessionController {
            inner: Arc::new(ControllerState {
                provider: self.provider,
                backend: self.backend,
                store,
                validator,
                scheduler,
                config,
                flow: Mutex::new(()),
                refresh: Mutex::new(()),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

impl<P: IdentityProvider, B: ExchangeBackend> SessionController<P, B> {
    pub fn builder(provider: Arc<P>, backend: B) -> SessionControllerBuilder<P, B> {
        SessionControllerBuilder {
            provider,
            backend,
            config: KeywardConfig::default(),
            mirror: None,
        }
    }

    pub fn current(&self) -> Option<Session> {
        self.inner.store.current()
    }

    pub fn generation(&self) -> Generation {
        self.inner.store.generation()
    }

    pub fn reader(&self) -> SessionReader {
        self.inner.store.reader()
    }

    pub fn validator(&self) -> &TokenValidator<P> {
        &self.inner.validator
    }

    pub fn config(&self) -> &KeywardConfig {
        &self.inner.config
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.inner.provider
    }

    /// The generation of the running refresh task, if any.
    pub fn refresh_generation(&self) -> Option<Generation> {
        self.inner.scheduler.active_generation()
    }

    // -- interactive flows -----------------------------------------------

    /// Signs in with an identifier and secret, then exchanges the provider
    /// token with the backend.
    ///
    /// # Errors
    /// Provider failures map to their [`AuthError`] kinds. A refused
    /// exchange is [`AuthError::BackendRejected`] carrying the backend's
    /// own message; an unreachable backend is
    /// [`AuthError::BackendUnavailable`]. No session exists afterwards in
    /// either case.
    pub async fn login(&self, identifier: &str, secret: &str) -> Result<Session, AuthError> {
        let _flow = self.inner.flow.lock().await;
        let expected = self.generation();

        let identity = self
            .bounded(self.inner.provider.sign_in(identifier, secret))
            .await
            .inspect_err(|e| debug!(error = %e, "provider sign-in failed"))?;

        self.establish(identity, None, AvatarSeed::Email, expected)
            .await
    }

    /// Creates an account, then proceeds exactly like [`login`](Self::login).
    /// `display_name` is used only when neither the backend nor the
    /// provider knows a name.
    pub async fn signup(
        &self,
        display_name: &str,
        identifier: &str,
        secret: &str,
    ) -> Result<Session, AuthError> {
        let _flow = self.inner.flow.lock().await;
        let expected = self.generation();

        let identity = self
            .bounded(self.inner.provider.sign_up(display_name, identifier, secret))
            .await
            .inspect_err(|e| debug!(error = %e, "provider sign-up failed"))?;

        self.establish(identity, Some(display_name), AvatarSeed::Email, expected)
            .await
    }

    /// Runs the provider's interactive federated flow.
    ///
    /// When the interactive flow cannot complete here, starts the redirect
    /// flow instead and returns `Ok(None)`. The session is then established
    /// by [`watch_auth_state`](Self::watch_auth_state) once the provider
    /// reports the signed-in identity.
    pub async fn federated_login(&self) -> Result<Option<Session>, AuthError> {
        let _flow = self.inner.flow.lock().await;
        let expected = self.generation();

        match self.bounded(self.inner.provider.federated_sign_in()).await {
            Ok(identity) => self
                .establish(identity, None, AvatarSeed::Uid, expected)
                .await
                .map(Some),
            Err(ProviderError::InteractiveUnavailable(reason)) => {
                info!(%reason, "interactive sign-in unavailable, falling back to redirect");
                self.bounded(self.inner.provider.federated_sign_in_redirect())
                    .await?;
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Picks up an identity the provider already holds at startup.
    ///
    /// The identity is validated with a forced check first. When the
    /// durable mirror holds a session for the same identity, that session
    /// is restored without a new exchange; otherwise a full exchange runs.
    /// With no provider identity the mirror is cleared and `Ok(None)` is
    /// returned.
    pub async fn resume(&self) -> Result<Option<Session>, AuthError> {
        let _flow = self.inner.flow.lock().await;

        if let Some(session) = self.current() {
            return Ok(Some(session));
        }
        let Some(identity) = self.inner.provider.current_identity() else {
            self.inner.store.discard_persisted();
            return Ok(None);
        };
        let expected = self.generation();

        let expiry = self.adoptable(&identity).await?;

        let persisted = self
            .inner
            .store
            .persisted()
            .filter(|p| p.provider_uid == identity.uid);
        let Some(persisted) = persisted else {
            return self
                .establish(identity, None, AvatarSeed::Uid, expected)
                .await
                .map(Some);
        };

        let draft = SessionDraft::from_persisted(persisted, expiry);
        let session = self
            .inner
            .store
            .begin(expected, draft)
            .ok_or(AuthError::Superseded)?;
        info!(generation = %session.generation, "session resumed from mirror");
        self.start_refresh(session.generation);
        Ok(Some(session))
    }

    // -- teardown --------------------------------------------------------

    /// Ends the session unconditionally.
    ///
    /// Ends the session (advancing the generation and clearing the durable
    /// mirror), cancels its refresh task, then asks the provider to sign
    /// out. A mirror that could not be cleared is retried once. A failing
    /// sign-out is logged and never blocks the local teardown. Calling it
    /// with no live session is harmless.
    pub async fn logout(&self) {
        match self.inner.store.end() {
            Some(s) => {
                self.inner.scheduler.cancel_generation(s.generation);
                info!(generation = %s.generation, "logged out");
            }
            None => debug!("logout with no live session"),
        }
        if self.inner.store.mirror_clear_pending() {
            self.inner.store.discard_persisted();
        }
        self.sign_out_best_effort().await;
    }

    /// Ends the session identified by `generation` after an unrecoverable
    /// authentication failure.
    ///
    /// Returns `true` if this call ended it. A later session, or a session
    /// already ended by someone else, is left alone; this is what makes
    /// several concurrent failure reports end a session exactly once.
    pub async fn force_logout(&self, generation: Generation) -> bool {
        if self.inner.store.end_if_current(generation).is_none() {
            debug!(generation = %generation, "forced logout for stale generation ignored");
            return false;
        }
        self.inner.scheduler.cancel_generation(generation);
        warn!(generation = %generation, "session force-ended");

        // A new sign-in may have started since; never sign that one out.
        if self.current().is_none() {
            self.sign_out_best_effort().await;
        }
        true
    }

    /// Stops background work. The session itself is left as it is.
    pub fn shutdown(&self) {
        self.inner.scheduler.cancel();
    }

    // -- token refresh ---------------------------------------------------

    /// Obtains a fresh bearer for the session `generation` and stores it.
    ///
    /// Forces a provider token refresh and re-runs the exchange. Calls are
    /// single-flighted: when `stale_token` is no longer the session's
    /// token, another caller already refreshed and its result is returned
    /// without further I/O.
    ///
    /// # Errors
    /// [`AuthError::UnauthenticatedRequest`] when that session is gone;
    /// [`AuthError::TokenExpired`] when the provider hands back a token that
    /// is already out of date; otherwise whatever the provider or the
    /// exchange reported.
    pub async fn refresh_session(
        &self,
        generation: Generation,
        stale_token: &str,
    ) -> Result<Session, AuthError> {
        let _refresh = self.inner.refresh.lock().await;

        let session = self
            .current()
            .filter(|s| s.generation == generation)
            .ok_or(AuthError::UnauthenticatedRequest)?;
        if session.access_token != stale_token {
            debug!(generation = %generation, "token already refreshed by another caller");
            return Ok(session);
        }

        let token = self
            .bounded(self.inner.provider.get_token_result(true))
            .await?;
        in_date(&token)?;
        let response = self.exchange(&token.token).await?;
        let access_token = response
            .access_token
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(token.token);

        self.inner
            .store
            .renew(generation, access_token, token.expiration_time)
            .ok_or(AuthError::UnauthenticatedRequest)
    }

    // -- provider state changes ------------------------------------------

    /// Reacts to the provider's sign-in state changes until the returned
    /// subscription is dropped or unsubscribed.
    ///
    /// - `SignedIn` for the identity that already owns the live session is
    ///   ignored.
    /// - Any other `SignedIn` is validated, then established through the
    ///   exchange. A failed validation runs the logout path instead.
    /// - `SignedOut` while a session is live ends it locally.
    ///
    /// The listener outlives individual sessions, which is what lets a
    /// redirect flow started by [`federated_login`](Self::federated_login)
    /// complete after the fact.
    pub fn watch_auth_state(&self) -> AuthStateSubscription {
        let events = self.inner.provider.subscribe();
        let weak = Arc::downgrade(&self.inner);
        let task = tokio::spawn(listen(weak, events));
        debug!("auth-state listener started");
        AuthStateSubscription { task }
    }

    async fn on_auth_event(&self, event: AuthStateEvent) {
        match event {
            AuthStateEvent::SignedIn(identity) => self.adopt(identity).await,
            AuthStateEvent::SignedOut => {
                // Stale event from a sign-out that a newer sign-in already
                // superseded.
                if self.inner.provider.current_identity().is_some() {
                    return;
                }
                if let Some(session) = self.current() {
                    info!(generation = %session.generation, "provider signed out, ending session");
                    if self.inner.store.end_if_current(session.generation).is_some() {
                        self.inner.scheduler.cancel_generation(session.generation);
                    }
                }
            }
        }
    }

    async fn adopt(&self, identity: ProviderIdentity) {
        let _flow = self.inner.flow.lock().await;

        let still_signed_in = self
            .inner
            .provider
            .current_identity()
            .is_some_and(|current| current.uid == identity.uid);
        if !still_signed_in {
            debug!(uid = %identity.uid, "ignoring sign-in event the provider has moved past");
            return;
        }
        let owned = self
            .current()
            .is_some_and(|s| s.provider_uid == identity.uid);
        if owned {
            debug!(uid = %identity.uid, "identity already owns the live session");
            return;
        }
        let expected = self.generation();

        if self.adoptable(&identity).await.is_err() {
            return;
        }
        if let Err(e) = self
            .establish(identity, None, AvatarSeed::Uid, expected)
            .await
        {
            warn!(error = %e, "could not establish session for provider identity");
        }
    }

    /// Validates an identity that was not signed in interactively.
    ///
    /// On an invalid verdict the logout path runs. A transient verdict
    /// leaves everything as it is.
    async fn adoptable(&self, identity: &ProviderIdentity) -> Result<SystemTime, AuthError> {
        let verdict = self.inner.validator.validate().await;
        if let (true, Some(expiry)) = (verdict.is_valid, verdict.expires_at) {
            return Ok(expiry);
        }

        let error = verdict.error.clone().unwrap_or(AuthError::TokenExpired);
        if verdict.is_transient() {
            warn!(uid = %identity.uid, error = %error, "cannot validate identity right now");
        } else {
            warn!(uid = %identity.uid, error = %error, "identity failed validation, tearing down");
            self.logout().await;
        }
        Err(error)
    }

    // -- session start ---------------------------------------------------

    /// Exchange, reconcile, install, schedule.
    async fn establish(
        &self,
        identity: ProviderIdentity,
        supplied_name: Option<&str>,
        seed: AvatarSeed,
        expected: Generation,
    ) -> Result<Session, AuthError> {
        let token = match self.bounded(self.inner.provider.get_token_result(true)).await {
            Ok(token) => token,
            Err(e) => {
                self.sign_out_best_effort().await;
                return Err(e.into());
            }
        };
        if let Err(e) = in_date(&token) {
            self.sign_out_best_effort().await;
            return Err(e);
        }

        let response = match self.exchange(&token.token).await {
            Ok(response) => response,
            Err(e) => {
                // Keep the provider in step with the local state: no backend
                // acknowledgement, no signed-in identity.
                self.sign_out_best_effort().await;
                return Err(e);
            }
        };

        let draft = self.reconcile(&identity, &response, &token, supplied_name, seed);
        let Some(session) = self.inner.store.begin(expected, draft) else {
            warn!(uid = %identity.uid, "sign-in finished after a logout, discarding");
            self.sign_out_best_effort().await;
            return Err(AuthError::Superseded);
        };

        self.start_refresh(session.generation);
        Ok(session)
    }

    fn reconcile(
        &self,
        identity: &ProviderIdentity,
        response: &ExchangeResponse,
        token: &TokenResult,
        supplied_name: Option<&str>,
        seed: AvatarSeed,
    ) -> SessionDraft {
        Reconcile {
            identity,
            backend: response,
            provider_token: token,
            supplied_name,
            seed,
            avatar_base: &self.inner.config.avatar_base,
        }
        .into_draft()
    }

    async fn exchange(&self, provider_token: &str) -> Result<ExchangeResponse, AuthError> {
        let outcome = tokio::time::timeout(
            self.inner.config.call_timeout,
            self.inner.backend.exchange(provider_token),
        )
        .await;

        match outcome {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(ExchangeError::Rejected { status, detail })) => {
                warn!(status, %detail, "backend rejected the exchange");
                Err(AuthError::BackendRejected(detail))
            }
            Ok(Err(e)) => {
                warn!(error = %e, "exchange failed");
                Err(AuthError::BackendUnavailable)
            }
            Err(_) => {
                warn!("exchange timed out");
                Err(AuthError::BackendUnavailable)
            }
        }
    }

    // -- background revalidation -----------------------------------------

    fn start_refresh(&self, generation: Generation) {
        let weak = Arc::downgrade(&self.inner);
        self.inner.scheduler.start(generation, move |tick| {
            let weak = Weak::clone(&weak);
            async move {
                match weak.upgrade() {
                    Some(inner) => SessionController { inner }.on_refresh_tick(tick).await,
                    None => TickFlow::Stop,
                }
            }
        });

        // A logout on another thread may have ended the session between
        // `begin` and the line above.
        if !self.reader().is_current(generation) {
            debug!(generation = %generation, "session ended while its timer started");
            self.inner.scheduler.cancel_generation(generation);
        }
    }

    async fn on_refresh_tick(&self, tick: RefreshTick) -> TickFlow {
        let reader = self.reader();
        if !reader.is_current(tick.generation) {
            return TickFlow::Stop;
        }

        let verdict = self.inner.validator.validate().await;
        if verdict.generation != tick.generation || !reader.is_current(tick.generation) {
            debug!(generation = %tick.generation, "discarding stale validation");
            return TickFlow::Stop;
        }

        if verdict.is_valid {
            debug!(generation = %tick.generation, tick = tick.tick, "session still valid");
            return TickFlow::Continue;
        }
        if verdict.is_transient() {
            warn!(generation = %tick.generation, "revalidation failed transiently, retrying next tick");
            return TickFlow::Continue;
        }

        let terminal = verdict.is_expired
            || verdict.error.as_ref().is_some_and(AuthError::is_terminal);
        if !terminal {
            warn!(
                generation = %tick.generation,
                error = ?verdict.error,
                "revalidation inconclusive, retrying next tick"
            );
            return TickFlow::Continue;
        }

        warn!(generation = %tick.generation, error = ?verdict.error, "session no longer valid");
        // Runs outside this task: force_logout cancels the refresh task,
        // which would otherwise abort the logout halfway.
        let controller = self.clone();
        let generation = tick.generation;
        tokio::spawn(async move {
            controller.force_logout(generation).await;
        });
        TickFlow::Stop
    }

    // -- helpers ---------------------------------------------------------

    /// Bounds a provider call by `call_timeout`; a timeout reads as a
    /// network failure.
    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, ProviderError>>,
    ) -> Result<T, ProviderError> {
        tokio::time::timeout(self.inner.config.call_timeout, call)
            .await
            .unwrap_or_else(|_| Err(ProviderError::Network("provider call timed out".into())))
    }

    async fn sign_out_best_effort(&self) {
        if let Err(e) = self.bounded(self.inner.provider.sign_out()).await {
            warn!(error = %e, "provider sign-out failed, local session already cleared");
        }
    }
}

/// Rejects a provider token whose expiry has already passed.
fn in_date(token: &TokenResult) -> Result<(), AuthError> {
    if token.expiration_time <= SystemTime::now() {
        warn!("provider issued a token that is already expired");
        return Err(AuthError::TokenExpired);
    }
    Ok(())
}

async fn listen<P: IdentityProvider, B: ExchangeBackend>(
    weak: Weak<ControllerState<P, B>>,
    mut events: broadcast::Receiver<AuthStateEvent>,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "auth-state listener lagged behind");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let Some(inner) = weak.upgrade() else { break };
        SessionController { inner }.on_auth_event(event).await;
    }
    debug!("auth-state listener stopped");
}

// ---------------------------------------------------------------------------
// AuthStateSubscription
// ---------------------------------------------------------------------------

/// Keeps the auth-state listener alive. Dropping it unsubscribes.
#[derive(Debug)]
pub struct AuthStateSubscription {
    task: JoinHandle<()>,
}

impl AuthStateSubscription {
    /// Stops the listener.
    pub fn unsubscribe(self) {
        drop(self);
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for AuthStateSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}
