//! In-process identity provider.
//!
//! `MemoryProvider` keeps accounts and the signed-in identity in memory and
//! issues random opaque tokens with a configurable lifetime. Every failure
//! mode keyward reacts to can be switched on from the outside: network
//! outage, disabled account, revoked or unrefreshable tokens, blocked
//! interactive flows, slow responses. It also counts the calls that matter
//! (forced refreshes, sign-outs) so tests can assert on side effects.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use rand::Rng;
use tokio::sync::broadcast;

use crate::{
    AuthStateEvent, IdentityProvider, ProviderError, ProviderIdentity,
    TokenResult,
};

/// Capacity of the auth-state broadcast channel.
const EVENT_CHANNEL_SIZE: usize = 16;

/// Minimum secret length accepted by `sign_up`.
const MIN_SECRET_LEN: usize = 6;

/// How the interactive federated flow behaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FederatedMode {
    /// The federated flow is not configured at all.
    Unavailable,
    /// The interactive flow completes immediately as this account.
    Interactive(String),
    /// The interactive flow is blocked; the redirect flow will sign in as
    /// this account once [`MemoryProvider::complete_redirect`] is called.
    RedirectOnly(String),
}

#[derive(Debug, Clone)]
struct Account {
    uid: String,
    secret: String,
    display_name: Option<String>,
    email: String,
    photo_url: Option<String>,
    disabled: bool,
}

impl Account {
    fn identity(&self) -> ProviderIdentity {
        ProviderIdentity {
            uid: self.uid.clone(),
            display_name: self.display_name.clone(),
            email: Some(self.email.clone()),
            photo_url: self.photo_url.clone(),
        }
    }
}

#[derive(Debug)]
struct State {
    /// Accounts keyed by identifier (email).
    accounts: HashMap<String, Account>,
    /// Identifier of the signed-in account.
    current: Option<String>,
    token: Option<TokenResult>,
    token_ttl: Duration,
    latency: Duration,
    network_up: bool,
    revoked: bool,
    refresh_expired: bool,
    sign_out_fails: bool,
    federated: FederatedMode,
    redirect_pending: Option<String>,
    next_uid: u64,
    forced_refreshes: u64,
    sign_outs: u64,
}

/// An [`IdentityProvider`] that lives entirely in memory.
///
/// ```rust
/// use std::time::Duration;
/// use keyward_provider::{IdentityProvider, MemoryProvider};
///
/// let provider = MemoryProvider::new(Duration::from_secs(3600))
///     .with_account("ada@example.com", "secret1", Some("Ada"));
///
/// provider.restore_signed_in("ada@example.com");
/// let identity = provider.current_identity().unwrap();
/// assert_eq!(identity.display_name.as_deref(), Some("Ada"));
/// ```
pub struct MemoryProvider {
    state: Mutex<State>,
    events: broadcast::Sender<AuthStateEvent>,
}

impl MemoryProvider {
    /// Creates an empty provider whose tokens live for `token_ttl`.
    pub fn new(token_ttl: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            state: Mutex::new(State {
                accounts: HashMap::new(),
                current: None,
                token: None,
                token_ttl,
                latency: Duration::ZERO,
                network_up: true,
                revoked: false,
                refresh_expired: false,
                sign_out_fails: false,
                federated: FederatedMode::Unavailable,
                redirect_pending: None,
                next_uid: 1,
                forced_refreshes: 0,
                sign_outs: 0,
            }),
            events,
        }
    }

    /// Builder-style [`add_account`](Self::add_account).
    pub fn with_account(
        self,
        identifier: &str,
        secret: &str,
        display_name: Option<&str>,
    ) -> Self {
        self.add_account(identifier, secret, display_name);
        self
    }

    /// Registers an account and returns its uid.
    pub fn add_account(
        &self,
        identifier: &str,
        secret: &str,
        display_name: Option<&str>,
    ) -> String {
        let mut state = self.lock();
        let uid = format!("mem-{}", state.next_uid);
        state.next_uid += 1;
        state.accounts.insert(
            identifier.to_string(),
            Account {
                uid: uid.clone(),
                secret: secret.to_string(),
                display_name: display_name.map(str::to_string),
                email: identifier.to_string(),
                photo_url: None,
                disabled: false,
            },
        );
        uid
    }

    /// Signs `identifier` in without a secret, as if restored from a
    /// previous run. Emits no event.
    pub fn restore_signed_in(&self, identifier: &str) {
        let mut state = self.lock();
        if state.accounts.contains_key(identifier) {
            state.current = Some(identifier.to_string());
            state.token = None;
        }
    }

    pub fn set_token_ttl(&self, ttl: Duration) {
        self.lock().token_ttl = ttl;
    }

    /// Delay applied to every asynchronous call (uses Tokio time, so it
    /// honours `tokio::time::pause`).
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    pub fn set_network_available(&self, up: bool) {
        self.lock().network_up = up;
    }

    pub fn set_account_disabled(&self, identifier: &str, disabled: bool) {
        if let Some(account) = self.lock().accounts.get_mut(identifier) {
            account.disabled = disabled;
        }
    }

    /// Revokes every token of the signed-in identity.
    pub fn revoke_tokens(&self) {
        let mut state = self.lock();
        state.revoked = true;
        state.token = None;
    }

    /// Makes further token refreshes fail with `TokenExpired`.
    pub fn expire_refresh(&self) {
        let mut state = self.lock();
        state.refresh_expired = true;
        state.token = None;
    }

    pub fn fail_sign_out(&self, fails: bool) {
        self.lock().sign_out_fails = fails;
    }

    pub fn set_federated_mode(&self, mode: FederatedMode) {
        self.lock().federated = mode;
    }

    /// Finishes a pending redirect flow: signs the account in and emits
    /// [`AuthStateEvent::SignedIn`]. Returns `false` if nothing was pending.
    pub fn complete_redirect(&self) -> bool {
        let identity = {
            let mut state = self.lock();
            let Some(identifier) = state.redirect_pending.take() else {
                return false;
            };
            let Some(account) = state.accounts.get(&identifier).cloned()
            else {
                return false;
            };
            state.current = Some(identifier);
            state.token = None;
            account.identity()
        };
        let _ = self.events.send(AuthStateEvent::SignedIn(identity));
        true
    }

    /// Signs out from the provider's side (another tab, admin action) and
    /// emits [`AuthStateEvent::SignedOut`].
    pub fn external_sign_out(&self) {
        {
            let mut state = self.lock();
            state.current = None;
            state.token = None;
        }
        let _ = self.events.send(AuthStateEvent::SignedOut);
    }

    /// The most recently issued token, if any.
    pub fn current_token(&self) -> Option<String> {
        self.lock().token.as_ref().map(|t| t.token.clone())
    }

    /// How many times a token was fetched with `force_refresh = true`.
    pub fn forced_refresh_count(&self) -> u64 {
        self.lock().forced_refreshes
    }

    /// How many times `sign_out` was called (successful or not).
    pub fn sign_out_count(&self) -> u64 {
        self.lock().sign_outs
    }

    // -- internals --------------------------------------------------------

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock cannot leave `State` half-updated
        // in a way that matters for a test double.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn simulate_latency(&self) {
        let latency = self.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn check_network(state: &State) -> Result<(), ProviderError> {
        if state.network_up {
            Ok(())
        } else {
            Err(ProviderError::Network("provider unreachable".into()))
        }
    }

    /// Issues (or reuses) the token for the signed-in account.
    fn token_for_current(
        state: &mut State,
        force_refresh: bool,
    ) -> Result<TokenResult, ProviderError> {
        let identifier =
            state.current.clone().ok_or(ProviderError::NoCurrentUser)?;

        if !force_refresh {
            if let Some(token) = &state.token {
                if token.expiration_time > SystemTime::now() {
                    return Ok(token.clone());
                }
            }
        }

        // Anything past this point is a round trip to the provider.
        Self::check_network(state)?;
        if force_refresh {
            state.forced_refreshes += 1;
        }
        let account = state
            .accounts
            .get(&identifier)
            .ok_or(ProviderError::UserNotFound)?;
        if account.disabled {
            return Err(ProviderError::AccountDisabled);
        }
        if state.revoked {
            return Err(ProviderError::TokenRevoked);
        }
        if state.refresh_expired {
            return Err(ProviderError::TokenExpired);
        }

        let issued = TokenResult {
            token: generate_token(&account.uid),
            expiration_time: SystemTime::now() + state.token_ttl,
        };
        state.token = Some(issued.clone());
        Ok(issued)
    }

    fn sign_in_as(&self, identifier: &str) -> ProviderIdentity {
        let identity = {
            let mut state = self.lock();
            state.current = Some(identifier.to_string());
            state.token = None;
            state.revoked = false;
            state.refresh_expired = false;
            state
                .accounts
                .get(identifier)
                .map(Account::identity)
        };
        // `identifier` was validated by every caller.
        let identity = identity.unwrap_or_else(|| ProviderIdentity {
            uid: identifier.to_string(),
            display_name: None,
            email: Some(identifier.to_string()),
            photo_url: None,
        });
        let _ = self.events.send(AuthStateEvent::SignedIn(identity.clone()));
        tracing::debug!(uid = %identity.uid, "memory provider signed in");
        identity
    }
}

impl IdentityProvider for MemoryProvider {
    async fn sign_in(
        &self,
        identifier: &str,
        secret: &str,
    ) -> Result<ProviderIdentity, ProviderError> {
        self.simulate_latency().await;
        {
            let state = self.lock();
            Self::check_network(&state)?;
            if !identifier.contains('@') {
                return Err(ProviderError::InvalidIdentifier);
            }
            let account = state
                .accounts
                .get(identifier)
                .ok_or(ProviderError::UserNotFound)?;
            if account.disabled {
                return Err(ProviderError::AccountDisabled);
            }
            if account.secret != secret {
                return Err(ProviderError::WrongSecret);
            }
        }
        Ok(self.sign_in_as(identifier))
    }

    async fn sign_up(
        &self,
        display_name: &str,
        identifier: &str,
        secret: &str,
    ) -> Result<ProviderIdentity, ProviderError> {
        self.simulate_latency().await;
        {
            let state = self.lock();
            Self::check_network(&state)?;
            if !identifier.contains('@') {
                return Err(ProviderError::InvalidIdentifier);
            }
            if state.accounts.contains_key(identifier) {
                return Err(ProviderError::IdentifierInUse);
            }
            if secret.len() < MIN_SECRET_LEN {
                return Err(ProviderError::WeakSecret);
            }
        }
        let name = (!display_name.is_empty()).then_some(display_name);
        self.add_account(identifier, secret, name);
        Ok(self.sign_in_as(identifier))
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        self.simulate_latency().await;
        let was_signed_in = {
            let mut state = self.lock();
            state.sign_outs += 1;
            if state.sign_out_fails {
                return Err(ProviderError::Network(
                    "sign-out request failed".into(),
                ));
            }
            state.token = None;
            state.current.take().is_some()
        };
        if was_signed_in {
            let _ = self.events.send(AuthStateEvent::SignedOut);
        }
        Ok(())
    }

    fn current_identity(&self) -> Option<ProviderIdentity> {
        let state = self.lock();
        let identifier = state.current.as_ref()?;
        state.accounts.get(identifier).map(Account::identity)
    }

    async fn get_token(
        &self,
        force_refresh: bool,
    ) -> Result<String, ProviderError> {
        self.simulate_latency().await;
        let mut state = self.lock();
        Self::token_for_current(&mut state, force_refresh).map(|t| t.token)
    }

    async fn get_token_result(
        &self,
        force_refresh: bool,
    ) -> Result<TokenResult, ProviderError> {
        self.simulate_latency().await;
        let mut state = self.lock();
        Self::token_for_current(&mut state, force_refresh)
    }

    async fn federated_sign_in(
        &self,
    ) -> Result<ProviderIdentity, ProviderError> {
        self.simulate_latency().await;
        let mode = self.lock().federated.clone();
        match mode {
            FederatedMode::Interactive(identifier) => {
                if !self.lock().accounts.contains_key(&identifier) {
                    return Err(ProviderError::UserNotFound);
                }
                Ok(self.sign_in_as(&identifier))
            }
            FederatedMode::RedirectOnly(_) => {
                Err(ProviderError::InteractiveUnavailable(
                    "popup blocked".into(),
                ))
            }
            FederatedMode::Unavailable => Err(ProviderError::MethodDisabled),
        }
    }

    async fn federated_sign_in_redirect(&self) -> Result<(), ProviderError> {
        self.simulate_latency().await;
        let mut state = self.lock();
        match state.federated.clone() {
            FederatedMode::RedirectOnly(identifier)
            | FederatedMode::Interactive(identifier) => {
                state.redirect_pending = Some(identifier);
                Ok(())
            }
            FederatedMode::Unavailable => Err(ProviderError::MethodDisabled),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthStateEvent> {
        self.events.subscribe()
    }
}

/// Random opaque token, prefixed with the uid for readable test output.
fn generate_token(uid: &str) -> String {
    let bytes: [u8; 16] = rand::rng().random();
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!("{uid}.{hex}")
}
