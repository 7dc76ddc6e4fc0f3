//! Scripted doubles for the exchange backend and the API transport.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use keyward::prelude::*;
use keyward_protocol::ExchangeResponse;
use keyward_provider::MemoryProvider;
use keyward_session::MemoryMirror;
use keyward_transport::{ExchangeError, TransportError};

pub const ADA: &str = "a@x.com";
pub const SECRET: &str = "secret";

// =========================================================================
// Backend
// =========================================================================

/// One scripted exchange reply.
#[derive(Debug, Clone)]
pub enum Reply {
    Ok(ExchangeResponse),
    Reject(u16, &'static str),
    Down,
}

impl Reply {
    /// A full backend identity for `a@x.com` with bearer `token`.
    pub fn ada(token: &str) -> Self {
        Self::Ok(ExchangeResponse {
            id: Some("u1".into()),
            name: Some("Ada".into()),
            email: Some(ADA.into()),
            avatar: None,
            access_token: Some(token.into()),
        })
    }
}

#[derive(Default)]
struct BackendState {
    replies: Mutex<VecDeque<Reply>>,
    fallback: Mutex<Option<Reply>>,
    delay: Mutex<Duration>,
    calls: AtomicUsize,
}

/// Replays scripted replies in order, then repeats the fallback.
#[derive(Clone, Default)]
pub struct FakeBackend {
    state: Arc<BackendState>,
}

impl FakeBackend {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Self {
        let backend = Self::default();
        backend.state.replies.lock().unwrap().extend(replies);
        backend
    }

    pub fn with_fallback(self, reply: Reply) -> Self {
        *self.state.fallback.lock().unwrap() = Some(reply);
        self
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        *self.state.delay.lock().unwrap() = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    fn next_reply(&self) -> Reply {
        let scripted = self.state.replies.lock().unwrap().pop_front();
        scripted
            .or_else(|| self.state.fallback.lock().unwrap().clone())
            .unwrap_or(Reply::Down)
    }
}

impl ExchangeBackend for FakeBackend {
    async fn exchange(&self, _provider_token: &str) -> Result<ExchangeResponse, ExchangeError> {
        self.state.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.state.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match self.next_reply() {
            Reply::Ok(response) => Ok(response),
            Reply::Reject(status, detail) => Err(ExchangeError::Rejected {
                status,
                detail: detail.to_string(),
            }),
            Reply::Down => Err(TransportError::Unreachable("connection refused".into()).into()),
        }
    }
}

// =========================================================================
// Transport
// =========================================================================

#[derive(Default)]
struct TransportState {
    replies: Mutex<VecDeque<Result<ApiResponse, ()>>>,
    sent: Mutex<Vec<(String, String)>>,
}

/// Records every call and answers from a script (200 once it runs out).
#[derive(Clone, Default)]
pub struct FakeTransport {
    state: Arc<TransportState>,
}

impl FakeTransport {
    pub fn new(replies: impl IntoIterator<Item = ApiResponse>) -> Self {
        let transport = Self::default();
        transport
            .state
            .replies
            .lock()
            .unwrap()
            .extend(replies.into_iter().map(Ok));
        transport
    }

    /// Makes the next call fail to reach the server.
    pub fn fail_next(&self) {
        self.state.replies.lock().unwrap().push_front(Err(()));
    }

    /// `(path, bearer)` of every call, in order.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.state.sent.lock().unwrap().clone()
    }

    pub fn bearers(&self) -> Vec<String> {
        self.sent().into_iter().map(|(_, bearer)| bearer).collect()
    }
}

impl ApiTransport for FakeTransport {
    async fn send(&self, request: &ApiRequest, bearer: &str) -> Result<ApiResponse, TransportError> {
        self.state
            .sent
            .lock()
            .unwrap()
            .push((request.path.clone(), bearer.to_string()));
        match self.state.replies.lock().unwrap().pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(())) => Err(TransportError::Unreachable("connection reset".into())),
            None => Ok(ApiResponse::new(200, "ok")),
        }
    }
}

// =========================================================================
// Wiring
// =========================================================================

pub type Controller = SessionController<MemoryProvider, FakeBackend>;

pub struct Harness {
    pub provider: Arc<MemoryProvider>,
    pub backend: FakeBackend,
    pub mirror: Arc<MemoryMirror>,
    pub controller: Controller,
}

/// Provider with one account (`a@x.com` / `secret`) issuing tokens that
/// live for `ttl`.
pub fn harness(ttl: Duration, backend: FakeBackend) -> Harness {
    harness_with_mirror(ttl, backend, Arc::new(MemoryMirror::new()))
}

pub fn harness_with_mirror(ttl: Duration, backend: FakeBackend, mirror: Arc<MemoryMirror>) -> Harness {
    let provider = Arc::new(MemoryProvider::new(ttl).with_account(ADA, SECRET, Some("Provider Ada")));
    let controller = SessionController::builder(Arc::clone(&provider), backend.clone())
        .mirror(mirror.clone())
        .build();
    Harness {
        provider,
        backend,
        mirror,
        controller,
    }
}

pub const HOUR: Duration = Duration::from_secs(3600);
pub const TEN_MINUTES: Duration = Duration::from_secs(600);

pub fn status(code: u16, body: &str) -> ApiResponse {
    ApiResponse::new(code, body.as_bytes().to_vec())
}

/// Waits (in Tokio time) until `check` holds, giving spawned tasks room to
/// run.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(check(), "condition not reached");
}
