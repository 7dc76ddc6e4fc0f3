//! Per-request authorization.
//!
//! Every outbound API call goes through [`RequestAuthorizer::send`], which
//! attaches the session's bearer credential and owns the authentication
//! outcome of the call:
//!
//! | Situation | Outcome |
//! |---|---|
//! | no session | `UnauthenticatedRequest`, nothing sent |
//! | token within the refresh threshold | refreshed before sending |
//! | error body says the token expired | session ended, `TokenExpired` |
//! | first 401 | forced validation; resend once if valid, end session if not |
//! | 401 after the resend | `UnauthenticatedRequest`, no third send |
//! | 403 | `Forbidden`, session untouched |
//! | anything else | the response, as is |

use std::time::SystemTime;

use keyward_protocol::Generation;
use keyward_provider::IdentityProvider;
use keyward_session::{AuthError, Session};
use keyward_transport::{
    ApiRequest, ApiResponse, ApiTransport, AuthorizedRequest, ExchangeBackend,
};
use tracing::{debug, warn};

use crate::SessionController;

const UNAUTHORIZED: u16 = 401;
const FORBIDDEN: u16 = 403;

/// Wraps an [`ApiTransport`] with session-aware authorization.
pub struct RequestAuthorizer<P, B, T> {
    controller: SessionController<P, B>,
    transport: T,
}

impl<P, B, T> RequestAuthorizer<P, B, T>
where
    P: IdentityProvider,
    B: ExchangeBackend,
    T: ApiTransport,
{
    pub fn new(controller: SessionController<P, B>, transport: T) -> Self {
        Self {
            controller,
            transport,
        }
    }

    pub fn controller(&self) -> &SessionController<P, B> {
        &self.controller
    }

    /// Sends `request` on behalf of the live session.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, AuthError> {
        self.execute(AuthorizedRequest::new(request)).await
    }

    /// Like [`send`](Self::send), for a request that may already have been
    /// retried once.
    pub async fn execute(&self, mut request: AuthorizedRequest) -> Result<ApiResponse, AuthError> {
        let mut session = self.ready_session().await?;

        loop {
            let response = self
                .transport
                .send(&request.request, &session.access_token)
                .await
                .map_err(|e| {
                    warn!(path = %request.request.path, error = %e, "api call did not complete");
                    AuthError::NetworkUnavailable
                })?;

            if response.is_success() {
                return Ok(response);
            }

            // The server already decided the token is unusable: no retry.
            if response.status != FORBIDDEN
                && response.error_body().is_some_and(|b| b.asserts_expiry())
            {
                warn!(
                    generation = %session.generation,
                    status = response.status,
                    "server reports the token expired"
                );
                self.controller.force_logout(session.generation).await;
                return Err(AuthError::TokenExpired);
            }

            match response.status {
                UNAUTHORIZED => {
                    session = self.recover_from_401(&mut request, &session).await?;
                    debug!(
                        path = %request.request.path,
                        generation = %session.generation,
                        "resending after token refresh"
                    );
                }
                FORBIDDEN => return Err(AuthError::Forbidden),
                _ => return Ok(response),
            }
        }
    }

    /// The live session, refreshed first when its token is about to run
    /// out.
    async fn ready_session(&self) -> Result<Session, AuthError> {
        let session = self
            .controller
            .current()
            .ok_or(AuthError::UnauthenticatedRequest)?;

        let now = SystemTime::now();
        let threshold = self.controller.config().refresh_threshold;
        if !session.needs_refresh(threshold, now) {
            return Ok(session);
        }

        debug!(
            generation = %session.generation,
            remaining_secs = session.remaining_lifetime(now).as_secs(),
            "refreshing token before sending"
        );
        match self
            .controller
            .refresh_session(session.generation, &session.access_token)
            .await
        {
            Ok(renewed) if renewed.is_expired_at(SystemTime::now()) => {
                Err(self.fail_closed(renewed.generation, AuthError::TokenExpired).await)
            }
            Ok(renewed) => Ok(renewed),
            Err(e) if is_transient(&e) => {
                if session.is_expired_at(SystemTime::now()) {
                    warn!(error = %e, "token expired and could not be refreshed");
                    Err(AuthError::NetworkUnavailable)
                } else {
                    warn!(error = %e, "proactive refresh failed, using current token");
                    Ok(session)
                }
            }
            Err(e) => Err(self.fail_closed(session.generation, e).await),
        }
    }

    /// Handles a 401. Returns the session to resend with, or the error to
    /// propagate.
    async fn recover_from_401(
        &self,
        request: &mut AuthorizedRequest,
        session: &Session,
    ) -> Result<Session, AuthError> {
        if request.retried() {
            warn!(
                path = %request.request.path,
                generation = %session.generation,
                "still unauthorized after retry"
            );
            return Err(AuthError::UnauthenticatedRequest);
        }

        let verdict = self.controller.validator().validate().await;
        if verdict.generation != session.generation {
            debug!(generation = %session.generation, "session changed during validation");
            return Err(AuthError::UnauthenticatedRequest);
        }
        if verdict.is_transient() {
            warn!(generation = %session.generation, "could not validate after 401");
            return Err(AuthError::UnauthenticatedRequest);
        }
        if !verdict.is_valid {
            let cause = verdict.error.unwrap_or(AuthError::TokenExpired);
            return Err(self.fail_closed(session.generation, cause).await);
        }

        request.mark_retried();
        match self
            .controller
            .refresh_session(session.generation, &session.access_token)
            .await
        {
            Ok(renewed) if renewed.is_expired_at(SystemTime::now()) => {
                Err(self.fail_closed(renewed.generation, AuthError::TokenExpired).await)
            }
            Ok(renewed) => Ok(renewed),
            Err(e) if is_transient(&e) => {
                warn!(error = %e, "token refresh after 401 failed");
                Err(AuthError::UnauthenticatedRequest)
            }
            Err(e) => Err(self.fail_closed(session.generation, e).await),
        }
    }

    /// Ends the session after an unrecoverable failure.
    async fn fail_closed(&self, generation: Generation, cause: AuthError) -> AuthError {
        warn!(generation = %generation, error = %cause, "no usable token, ending session");
        self.controller.force_logout(generation).await;
        AuthError::UnauthenticatedRequest
    }
}

/// Failures that only say the other side could not be asked.
fn is_transient(error: &AuthError) -> bool {
    error.is_transient() || matches!(error, AuthError::BackendUnavailable)
}
