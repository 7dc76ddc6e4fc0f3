//! Error types for the session layer.

use keyward_protocol::ProtocolError;
use keyward_provider::ProviderError;

/// What exactly was wrong with the credentials or sign-up data.
///
/// Kept separate from [`AuthError`] so callers can match on the broad
/// category while still showing a precise message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialProblem {
    UnknownAccount,
    WrongSecret,
    MalformedIdentifier,
    TooManyAttempts,
    MethodDisabled,
    IdentifierInUse,
    WeakSecret,
}

impl CredentialProblem {
    /// The user-actionable message for this problem.
    pub fn message(self) -> &'static str {
        match self {
            Self::UnknownAccount => "No account found with this email address.",
            Self::WrongSecret => "Incorrect password. Please try again.",
            Self::MalformedIdentifier => "Invalid email address format.",
            Self::TooManyAttempts => {
                "Too many failed attempts. Please try again later."
            }
            Self::MethodDisabled => {
                "This sign-in method is disabled. Please contact support."
            }
            Self::IdentifierInUse => {
                "An account with this email already exists."
            }
            Self::WeakSecret => {
                "Password is too weak. Please choose a stronger password."
            }
        }
    }
}

/// Every authentication outcome the rest of the system acts on.
///
/// The `Display` strings are meant to be shown to an end user as-is.
///
/// Lifecycle consequences per variant:
/// - `TokenExpired`, `TokenRevoked` → the session is torn down.
/// - `NetworkUnavailable` → logged and retried later; never ends a session.
/// - `BackendRejected`, `BackendUnavailable` → no session is established.
/// - `Forbidden` → returned to the caller with no side effect at all.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("{}", .0.message())]
    InvalidCredentials(CredentialProblem),

    #[error("This account has been disabled.")]
    AccountDisabled,

    #[error("Your session has expired. Please sign in again.")]
    TokenExpired,

    #[error("Your session was revoked. Please sign in again.")]
    TokenRevoked,

    #[error("Network unavailable. Please check your connection.")]
    NetworkUnavailable,

    /// The backend refused the exchange; the payload is its own message.
    #[error("{0}")]
    BackendRejected(String),

    #[error("Authentication server unavailable. Please try again later.")]
    BackendUnavailable,

    #[error("You are not signed in.")]
    UnauthenticatedRequest,

    #[error("You do not have permission to do that.")]
    Forbidden,

    #[error("Sign-in failed: {0}")]
    UnknownProviderError(String),

    /// An interactive flow finished after a logout invalidated the
    /// generation it started under; its result was discarded.
    #[error("Sign-in was cancelled by a concurrent sign-out.")]
    Superseded,
}

impl AuthError {
    /// `true` for failures that prove the current identity is unusable.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::TokenExpired
                | Self::TokenRevoked
                | Self::AccountDisabled
                | Self::UnauthenticatedRequest
        )
    }

    /// `true` for failures that say nothing about the token's validity.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NetworkUnavailable)
    }
}

impl From<ProviderError> for AuthError {
    fn from(err: ProviderError) -> Self {
        use CredentialProblem as P;
        match err {
            ProviderError::UserNotFound => Self::InvalidCredentials(P::UnknownAccount),
            ProviderError::WrongSecret => Self::InvalidCredentials(P::WrongSecret),
            ProviderError::InvalidIdentifier => {
                Self::InvalidCredentials(P::MalformedIdentifier)
            }
            ProviderError::TooManyAttempts => {
                Self::InvalidCredentials(P::TooManyAttempts)
            }
            ProviderError::MethodDisabled => {
                Self::InvalidCredentials(P::MethodDisabled)
            }
            ProviderError::IdentifierInUse => {
                Self::InvalidCredentials(P::IdentifierInUse)
            }
            ProviderError::WeakSecret => Self::InvalidCredentials(P::WeakSecret),
            ProviderError::AccountDisabled => Self::AccountDisabled,
            ProviderError::TokenExpired => Self::TokenExpired,
            ProviderError::TokenRevoked => Self::TokenRevoked,
            ProviderError::NoCurrentUser => Self::UnauthenticatedRequest,
            ProviderError::Network(_) => Self::NetworkUnavailable,
            ProviderError::InteractiveUnavailable(msg)
            | ProviderError::Other(msg) => Self::UnknownProviderError(msg),
        }
    }
}

/// Errors from the durable session mirror.
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("mirror i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("mirror contents unreadable: {0}")]
    Protocol(#[from] ProtocolError),
}
