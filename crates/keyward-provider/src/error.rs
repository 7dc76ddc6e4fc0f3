/// Errors reported by an identity provider.
///
/// This is the provider's own vocabulary. The session layer maps it onto
/// the smaller set of outcomes it acts on (`AuthError`), so a different
/// provider only has to translate its error codes into these variants.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// No account exists for the identifier.
    #[error("no account found for this identifier")]
    UserNotFound,

    /// The account exists but the secret is wrong.
    #[error("incorrect secret")]
    WrongSecret,

    /// The identifier is not well-formed (e.g. not an email address).
    #[error("invalid identifier format")]
    InvalidIdentifier,

    /// The account has been disabled by an administrator.
    #[error("account disabled")]
    AccountDisabled,

    /// The provider is throttling sign-in attempts.
    #[error("too many attempts")]
    TooManyAttempts,

    /// This sign-in method is turned off for the project.
    #[error("sign-in method disabled")]
    MethodDisabled,

    /// Sign-up with an identifier that already has an account.
    #[error("identifier already in use")]
    IdentifierInUse,

    /// Sign-up with a secret the provider considers too weak.
    #[error("secret too weak")]
    WeakSecret,

    /// The identity token can no longer be refreshed.
    #[error("identity token expired")]
    TokenExpired,

    /// The identity's tokens were revoked server-side.
    #[error("identity token revoked")]
    TokenRevoked,

    /// No identity is currently signed in.
    #[error("no signed-in identity")]
    NoCurrentUser,

    /// The provider could not be reached.
    #[error("network error: {0}")]
    Network(String),

    /// An interactive (popup-style) flow cannot complete in this
    /// environment; a redirect flow should be used instead.
    #[error("interactive sign-in unavailable: {0}")]
    InteractiveUnavailable(String),

    /// Anything the provider reports that has no better mapping.
    #[error("{0}")]
    Other(String),
}
