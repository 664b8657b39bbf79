//! Error taxonomy for authorization flows
//!
//! Every failure reaches the flow caller in its own kind. Nothing is retried
//! and nothing is downgraded to a generic failure.

/// Errors from PKCE, redirect parsing, anonymous keys and the network client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The end user dismissed the interaction before the redirect was reached.
    #[error("authorization cancelled by the user")]
    Cancel,

    /// The authorization server redirected back with `error`.
    #[error("provider error: {code}{}", description.as_deref().map(|d| format!(": {d}")).unwrap_or_default())]
    Provider {
        code: String,
        description: Option<String>,
    },

    /// The redirect carried neither a code nor an error, or did not match
    /// the expected redirect URI.
    #[error("malformed redirect: {0}")]
    MalformedRedirect(String),

    /// The anonymous signing key is missing from the keystore. This signals
    /// storage loss, not that the user was never anonymous.
    #[error("anonymous key not found: {0}")]
    KeyNotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] authkit_storage::Error),

    /// Network, HTTP status or response decoding failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Promotion attempted without an anonymous key on record.
    #[error("no anonymous user on record")]
    NotAuthenticated,

    #[error("crypto error: {0}")]
    Crypto(String),

    /// The UI surface lacks the requested capability.
    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("container is not configured")]
    NotConfigured,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Whether this is a user cancellation rather than a failure.
    pub fn is_cancel(&self) -> bool {
        matches!(self, Error::Cancel)
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Cancel => "cancel",
            Error::Provider { .. } => "provider",
            Error::MalformedRedirect(_) => "malformed_redirect",
            Error::KeyNotFound(_) => "key_not_found",
            Error::Storage(_) => "storage",
            Error::Transport(_) => "transport",
            Error::NotAuthenticated => "not_authenticated",
            Error::Crypto(_) => "crypto",
            Error::Unsupported(_) => "unsupported",
            Error::NotConfigured => "not_configured",
            Error::InvalidConfig(_) => "invalid_config",
        }
    }
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
