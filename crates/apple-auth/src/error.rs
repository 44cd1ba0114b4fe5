//! Error types for Sign in with Apple operations

/// Errors from Sign in with Apple operations.
///
/// Messages carry enough context to act on but never key material, client
/// secrets, or raw tokens.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("client secret signing failed: {0}")]
    ClientSecret(String),

    #[error("{0}")]
    InvalidToken(String),

    #[error("jwt algorithm cannot be verified: {0}")]
    UnexpectedAlgorithm(String),

    #[error("jwt header does not have a key id")]
    MissingKeyId,

    #[error("signing key not found: {0}")]
    KeyNotFound(String),

    #[error("key store unavailable: {0}")]
    KeyStore(String),

    #[error("jwt verification failed: {0}")]
    Verification(String),

    #[error("jwt expired")]
    TokenExpired,

    #[error("maxAge exceeded")]
    TokenTooOld,

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("authorization failed: {error}{}", .description.as_deref().map(|d| format!(" ({d})")).unwrap_or_default())]
    Authorization {
        error: String,
        description: Option<String>,
    },

    #[error("verify callback failed: {0}")]
    Verify(String),
}

impl Error {
    /// Whether this error means the presented identity token was rejected,
    /// as opposed to a fault in this system or its collaborators.
    ///
    /// Rejections surface as a failed login; everything else is a 5xx.
    pub fn is_assertion_rejection(&self) -> bool {
        matches!(
            self,
            Error::InvalidToken(_)
                | Error::UnexpectedAlgorithm(_)
                | Error::MissingKeyId
                | Error::KeyNotFound(_)
                | Error::Verification(_)
                | Error::TokenExpired
                | Error::TokenTooOld
        )
    }
}

/// Result alias for Sign in with Apple operations.
pub type Result<T> = std::result::Result<T, Error>;
