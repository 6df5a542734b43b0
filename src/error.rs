//! Error handler for dirauth.

use thiserror::Error;

use crate::client::ProtocolError;

pub type Result<T> = std::result::Result<T, AuthError>;

/// Terminal outcome of a failed authentication call.
///
/// None of these are retried internally; the caller decides.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid directory configuration: {0}")]
    Config(String),

    #[error("missing directory authentication parameter")]
    MissingCredentials,

    #[error("bind failed with code {code}: {message}")]
    BindFailure { code: u32, message: String },

    #[error("search failed with code {code}: {message}")]
    SearchFailure { code: u32, message: String },

    #[error("cannot reach directory server: {0}")]
    Connection(String),

    #[error("directory operation timed out")]
    Timeout,

    #[error("directory operation cancelled")]
    Cancelled,

    #[error("cannot start blocking runtime")]
    Runtime(#[from] std::io::Error),
}

impl AuthError {
    /// Wrap a [`ProtocolError`] raised while binding.
    pub fn bind(err: ProtocolError) -> Self {
        Self::BindFailure {
            code: err.code,
            message: err.message,
        }
    }

    /// Wrap a [`ProtocolError`] raised while searching.
    pub fn search(err: ProtocolError) -> Self {
        Self::SearchFailure {
            code: err.code,
            message: err.message,
        }
    }

    /// Short machine-readable tag, used as a metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::Config(_) => "config",
            AuthError::MissingCredentials => "missing_credentials",
            AuthError::BindFailure { .. } => "bind_failure",
            AuthError::SearchFailure { .. } => "search_failure",
            AuthError::Connection(_) => "connection",
            AuthError::Timeout => "timeout",
            AuthError::Cancelled => "cancelled",
            AuthError::Runtime(_) => "runtime",
        }
    }

    /// HTTP-like status for hosts exposing the check over a web API.
    pub fn status(&self) -> u16 {
        match self {
            AuthError::MissingCredentials => 403,
            AuthError::BindFailure { .. } => 401,
            AuthError::SearchFailure { .. } | AuthError::Connection(_) => 502,
            AuthError::Timeout => 504,
            AuthError::Cancelled => 499,
            AuthError::Config(_) | AuthError::Runtime(_) => 500,
        }
    }
}
