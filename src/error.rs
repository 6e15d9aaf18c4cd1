//! Error types for Tollgate.

use thiserror::Error;

/// Main error type for Tollgate operations.
#[derive(Error, Debug)]
pub enum TollgateError {
    /// The rate limit key resolved to an empty value.
    ///
    /// This is a configuration problem with the rule or the call, not a rate
    /// decision, and is propagated to the caller unchanged.
    #[error("Invalid rate limit key: {0}")]
    InvalidKey(String),

    /// The backing store or bucket registry could not answer.
    #[error("Rate limit backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A rule failed validation
    #[error("Invalid rate limit rule '{name}': {reason}")]
    InvalidRule { name: String, reason: String },

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TollgateError {
    /// Whether this error signals a misconfigured key rather than a runtime failure.
    pub fn is_invalid_key(&self) -> bool {
        matches!(self, TollgateError::InvalidKey(_))
    }
}

impl From<redis::RedisError> for TollgateError {
    fn from(err: redis::RedisError) -> Self {
        TollgateError::BackendUnavailable(err.to_string())
    }
}

impl From<config::ConfigError> for TollgateError {
    fn from(err: config::ConfigError) -> Self {
        TollgateError::Config(err.to_string())
    }
}

/// Result type alias for Tollgate operations.
pub type Result<T> = std::result::Result<T, TollgateError>;
