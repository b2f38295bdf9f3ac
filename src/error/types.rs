//! Error types for the session gate.

use thiserror::Error;

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum GateError {
    /// Configuration-related errors.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The session secret could not be loaded.
    #[error("Session secret error: {message}")]
    Secret { message: String },

    /// Token issuance or validation errors.
    #[error("Token error: {kind}")]
    Token { kind: TokenErrorKind },
}

/// Token error kinds.
///
/// `Malformed`, `InvalidSignature` and `Expired` must all look the same to an
/// end user. They are kept apart here for logging and tests only.
#[derive(Error, Debug)]
pub enum TokenErrorKind {
    #[error("Failed to encode token: {message}")]
    Encoding { message: String },

    #[error("Malformed credential: {reason}")]
    Malformed { reason: &'static str },

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Token expired at {expired_at}")]
    Expired { expired_at: i64 },
}

impl GateError {
    /// Shorthand for a token error of the given kind.
    pub(crate) fn token(kind: TokenErrorKind) -> Self {
        GateError::Token { kind }
    }

    /// Returns the token error kind, if this is a token error.
    pub fn token_kind(&self) -> Option<&TokenErrorKind> {
        match self {
            GateError::Token { kind } => Some(kind),
            _ => None,
        }
    }
}

/// Result type alias for gate operations.
pub type GateResult<T> = Result<T, GateError>;
