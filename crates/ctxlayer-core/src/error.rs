//! Error types for the context intelligence layer core.

use thiserror::Error;

/// Main error type for the core.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad timestamp, timezone, UUID, or other malformed input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Missing context/user/version/tenant.
    #[error("not found: {0}")]
    NotFound(String),

    /// No credentials presented.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// Credentials presented but insufficient.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A version race could not be resolved.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Slow-path deadline exceeded. Callers recover locally; this variant
    /// exists so the bus can report it without treating it as a hard error.
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Cache or bus unavailable; retryable.
    #[error("transient error: {0}")]
    Transient(String),

    /// Database errors.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Anything else.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Stable machine-readable kind string, used by the server to map to
    /// HTTP status codes without re-matching on the error message.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidInput(_) => "invalid_input",
            Error::NotFound(_) => "not_found",
            Error::Unauthenticated(_) => "unauthenticated",
            Error::Unauthorized(_) => "unauthorized",
            Error::Conflict(_) => "conflict",
            Error::DeadlineExceeded(_) => "deadline_exceeded",
            Error::Transient(_) => "transient",
            Error::Database(_) => "internal",
            Error::Serialization(_) => "internal",
            Error::Internal(_) => "internal",
        }
    }
}
