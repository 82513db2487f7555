//! Error types shared by the local store, sync engine and order service.

use thiserror::Error;

/// Core error type.
#[derive(Debug, Error)]
pub enum PosError {
    /// Store id unset or unresolvable. Fatal to every sync operation.
    #[error("Store not configured: {0}")]
    Config(String),

    /// Network, HTTP or auth failure talking to the remote directory.
    #[error("Remote error: {0}")]
    Remote(String),

    /// A remote call did not complete within the request timeout.
    #[error("Remote call timed out after {}ms", .0.as_millis())]
    Timeout(std::time::Duration),

    /// Local SQLite failure (constraint violation, disk error, ...).
    #[error("Local store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// The connection mutex was poisoned by a panicking holder.
    #[error("Local store lock poisoned")]
    LockPoisoned,

    /// Input rejected before any write.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Another invocation of the same sync operation is still in flight.
    #[error("{0} already in progress")]
    Busy(&'static str),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<tokio::task::JoinError> for PosError {
    fn from(err: tokio::task::JoinError) -> Self {
        PosError::Internal(format!("background task failed: {err}"))
    }
}

impl From<reqwest::Error> for PosError {
    fn from(err: reqwest::Error) -> Self {
        PosError::Remote(err.to_string())
    }
}

/// Result type for core operations
pub type PosResult<T> = Result<T, PosError>;
