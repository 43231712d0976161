//! Error taxonomy shared across the engine.
//!
//! Storage backends, the encoder, retrieval, and the sync engine all report
//! through [`Error`]. The variants mirror how callers are expected to react:
//! [`Error::Transient`] may be retried locally, [`Error::Inconsistent`]
//! triggers an orphan sweep, [`Error::Fatal`] propagates to the supervisor.

use std::time::Duration;

/// Errors produced by the memory engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Caller-supplied input failed validation (empty text, bad hierarchy).
    #[error("validation: {0}")]
    Validation(String),

    /// A referenced memory, connection, or path does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A storage backend refused the operation and retries were exhausted.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// The vector and metadata stores disagree about a memory.
    #[error("stores inconsistent: {0}")]
    Inconsistent(String),

    /// The operation exceeded its deadline. No partial mutation was applied.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// A retryable condition such as lock contention.
    #[error("transient: {0}")]
    Transient(String),

    /// Unrecoverable startup failure (model load, schema bootstrap).
    #[error("fatal: {0}")]
    Fatal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether a local retry with backoff may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_))
    }
}

impl From<rusqlite::Error> for Error {
    /// Classify SQLite failures: lock contention is retryable, a missing row
    /// is `NotFound`, everything else counts as the store being unavailable.
    fn from(e: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;
        match &e {
            rusqlite::Error::SqliteFailure(f, _)
                if matches!(
                    f.code,
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
                ) =>
            {
                Error::Transient(e.to_string())
            }
            rusqlite::Error::SqliteFailure(f, _)
                if f.code == ErrorCode::ConstraintViolation =>
            {
                Error::Validation(e.to_string())
            }
            rusqlite::Error::QueryReturnedNoRows => {
                Error::NotFound("query returned no rows".into())
            }
            _ => Error::StoreUnavailable(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Validation(format!("malformed JSON payload: {e}"))
    }
}
