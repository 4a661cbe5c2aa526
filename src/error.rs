// Error taxonomy for the coordination engine (spec.md §7).
//
// One variant per error *kind*, not per call site, mirroring the
// teacher's `DbError`. `Result<T>` is the crate-wide alias used by every
// module instead of `std::result::Result`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Network/5xx from an upstream instance; callers may retry locally.
    #[error("transient upstream error: {0}")]
    Transient(String),

    /// 409 or a state mismatch the caller must resolve, not retry blindly.
    #[error("conflict: {0}")]
    Conflict(String),

    /// 404 with operation-specific semantics (success for collection
    /// DELETE, contextual for document DELETE).
    #[error("not found: {0}")]
    NotFound(String),

    /// No mapping row exists yet for a collection/instance pair.
    #[error("mapping missing for collection {0:?}")]
    MappingMissing(String),

    /// A health probe failed (cached or real-time).
    #[error("health probe failed for {instance}: {reason}")]
    HealthFailure { instance: String, reason: String },

    /// The metadata-store connection pool could not hand out a connection.
    #[error("metadata store pool exhausted")]
    PoolExhausted,

    /// The concurrency governor's bounded queue is full.
    #[error("request queue full")]
    QueueFull,

    /// A metadata-store operation failed after exhausting retries.
    #[error("metadata store failure: {0}")]
    StoreFailure(String),

    /// Malformed or unexpected response from an upstream instance.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("both instances unavailable")]
    Unavailable,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        EngineError::StoreFailure(e.to_string())
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            EngineError::Transient(e.to_string())
        } else {
            EngineError::Protocol(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
