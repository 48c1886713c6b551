//! Error types for session store operations.
//!
//! Configuration problems are reported synchronously by the constructor; every
//! other failure reaches the caller of the operation that hit it.

use std::sync::Arc;

use thiserror::Error;

/// Errors that can occur during session store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Invalid or unknown store options.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Cannot build, reach, or terminate the connection pool.
    #[error("connection error: {0}")]
    Connection(String),

    /// Executing a statement failed.
    #[error("query error: {0}")]
    Query(#[from] sqlx::Error),

    /// Statement template and parameter list do not line up.
    #[error("malformed statement: {0}")]
    Statement(String),

    /// Stored payload could not be decoded (or a payload could not be encoded).
    #[error("payload decode error: {0}")]
    PayloadDecode(#[from] serde_json::Error),

    /// The payload carried a cookie expiration that is neither a date nor a timestamp.
    #[error("invalid expiration: {0}")]
    InvalidExpiration(String),

    /// Store bring-up failed; shared by every ready waiter.
    #[error("store initialization failed: {0}")]
    Startup(Arc<StoreError>),

    /// The store has been closed.
    #[error("store is closed")]
    Closed,
}

/// Result type alias for session store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    /// Returns true if retrying the operation later might succeed.
    ///
    /// The store itself never retries.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Connection(_) => true,
            StoreError::Query(err) => {
                matches!(err, sqlx::Error::PoolTimedOut | sqlx::Error::Io(_))
            }
            StoreError::Startup(inner) => inner.is_retryable(),
            _ => false,
        }
    }
}
