//! Store error types

use std::fmt;
use thiserror::Error;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised by key normalization, the value codec, the typed store
/// and the backends beneath it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Empty key or value: {0}")]
    EmptyKeyOrValue(String),

    #[error("Invalid TTL: {0} (must be >= 0)")]
    InvalidTtl(i64),

    #[error("Unsupported value type: {0}")]
    UnsupportedType(String),

    /// A stored list element failed to decode; the data in the backend is
    /// corrupt, not the caller's input
    #[error("Malformed list element: {0}")]
    MalformedElement(String),

    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Command rejected by the engine (wrong type, index out of range, ...)
    #[error("Backend error: {0}")]
    Backend(String),

    /// The value was written but the expiry step failed; the key persists
    /// without a TTL.
    #[error("Partial write on {key}: value stored, expiry failed: {reason}")]
    PartialWrite { key: String, reason: String },

    #[error("Watched key changed concurrently: {0}")]
    Conflict(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Stable classification of a [`StoreError`], used in responses and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidKey,
    EmptyKeyOrValue,
    InvalidTtl,
    UnsupportedType,
    MalformedElement,
    NotFound,
    BackendUnavailable,
    Backend,
    PartialWrite,
    Conflict,
    Serialization,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidKey => "invalid_key",
            ErrorKind::EmptyKeyOrValue => "empty_key_or_value",
            ErrorKind::InvalidTtl => "invalid_ttl",
            ErrorKind::UnsupportedType => "unsupported_type",
            ErrorKind::MalformedElement => "malformed_element",
            ErrorKind::NotFound => "not_found",
            ErrorKind::BackendUnavailable => "backend_unavailable",
            ErrorKind::Backend => "backend",
            ErrorKind::PartialWrite => "partial_write",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Serialization => "serialization",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::InvalidKey(_) => ErrorKind::InvalidKey,
            StoreError::EmptyKeyOrValue(_) => ErrorKind::EmptyKeyOrValue,
            StoreError::InvalidTtl(_) => ErrorKind::InvalidTtl,
            StoreError::UnsupportedType(_) => ErrorKind::UnsupportedType,
            StoreError::MalformedElement(_) => ErrorKind::MalformedElement,
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::BackendUnavailable(_) => ErrorKind::BackendUnavailable,
            StoreError::Backend(_) => ErrorKind::Backend,
            StoreError::PartialWrite { .. } => ErrorKind::PartialWrite,
            StoreError::Conflict(_) => ErrorKind::Conflict,
            StoreError::Serialization(_) => ErrorKind::Serialization,
        }
    }

    /// Returns true if the caller's input caused the error. These are all
    /// raised before any backend call.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            StoreError::InvalidKey(_)
                | StoreError::EmptyKeyOrValue(_)
                | StoreError::InvalidTtl(_)
                | StoreError::UnsupportedType(_)
        )
    }

    /// Returns true if the operation may succeed when retried unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::BackendUnavailable(_) | StoreError::Conflict(_)
        )
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error()
            || err.is_connection_refusal()
            || err.is_connection_dropped()
            || err.is_timeout()
        {
            StoreError::BackendUnavailable(err.to_string())
        } else {
            StoreError::Backend(err.to_string())
        }
    }
}

impl From<deadpool_redis::PoolError> for StoreError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        StoreError::BackendUnavailable(format!("Failed to get connection: {}", err))
    }
}
