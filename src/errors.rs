//! Cache error types.

use thiserror::Error;

/// Errors that can occur during cache operations.
///
/// The propagation policy is deliberately narrow: read paths never raise
/// (fetch and unmarshal failures downgrade to misses and are logged), bulk
/// write failures are retried per item before being reported, and only
/// configuration or unwritable-medium problems surface as hard errors.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Key, tag, or namespace outside the allowed character set
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Failed to reach the cache backend at construction time
    #[error("Cache connection error: {0}")]
    ConnectionError(String),

    /// Failed to marshal or unmarshal a cache value
    #[error("Cache serialization error: {0}")]
    SerializationError(String),

    /// Transient backend failure (I/O error, failed command)
    #[error("Cache backend error: {0}")]
    BackendError(String),

    /// Fatal misconfiguration: unwritable cache root, forbidden eviction
    /// policy, unknown backend name
    #[error("Invalid cache configuration: {0}")]
    InvalidConfiguration(String),
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

impl From<std::io::Error> for CacheError {
    fn from(error: std::io::Error) -> Self {
        CacheError::BackendError(error.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(error: serde_json::Error) -> Self {
        CacheError::SerializationError(error.to_string())
    }
}

#[cfg(feature = "backend-redis")]
impl From<redis::RedisError> for CacheError {
    fn from(error: redis::RedisError) -> Self {
        CacheError::BackendError(error.to_string())
    }
}
