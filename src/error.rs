//! Error types for cache operations
//!
//! Every failure the cache can hit maps onto one of these variants. None of
//! them are fatal to the caller: reads degrade to a miss and writes report
//! failure through `Result`.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for cache operations
#[derive(Error, Debug)]
pub enum CacheError {
    /// A zero TTL was supplied at the API boundary
    #[error("Invalid TTL for key '{key}': ttl must be greater than zero and representable")]
    InvalidTtl { key: String },

    /// A single value is larger than the whole memory tier
    #[error("Value for key '{key}' is {size_bytes} bytes, memory capacity is {capacity_bytes} bytes")]
    CapacityExceeded {
        key: String,
        size_bytes: usize,
        capacity_bytes: usize,
    },

    /// Serialization/Deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Storage backend (filesystem) error
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Disk operation timeout
    #[error("Disk operation '{operation}' timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The write could not be stored in either tier
    #[error("Write rejected for key '{key}': {reason}")]
    Rejected { key: String, reason: String },
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

impl CacheError {
    /// Build an I/O error bound to the path it happened on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            source,
        }
    }

    /// Build a timeout error; deadlines beyond `u64::MAX` ms saturate
    pub fn timeout(operation: &'static str, timeout: Duration) -> Self {
        CacheError::Timeout {
            operation,
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// True for errors caused by the memory tier being too small
    pub fn is_capacity(&self) -> bool {
        matches!(self, CacheError::CapacityExceeded { .. })
    }

    /// True for disk operations that hit their deadline
    pub fn is_timeout(&self) -> bool {
        matches!(self, CacheError::Timeout { .. })
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Serialization(e.to_string())
    }
}
