//! Error types for cache operations
//!
//! Errors carry string payloads so they can be cloned: a single-flight leader
//! hands the same outcome to every waiting follower.

use thiserror::Error;

/// Main error type for tiered cache operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Durable store unreachable or failing; absorbed by the coordinator
    #[error("Tier unavailable ({tier}): {reason}")]
    TierUnavailable { tier: String, reason: String },

    /// Generation call exceeded its time budget
    #[error("Generation timed out after {timeout_ms}ms: {context}")]
    GenerationTimeout { timeout_ms: u64, context: String },

    /// Generation provider returned an error
    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    /// Invalidation handler could not apply an event
    #[error("Invalidation delivery failed: {0}")]
    InvalidationDeliveryFailure(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Serialization/Deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Filesystem error from a durable backend
    #[error("I/O error: {0}")]
    IoError(String),

    /// Generic error with context
    #[error("Error: {0}")]
    Other(String),
}

impl CacheError {
    /// Whether a caller may retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CacheError::GenerationTimeout { .. }
                | CacheError::GenerationFailed(_)
                | CacheError::TierUnavailable { .. }
        )
    }
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

impl From<String> for CacheError {
    fn from(s: String) -> Self {
        CacheError::Other(s)
    }
}

impl From<&str> for CacheError {
    fn from(s: &str) -> Self {
        CacheError::Other(s.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::SerializationError(e.to_string())
    }
}

impl From<std::io::Error> for CacheError {
    fn from(e: std::io::Error) -> Self {
        CacheError::IoError(e.to_string())
    }
}
