//! Error types for the router and pipeline

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tollgate_cache::CacheError;

#[derive(Error, Debug)]
pub enum TollgateError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Illegal transition or re-entry into an executed node
    #[error("Routing error: {0}")]
    Routing(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Retrieval error: {0}")]
    Retrieval(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl TollgateError {
    pub fn is_retryable(&self) -> bool {
        match self {
            TollgateError::Cache(e) => e.is_retryable(),
            TollgateError::Provider(_) | TollgateError::Retrieval(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, TollgateError>;

/// Lets router failures travel through a single-flight slot
impl From<TollgateError> for CacheError {
    fn from(e: TollgateError) -> Self {
        match e {
            TollgateError::Cache(inner) => inner,
            TollgateError::Provider(_) | TollgateError::Retrieval(_) => {
                CacheError::GenerationFailed(e.to_string())
            }
            other => CacheError::Other(other.to_string()),
        }
    }
}

/// The only error a caller of [`Pipeline::handle`](crate::Pipeline::handle) sees
///
/// Carries no cache-state detail; the cause is logged where it happens.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message}")]
pub struct RequestError {
    pub message: String,
    pub retryable: bool,
}

impl RequestError {
    pub const MESSAGE: &'static str = "could not complete request";

    pub fn new(retryable: bool) -> Self {
        Self {
            message: Self::MESSAGE.to_string(),
            retryable,
        }
    }
}

impl From<&TollgateError> for RequestError {
    fn from(e: &TollgateError) -> Self {
        Self::new(e.is_retryable())
    }
}

impl From<&CacheError> for RequestError {
    fn from(e: &CacheError) -> Self {
        Self::new(e.is_retryable())
    }
}
