//! Cache error types

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Cache store `{op}` timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    #[error("Cache store unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid cache data: {0}")]
    InvalidData(String),

    #[error("Fallback load failed: {0}")]
    Source(Arc<anyhow::Error>),
}

impl CacheError {
    /// Connection loss, timeouts and closed clients. Callers fall through to
    /// the database on these exactly as on a miss.
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            CacheError::Redis(_) | CacheError::Timeout { .. } | CacheError::Unavailable(_)
        )
    }

    /// Short label used for the `error_type` metric dimension.
    pub fn kind(&self) -> &'static str {
        match self {
            CacheError::Redis(_) => "redis",
            CacheError::Timeout { .. } => "timeout",
            CacheError::Unavailable(_) => "unavailable",
            CacheError::Serialization(_) => "deserialize",
            CacheError::InvalidData(_) => "invalid_data",
            CacheError::Source(_) => "source",
        }
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
