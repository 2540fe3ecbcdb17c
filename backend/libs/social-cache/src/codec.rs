//! Value codec
//!
//! Typed accessors over string values in the store. A miss is `Ok(None)`;
//! store failures and undecodable values are errors the caller can tell
//! apart from a miss.

use crate::metrics::CacheMetrics;
use crate::store::{CacheStore, WriteBatch};
use crate::{CacheError, CacheResult};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

const FLAG_TRUE: &str = "1";
const FLAG_FALSE: &str = "0";

/// JSON/string codec bound to one store
#[derive(Clone)]
pub struct Codec {
    store: Arc<dyn CacheStore>,
    metrics: CacheMetrics,
}

impl Codec {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            metrics: CacheMetrics::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Add jitter to TTL to prevent thundering herd
    pub fn add_jitter(ttl_secs: u64) -> u64 {
        let jitter_percent = (rand::random::<u32>() % 10) as f64 / 100.0;
        let jitter = (ttl_secs as f64 * jitter_percent).round() as u64;
        ttl_secs + jitter
    }

    pub fn encode<T: Serialize>(value: &T) -> CacheResult<String> {
        serde_json::to_string(value).map_err(CacheError::Serialization)
    }

    pub fn decode<T: DeserializeOwned>(raw: &str) -> CacheResult<T> {
        serde_json::from_str(raw).map_err(CacheError::Serialization)
    }

    async fn get_raw(&self, key: &str) -> CacheResult<Option<String>> {
        match self.store.get(key).await {
            Ok(Some(data)) if !data.is_empty() => Ok(Some(data)),
            Ok(_) => {
                debug!(key = %key, "Cache miss");
                self.metrics.record_miss(key);
                Ok(None)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache get failed");
                self.metrics.record_error(key, e.kind());
                Err(e)
            }
        }
    }

    /// Read and decode a JSON record
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        let Some(data) = self.get_raw(key).await? else {
            return Ok(None);
        };
        match Self::decode::<T>(&data) {
            Ok(value) => {
                debug!(key = %key, "Cache hit");
                self.metrics.record_hit(key);
                Ok(Some(value))
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache deserialization failed");
                self.metrics.record_error(key, e.kind());
                Err(e)
            }
        }
    }

    /// Encode and store a JSON record; the TTL gets up to 10% jitter
    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl_secs: u64) -> CacheResult<()> {
        let data = Self::encode(value)?;
        self.set_string(key, data, Self::add_jitter(ttl_secs)).await
    }

    /// Write without jitter, for values whose lifetime is part of their meaning
    pub async fn set_string(&self, key: &str, value: impl Into<String>, ttl_secs: u64) -> CacheResult<()> {
        let mut batch = WriteBatch::new();
        batch.set(key, value, ttl_secs);
        self.store.apply(&batch).await.map_err(|e| {
            warn!(key = %key, error = %e, "Cache set failed");
            self.metrics.record_error(key, e.kind());
            e
        })?;

        debug!(key = %key, ttl = ttl_secs, "Cache set");
        self.metrics.record_write(key);
        Ok(())
    }

    pub async fn get_string(&self, key: &str) -> CacheResult<Option<String>> {
        let value = self.get_raw(key).await?;
        if value.is_some() {
            self.metrics.record_hit(key);
        }
        Ok(value)
    }

    pub async fn get_i64(&self, key: &str) -> CacheResult<Option<i64>> {
        match self.get_raw(key).await? {
            None => Ok(None),
            Some(raw) => {
                let value = raw.trim().parse::<i64>().map_err(|_| {
                    self.metrics.record_error(key, "invalid_data");
                    CacheError::InvalidData(format!("`{}` holds non-integer `{}`", key, raw))
                })?;
                self.metrics.record_hit(key);
                Ok(Some(value))
            }
        }
    }

    pub async fn get_flag(&self, key: &str) -> CacheResult<Option<bool>> {
        match self.get_raw(key).await?.as_deref() {
            None => Ok(None),
            Some(FLAG_TRUE) => {
                self.metrics.record_hit(key);
                Ok(Some(true))
            }
            Some(FLAG_FALSE) => {
                self.metrics.record_hit(key);
                Ok(Some(false))
            }
            Some(other) => {
                self.metrics.record_error(key, "invalid_data");
                Err(CacheError::InvalidData(format!(
                    "`{}` holds non-flag `{}`",
                    key, other
                )))
            }
        }
    }

    pub async fn set_flag(&self, key: &str, flag: bool, ttl_secs: u64) -> CacheResult<()> {
        let value = if flag { FLAG_TRUE } else { FLAG_FALSE };
        self.set_string(key, value, ttl_secs).await
    }

    /// Read a value and delete it, for one-shot tokens
    pub async fn take_string(&self, key: &str) -> CacheResult<Option<String>> {
        let value = self.get_string(key).await?;
        if value.is_some() {
            self.delete(&[key.to_string()]).await?;
        }
        Ok(value)
    }

    /// Delete keys in one pipeline
    pub async fn delete(&self, keys: &[String]) -> CacheResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut batch = WriteBatch::new();
        for key in keys {
            batch.del(key.as_str());
        }
        self.store.apply(&batch).await?;

        for key in keys {
            self.metrics.record_invalidation(key);
        }
        debug!(count = keys.len(), "Cache delete");
        Ok(())
    }
}
