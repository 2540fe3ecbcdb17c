//! Approximate unique-view counting
//!
//! Views are recorded into a HyperLogLog per content item and added to the
//! durable count at read time. A periodic job drains the estimate into the
//! database; the HyperLogLog is never the only record.

use crate::metrics::CacheMetrics;
use crate::model::ContentKind;
use crate::store::{CacheStore, WriteBatch};
use crate::{ttl, CacheResult};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct ViewCounter {
    store: Arc<dyn CacheStore>,
    metrics: CacheMetrics,
}

impl ViewCounter {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            metrics: CacheMetrics::new(),
        }
    }

    /// Record one view by `fingerprint` (user id or client hash). Returns
    /// true when the estimate moved.
    pub async fn record_view(&self, kind: ContentKind, id: &str, fingerprint: &str) -> CacheResult<bool> {
        let key = kind.view_key(id);
        let changed = self.store.pfadd(&key, &[fingerprint.to_string()]).await?;

        let mut batch = WriteBatch::new();
        batch.expire(key.as_str(), ttl::VIEWS);
        self.store.apply(&batch).await?;

        debug!(key = %key, changed, "View recorded");
        self.metrics.record_write(&key);
        Ok(changed)
    }

    /// Unique viewers recorded since the last drain
    pub async fn estimate(&self, kind: ContentKind, id: &str) -> CacheResult<u64> {
        let key = kind.view_key(id);
        self.store.pfcount(&key).await
    }

    /// Durable views plus the pending estimate. Falls back to the durable
    /// count alone when the cache cannot answer.
    pub async fn total_views(&self, kind: ContentKind, id: &str, db_views: i64) -> i64 {
        match self.estimate(kind, id).await {
            Ok(pending) => db_views.saturating_add(pending as i64),
            Err(e) => {
                let key = kind.view_key(id);
                warn!(key = %key, error = %e, "View estimate unavailable, using stored count");
                self.metrics.record_fail_open(&key);
                db_views
            }
        }
    }

    /// Read the estimate and delete the structure, for the flush job
    pub async fn drain(&self, kind: ContentKind, id: &str) -> CacheResult<u64> {
        let key = kind.view_key(id);
        let pending = self.store.pfcount(&key).await?;

        let mut batch = WriteBatch::new();
        batch.del(key.as_str());
        self.store.apply(&batch).await?;

        debug!(key = %key, pending, "View estimate drained");
        self.metrics.record_invalidation(&key);
        Ok(pending)
    }
}
