//! Membership lists and sets
//!
//! Sorted membership lists answer "did user X like/collect/follow Y" and
//! count in a range; plain sets back recommendation rails (seen items,
//! people-you-may-know candidates).

use crate::metrics::CacheMetrics;
use crate::store::{CacheStore, ScoreBound, ScoredMember, WriteBatch};
use crate::{ttl, CacheResult};
use std::sync::Arc;
use tracing::debug;

/// Sorted membership list (`user:like:{id}`, `user:follow:{id}`, ...)
#[derive(Clone)]
pub struct MembershipList {
    store: Arc<dyn CacheStore>,
    metrics: CacheMetrics,
}

impl MembershipList {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            metrics: CacheMetrics::new(),
        }
    }

    /// `Some(true/false)` when the list is cached, `None` when the caller has
    /// to ask the database
    pub async fn contains(&self, key: &str, member: &str) -> CacheResult<Option<bool>> {
        if self.store.zscore(key, member).await?.is_some() {
            self.metrics.record_hit(key);
            return Ok(Some(true));
        }
        if self.store.exists(key).await? {
            self.metrics.record_hit(key);
            Ok(Some(false))
        } else {
            self.metrics.record_miss(key);
            Ok(None)
        }
    }

    /// Add to a cached list; absent lists stay absent. Returns whether the
    /// list was cached.
    pub async fn add(&self, key: &str, member: ScoredMember) -> CacheResult<bool> {
        if !self.store.exists(key).await? {
            return Ok(false);
        }
        let mut batch = WriteBatch::new();
        batch.zadd(key, vec![member]).expire(key, ttl::MEMBERSHIP);
        self.store.apply(&batch).await?;
        self.metrics.record_write(key);
        Ok(true)
    }

    pub async fn remove(&self, key: &str, member: &str) -> CacheResult<()> {
        let mut batch = WriteBatch::new();
        batch.zrem(key, vec![member.to_string()]);
        self.store.apply(&batch).await?;
        self.metrics.record_invalidation(key);
        Ok(())
    }

    /// Replace the list with the full membership loaded from the database
    pub async fn fill(&self, key: &str, members: Vec<ScoredMember>) -> CacheResult<()> {
        let count = members.len();
        let mut batch = WriteBatch::new();
        batch
            .del(key)
            .zadd(key, members)
            .expire(key, ttl::MEMBERSHIP);
        self.store.apply(&batch).await?;
        debug!(key = %key, count, "Membership list filled");
        self.metrics.record_write(key);
        Ok(())
    }

    pub async fn count(&self, key: &str) -> CacheResult<u64> {
        self.store.zcard(key).await
    }

    /// Members whose score lies in `[min, max]`
    pub async fn count_between(&self, key: &str, min: f64, max: f64) -> CacheResult<u64> {
        self.store
            .zcount(key, ScoreBound::Inclusive(min), ScoreBound::Inclusive(max))
            .await
    }
}

/// Unordered member set (`user:seen:{id}`, candidate pools)
#[derive(Clone)]
pub struct MemberSet {
    store: Arc<dyn CacheStore>,
    metrics: CacheMetrics,
}

impl MemberSet {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            metrics: CacheMetrics::new(),
        }
    }

    pub async fn add(&self, key: &str, members: Vec<String>) -> CacheResult<()> {
        let mut batch = WriteBatch::new();
        batch.sadd(key, members).expire(key, ttl::MEMBERSHIP);
        self.store.apply(&batch).await?;
        self.metrics.record_write(key);
        Ok(())
    }

    pub async fn remove(&self, key: &str, members: Vec<String>) -> CacheResult<()> {
        let mut batch = WriteBatch::new();
        batch.srem(key, members);
        self.store.apply(&batch).await?;
        self.metrics.record_invalidation(key);
        Ok(())
    }

    pub async fn contains(&self, key: &str, member: &str) -> CacheResult<bool> {
        self.store.sismember(key, member).await
    }

    /// Up to `count` distinct random members
    pub async fn random(&self, key: &str, count: usize) -> CacheResult<Vec<String>> {
        self.store.srandmember(key, count).await
    }

    /// Members of the first set missing from all the others
    pub async fn difference(&self, keys: &[String]) -> CacheResult<Vec<String>> {
        self.store.sdiff(keys).await
    }
}
