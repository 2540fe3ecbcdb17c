//! Counter cache
//!
//! One hash of named integer counters per entity. The hash is populated from
//! the database on first touch with HSETNX, so concurrent populators cannot
//! clobber increments that landed in between, and then mutated with HINCRBY.
//! Every touch pushes the TTL out again.
//!
//! Population also sets a marker field. An increment that runs before any
//! population leaves a hash without it; such a partial hash reads as a miss
//! and the next population fills in the fields it lacks.

use crate::coalesce::Coalescer;
use crate::metrics::CacheMetrics;
use crate::model::ContentKind;
use crate::source::CountSource;
use crate::store::{CacheStore, WriteBatch};
use crate::{ttl, CacheError, CacheKey, CacheResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Hash field recording that the authoritative counts were written
const POPULATED_FIELD: &str = "_populated";

/// Named counter inside a counter hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CounterField {
    Likes,
    Collects,
    Comments,
    Forwards,
    Views,
    Followers,
    Following,
    Arts,
    Trends,
}

impl CounterField {
    pub fn as_str(&self) -> &'static str {
        match self {
            CounterField::Likes => "likes",
            CounterField::Collects => "collects",
            CounterField::Comments => "comments",
            CounterField::Forwards => "forwards",
            CounterField::Views => "views",
            CounterField::Followers => "followers",
            CounterField::Following => "following",
            CounterField::Arts => "arts",
            CounterField::Trends => "trends",
        }
    }
}

impl fmt::Display for CounterField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which entity a counter hash belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterScope {
    Artwork,
    Trend,
    User,
}

impl CounterScope {
    pub fn key(&self, id: &str) -> String {
        match self {
            CounterScope::Artwork => CacheKey::artwork_count(id),
            CounterScope::Trend => CacheKey::trend_count(id),
            CounterScope::User => CacheKey::user_count(id),
        }
    }
}

impl From<ContentKind> for CounterScope {
    fn from(kind: ContentKind) -> Self {
        match kind {
            ContentKind::Artwork => CounterScope::Artwork,
            ContentKind::Trend => CounterScope::Trend,
        }
    }
}

/// Counters of one entity. Absent fields read as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSet {
    values: BTreeMap<String, i64>,
}

impl CounterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: CounterField, value: i64) -> Self {
        self.set(field, value);
        self
    }

    pub fn set(&mut self, field: CounterField, value: i64) {
        self.values.insert(field.as_str().to_string(), value);
    }

    pub fn get(&self, field: CounterField) -> i64 {
        self.values.get(field.as_str()).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Parse an HGETALL reply
    pub fn from_hash(hash: &HashMap<String, String>) -> CacheResult<Self> {
        let mut values = BTreeMap::new();
        for (field, raw) in hash {
            if field == POPULATED_FIELD {
                continue;
            }
            let value = raw.parse::<i64>().map_err(|_| {
                CacheError::InvalidData(format!("counter `{}` holds `{}`", field, raw))
            })?;
            values.insert(field.clone(), value);
        }
        Ok(Self { values })
    }
}

/// Lazily populated counter hashes
pub struct CounterCache {
    store: Arc<dyn CacheStore>,
    source: Arc<dyn CountSource>,
    coalescer: Coalescer<CounterSet>,
    load_timeout: Duration,
    metrics: CacheMetrics,
}

impl CounterCache {
    pub fn new(
        store: Arc<dyn CacheStore>,
        source: Arc<dyn CountSource>,
        coalesce_window: Duration,
        load_timeout: Duration,
    ) -> Self {
        Self {
            store,
            source,
            coalescer: Coalescer::new(coalesce_window),
            load_timeout,
            metrics: CacheMetrics::new(),
        }
    }

    /// Make sure the hash is populated. If it is, only its TTL is refreshed;
    /// otherwise the authoritative counts are written field by field with
    /// HSETNX, keeping any field an earlier increment created. Safe to call
    /// concurrently.
    pub async fn ensure_populated(&self, scope: CounterScope, id: &str) -> CacheResult<()> {
        let key = scope.key(id);

        let hash = self.store.hget_all(&key).await?;
        if is_populated(&hash) {
            let mut batch = WriteBatch::new();
            batch.expire(key.as_str(), ttl::COUNTER);
            self.store.apply(&batch).await?;
            debug!(key = %key, "Counter hash present, TTL refreshed");
            return Ok(());
        }
        if !hash.is_empty() {
            debug!(key = %key, fields = hash.len(), "Partial counter hash, repairing");
        }

        self.metrics.record_miss(&key);
        let counts = self.load(scope, id).await?;
        self.populate(&key, &counts).await
    }

    /// HINCRBY plus TTL refresh. Returns the new value.
    ///
    /// Call [`ensure_populated`](Self::ensure_populated) first; on an absent
    /// hash this creates a partial one holding only the delta.
    pub async fn increment(
        &self,
        scope: CounterScope,
        id: &str,
        field: CounterField,
        delta: i64,
    ) -> CacheResult<i64> {
        let key = scope.key(id);
        let value = self
            .store
            .hincr_by(&key, field.as_str(), delta, ttl::COUNTER)
            .await?;
        debug!(key = %key, field = %field, delta, value, "Counter incremented");
        self.metrics.record_write(&key);
        Ok(value)
    }

    /// Cached counters only; `None` when the hash is absent or partial
    pub async fn get(&self, scope: CounterScope, id: &str) -> CacheResult<Option<CounterSet>> {
        let key = scope.key(id);
        let hash = self.store.hget_all(&key).await?;
        if !is_populated(&hash) {
            self.metrics.record_miss(&key);
            return Ok(None);
        }
        self.metrics.record_hit(&key);
        CounterSet::from_hash(&hash).map(Some)
    }

    /// Cached counters, falling back to the database on a miss or a cache
    /// failure. Only a database failure is returned as an error.
    pub async fn get_or_load(&self, scope: CounterScope, id: &str) -> CacheResult<CounterSet> {
        let key = scope.key(id);
        match self.get(scope, id).await {
            Ok(Some(counts)) => return Ok(counts),
            Ok(None) => {}
            Err(e) => {
                warn!(key = %key, error = %e, "Counter read failed, falling back to database");
                self.metrics.record_error(&key, e.kind());
                self.metrics.record_fail_open(&key);
                return self.load(scope, id).await;
            }
        }

        let counts = self.load(scope, id).await?;
        if let Err(e) = self.populate(&key, &counts).await {
            warn!(key = %key, error = %e, "Counter population failed");
        }
        Ok(counts)
    }

    /// Counters for several entities of one scope, in request order
    pub async fn get_many(&self, scope: CounterScope, ids: &[String]) -> CacheResult<Vec<CounterSet>> {
        let keys: Vec<String> = ids.iter().map(|id| scope.key(id)).collect();
        let hashes = match self.store.hget_all_many(&keys).await {
            Ok(hashes) if hashes.len() == keys.len() => hashes,
            Ok(_) => vec![HashMap::new(); keys.len()],
            Err(e) => {
                warn!(count = keys.len(), error = %e, "Batch counter read failed, falling back");
                if let Some(key) = keys.first() {
                    self.metrics.record_fail_open(key);
                }
                vec![HashMap::new(); keys.len()]
            }
        };

        let mut out = Vec::with_capacity(ids.len());
        for ((id, key), hash) in ids.iter().zip(&keys).zip(hashes) {
            let cached = if !is_populated(&hash) {
                None
            } else {
                match CounterSet::from_hash(&hash) {
                    Ok(counts) => Some(counts),
                    Err(e) => {
                        warn!(key = %key, error = %e, "Corrupt counter hash, reloading");
                        None
                    }
                }
            };

            match cached {
                Some(counts) => {
                    self.metrics.record_hit(key);
                    out.push(counts);
                }
                None => {
                    self.metrics.record_miss(key);
                    let counts = self.load(scope, id).await?;
                    if let Err(e) = self.populate(key, &counts).await {
                        warn!(key = %key, error = %e, "Counter population failed");
                    }
                    out.push(counts);
                }
            }
        }
        Ok(out)
    }

    /// Drop the hash; the next touch reloads it
    pub async fn invalidate(&self, scope: CounterScope, id: &str) -> CacheResult<()> {
        let key = scope.key(id);
        let mut batch = WriteBatch::new();
        batch.del(key.as_str());
        self.store.apply(&batch).await?;
        self.metrics.record_invalidation(&key);
        Ok(())
    }

    async fn load(&self, scope: CounterScope, id: &str) -> CacheResult<CounterSet> {
        let source = Arc::clone(&self.source);
        let owned_id = id.to_string();
        self.coalescer
            .run(&scope.key(id), self.load_timeout, move || async move {
                source.load_counts(scope, &owned_id).await
            })
            .await
    }

    async fn populate(&self, key: &str, counts: &CounterSet) -> CacheResult<()> {
        let mut batch = WriteBatch::new();
        for (field, value) in counts.iter() {
            batch.hset_nx(key, field, value);
        }
        batch.hset_nx(key, POPULATED_FIELD, 1).expire(key, ttl::COUNTER);
        self.store.apply(&batch).await?;

        debug!(key = %key, fields = counts.iter().count(), "Counter hash populated");
        self.metrics.record_write(key);
        Ok(())
    }
}

fn is_populated(hash: &HashMap<String, String>) -> bool {
    hash.contains_key(POPULATED_FIELD)
}
