//! Batch miss resolution
//!
//! One MGET for a list of ids, hits returned in request order and misses
//! reported with their position so fallback results can be spliced back.

use crate::codec::Codec;
use crate::coalesce::Coalescer;
use crate::metrics::CacheMetrics;
use crate::source::RecordSource;
use crate::store::{CacheStore, WriteBatch};
use crate::writer::BackgroundWriter;
use crate::CacheResult;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// An id the cache could not answer, and where it sat in the request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Miss {
    pub id: String,
    pub index: usize,
}

/// Result of a batched cache read
#[derive(Debug, Clone)]
pub struct BatchLookup<T> {
    /// Decoded hits, in request order
    pub hits: Vec<T>,
    /// Misses, in ascending index order
    pub misses: Vec<Miss>,
}

impl<T> BatchLookup<T> {
    pub fn is_complete(&self) -> bool {
        self.misses.is_empty()
    }

    pub fn missing_ids(&self) -> Vec<String> {
        self.misses.iter().map(|m| m.id.clone()).collect()
    }
}

impl<T: Clone> BatchLookup<T> {
    /// Splice recovered records back into request order.
    ///
    /// Misses the fallback did not return (deleted upstream) are dropped and
    /// the remaining records keep their relative order.
    pub fn merge(self, recovered: &HashMap<String, T>) -> Vec<T> {
        let mut merged = self.hits;
        let mut dropped = 0;
        for miss in self.misses {
            match recovered.get(&miss.id) {
                Some(record) => merged.insert(miss.index - dropped, record.clone()),
                None => dropped += 1,
            }
        }
        merged
    }
}

/// Batched cache reads
#[derive(Clone)]
pub struct BatchResolver {
    store: Arc<dyn CacheStore>,
    metrics: CacheMetrics,
}

impl BatchResolver {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            metrics: CacheMetrics::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Look up every id in one round trip.
    ///
    /// Never fails: a store failure turns every id into a miss and an
    /// undecodable value turns that id into a miss.
    pub async fn lookup<T: DeserializeOwned>(
        &self,
        ids: &[String],
        key_fn: fn(&str) -> String,
    ) -> BatchLookup<T> {
        let keys: Vec<String> = ids.iter().map(|id| key_fn(id)).collect();

        let values = match self.store.mget(&keys).await {
            Ok(values) if values.len() == keys.len() => values,
            Ok(values) => {
                warn!(
                    expected = keys.len(),
                    got = values.len(),
                    "Batch cache read returned wrong arity, treating all as misses"
                );
                vec![None; keys.len()]
            }
            Err(e) => {
                warn!(count = keys.len(), error = %e, "Batch cache read failed, falling back");
                if let Some(key) = keys.first() {
                    self.metrics.record_error(key, e.kind());
                    self.metrics.record_fail_open(key);
                }
                vec![None; keys.len()]
            }
        };

        let mut hits = Vec::with_capacity(ids.len());
        let mut misses = Vec::new();
        for (index, (id, value)) in ids.iter().zip(values).enumerate() {
            let key = &keys[index];
            match value.filter(|v| !v.is_empty()) {
                Some(raw) => match Codec::decode::<T>(&raw) {
                    Ok(record) => {
                        self.metrics.record_hit(key);
                        hits.push(record);
                    }
                    Err(e) => {
                        warn!(key = %key, error = %e, "Cache deserialization failed");
                        self.metrics.record_error(key, e.kind());
                        misses.push(Miss {
                            id: id.clone(),
                            index,
                        });
                    }
                },
                None => {
                    self.metrics.record_miss(key);
                    misses.push(Miss {
                        id: id.clone(),
                        index,
                    });
                }
            }
        }

        debug!(hits = hits.len(), misses = misses.len(), "Batch cache lookup");
        BatchLookup { hits, misses }
    }
}

/// Read-through over one record type: batch lookup, coalesced fallback,
/// detached write-back, merge.
pub struct ReadThrough<T> {
    resolver: BatchResolver,
    coalescer: Coalescer<HashMap<String, T>>,
    writer: BackgroundWriter,
    source: Arc<dyn RecordSource<T>>,
    key_fn: fn(&str) -> String,
    ttl_secs: u64,
    load_timeout: Duration,
}

impl<T> ReadThrough<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn CacheStore>,
        writer: BackgroundWriter,
        source: Arc<dyn RecordSource<T>>,
        key_fn: fn(&str) -> String,
        ttl_secs: u64,
        coalesce_window: Duration,
        load_timeout: Duration,
    ) -> Self {
        Self {
            resolver: BatchResolver::new(store),
            coalescer: Coalescer::new(coalesce_window),
            writer,
            source,
            key_fn,
            ttl_secs,
            load_timeout,
        }
    }

    /// Records for `ids` in request order; ids unknown to the source are dropped
    pub async fn load_many(&self, ids: &[String]) -> CacheResult<Vec<T>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let lookup = self.resolver.lookup::<T>(ids, self.key_fn).await;
        if lookup.is_complete() {
            return Ok(lookup.hits);
        }

        let missing = lookup.missing_ids();
        let load_key = format!("{}[{}]", (self.key_fn)(""), missing.join(","));
        let source = Arc::clone(&self.source);
        let to_fetch = missing.clone();
        let recovered = self
            .coalescer
            .run(&load_key, self.load_timeout, move || async move {
                source.fetch_many(&to_fetch).await
            })
            .await?;

        self.write_back(&missing, &recovered);
        Ok(lookup.merge(&recovered))
    }

    pub async fn load_one(&self, id: &str) -> CacheResult<Option<T>> {
        let mut records = self.load_many(&[id.to_string()]).await?;
        Ok(records.pop())
    }

    fn write_back(&self, ids: &[String], recovered: &HashMap<String, T>) {
        let mut batch = WriteBatch::new();
        for id in ids {
            let Some(record) = recovered.get(id) else {
                continue;
            };
            match Codec::encode(record) {
                Ok(data) => {
                    batch.set((self.key_fn)(id), data, Codec::add_jitter(self.ttl_secs));
                }
                Err(e) => warn!(id = %id, error = %e, "Skipping cache write-back"),
            }
        }
        if batch.is_empty() {
            return;
        }

        let store = Arc::clone(self.resolver.store());
        let label = format!("write-back {}", (self.key_fn)(""));
        self.writer
            .submit(label, async move { store.apply(&batch).await });
    }
}
