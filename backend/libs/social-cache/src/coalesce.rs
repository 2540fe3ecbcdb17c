//! Request coalescing for cache-miss fallback loads
//!
//! Concurrent callers asking for the same key while a load is registered
//! share one database round trip. The loader runs on its own task, so a
//! caller that gives up (timeout or dropped request) never cancels it for
//! the others. Registrations are forgotten a short window after dispatch,
//! which bounds how stale a shared result can be.

use crate::metrics::CacheMetrics;
use crate::{CacheError, CacheResult};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

type SharedLoad<T> = Shared<BoxFuture<'static, Result<T, Arc<anyhow::Error>>>>;

/// Deduplicates identical in-flight loads by key
pub struct Coalescer<T> {
    inflight: Arc<DashMap<String, (u64, SharedLoad<T>)>>,
    forget_after: Duration,
    next_generation: AtomicU64,
    metrics: CacheMetrics,
}

impl<T> Coalescer<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(forget_after: Duration) -> Self {
        Self {
            inflight: Arc::new(DashMap::new()),
            forget_after,
            next_generation: AtomicU64::new(0),
            metrics: CacheMetrics::new(),
        }
    }

    /// Run `loader` for `key`, or join the load already registered for it.
    ///
    /// Waits at most `wait` for the result. On timeout the loader keeps
    /// running and still serves whoever else is waiting on it.
    pub async fn run<F, Fut>(&self, key: &str, wait: Duration, loader: F) -> CacheResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let load = match self.inflight.entry(key.to_string()) {
            Entry::Occupied(entry) => {
                debug!(key = %key, "Joining in-flight load");
                self.metrics.record_coalesced_wait();
                entry.get().1.clone()
            }
            Entry::Vacant(entry) => {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                let load = self.dispatch(key, loader());
                entry.insert((generation, load.clone()));
                self.schedule_forget(key.to_string(), generation);
                load
            }
        };

        match tokio::time::timeout(wait, load).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(CacheError::Source(e)),
            Err(_) => {
                warn!(key = %key, wait_ms = wait.as_millis() as u64, "Coalesced load timed out");
                Err(CacheError::Timeout {
                    op: "coalesced load",
                    after: wait,
                })
            }
        }
    }

    fn dispatch<Fut>(&self, key: &str, fut: Fut) -> SharedLoad<T>
    where
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.metrics.record_loader_run();
        debug!(key = %key, "Dispatching fallback load");

        let handle = tokio::spawn(fut);
        async move {
            match handle.await {
                Ok(result) => result.map_err(Arc::new),
                Err(join_err) => Err(Arc::new(anyhow::anyhow!(
                    "fallback loader task failed: {}",
                    join_err
                ))),
            }
        }
        .boxed()
        .shared()
    }

    fn schedule_forget(&self, key: String, generation: u64) {
        let inflight = Arc::clone(&self.inflight);
        let forget_after = self.forget_after;
        tokio::spawn(async move {
            tokio::time::sleep(forget_after).await;
            // A newer registration under the same key stays.
            inflight.remove_if(&key, |_, (registered, _)| *registered == generation);
        });
    }

    /// Number of keys with a joinable load
    pub fn inflight(&self) -> usize {
        self.inflight.len()
    }
}
