//! Cache metrics for observability

use crate::CacheKey;
use prometheus::{CounterVec, IntCounter, Opts, Registry};
use std::sync::OnceLock;

static METRICS: OnceLock<CacheMetricsInner> = OnceLock::new();

struct CacheMetricsInner {
    hits: CounterVec,
    misses: CounterVec,
    writes: CounterVec,
    invalidations: CounterVec,
    errors: CounterVec,
    fail_open: CounterVec,
    coalesced_waits: IntCounter,
    loader_runs: IntCounter,
    dropped_writes: IntCounter,
}

impl CacheMetricsInner {
    fn new() -> Self {
        Self {
            hits: CounterVec::new(
                Opts::new("social_cache_hits_total", "Total cache hits"),
                &["entity"],
            )
            .expect("valid metric definition"),
            misses: CounterVec::new(
                Opts::new("social_cache_misses_total", "Total cache misses"),
                &["entity"],
            )
            .expect("valid metric definition"),
            writes: CounterVec::new(
                Opts::new("social_cache_writes_total", "Total cache writes"),
                &["entity"],
            )
            .expect("valid metric definition"),
            invalidations: CounterVec::new(
                Opts::new(
                    "social_cache_invalidations_total",
                    "Total cache invalidations",
                ),
                &["entity"],
            )
            .expect("valid metric definition"),
            errors: CounterVec::new(
                Opts::new("social_cache_errors_total", "Total cache errors"),
                &["entity", "error_type"],
            )
            .expect("valid metric definition"),
            fail_open: CounterVec::new(
                Opts::new(
                    "social_cache_fail_open_total",
                    "Reads served from the database because the cache store failed",
                ),
                &["entity"],
            )
            .expect("valid metric definition"),
            coalesced_waits: IntCounter::new(
                "social_cache_coalesced_waits_total",
                "Fallback loads that joined an in-flight load",
            )
            .expect("valid metric definition"),
            loader_runs: IntCounter::new(
                "social_cache_loader_runs_total",
                "Fallback loads dispatched to the database",
            )
            .expect("valid metric definition"),
            dropped_writes: IntCounter::new(
                "social_cache_dropped_writes_total",
                "Background cache writes dropped because the queue was full",
            )
            .expect("valid metric definition"),
        }
    }

    fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.hits.clone()))?;
        registry.register(Box::new(self.misses.clone()))?;
        registry.register(Box::new(self.writes.clone()))?;
        registry.register(Box::new(self.invalidations.clone()))?;
        registry.register(Box::new(self.errors.clone()))?;
        registry.register(Box::new(self.fail_open.clone()))?;
        registry.register(Box::new(self.coalesced_waits.clone()))?;
        registry.register(Box::new(self.loader_runs.clone()))?;
        registry.register(Box::new(self.dropped_writes.clone()))?;
        Ok(())
    }
}

fn get_metrics() -> &'static CacheMetricsInner {
    METRICS.get_or_init(CacheMetricsInner::new)
}

fn extract_entity(key: &str) -> &str {
    CacheKey::entity_type(key).unwrap_or("unknown")
}

/// Cache metrics wrapper
#[derive(Clone, Default)]
pub struct CacheMetrics;

impl CacheMetrics {
    pub fn new() -> Self {
        Self
    }

    /// Register metrics with a Prometheus registry
    pub fn register(registry: &Registry) -> Result<(), prometheus::Error> {
        get_metrics().register(registry)
    }

    pub fn record_hit(&self, key: &str) {
        let entity = extract_entity(key);
        get_metrics().hits.with_label_values(&[entity]).inc();
    }

    pub fn record_miss(&self, key: &str) {
        let entity = extract_entity(key);
        get_metrics().misses.with_label_values(&[entity]).inc();
    }

    pub fn record_write(&self, key: &str) {
        let entity = extract_entity(key);
        get_metrics().writes.with_label_values(&[entity]).inc();
    }

    pub fn record_invalidation(&self, key: &str) {
        let entity = extract_entity(key);
        get_metrics()
            .invalidations
            .with_label_values(&[entity])
            .inc();
    }

    pub fn record_error(&self, key: &str, error_type: &str) {
        let entity = extract_entity(key);
        get_metrics()
            .errors
            .with_label_values(&[entity, error_type])
            .inc();
    }

    pub fn record_fail_open(&self, key: &str) {
        let entity = extract_entity(key);
        get_metrics().fail_open.with_label_values(&[entity]).inc();
    }

    pub fn record_coalesced_wait(&self) {
        get_metrics().coalesced_waits.inc();
    }

    pub fn record_loader_run(&self) {
        get_metrics().loader_runs.inc();
    }

    pub fn record_dropped_write(&self) {
        get_metrics().dropped_writes.inc();
    }
}
