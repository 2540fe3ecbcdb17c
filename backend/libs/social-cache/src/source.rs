//! Systems of record consulted on a cache miss
//!
//! Implemented by the service layer over its repositories. Only called when
//! the cache cannot answer.

use crate::counter::{CounterScope, CounterSet};
use std::collections::HashMap;

/// Authoritative counters from the relational store
#[async_trait::async_trait]
pub trait CountSource: Send + Sync {
    /// Load every counter of one entity
    async fn load_counts(&self, scope: CounterScope, id: &str) -> anyhow::Result<CounterSet>;
}

/// Batch record lookup by id
#[async_trait::async_trait]
pub trait RecordSource<T>: Send + Sync {
    /// Records for the given ids. Ids that no longer exist are simply absent.
    async fn fetch_many(&self, ids: &[String]) -> anyhow::Result<HashMap<String, T>>;
}
