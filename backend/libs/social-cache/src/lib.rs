//! Social content caching layer
//!
//! Sits between stateless request handlers and the systems of record:
//! - Typed value codec over a shared Redis
//! - Batched reads that splice database fallbacks back into request order
//! - Lazily populated counter hashes
//! - Cursor-paginated sorted-set lists with an end-of-list sentinel
//! - Approximate unique-view counting
//! - Coalescing of concurrent cache-miss loads
//! - Fan-out of every mutation to the denormalized copies it affects
//!
//! Cache failures never fail a request: reads fall through to the database
//! and writes are fire-and-forget on a background worker pool.

mod config;
mod error;
mod keys;
mod metrics;

pub mod batch;
pub mod coalesce;
pub mod codec;
pub mod counter;
pub mod fanout;
pub mod membership;
pub mod model;
pub mod paged;
pub mod snapshot;
pub mod source;
pub mod store;
pub mod stream;
pub mod views;
pub mod writer;

pub use batch::{BatchLookup, BatchResolver, Miss, ReadThrough};
pub use coalesce::Coalescer;
pub use codec::Codec;
pub use config::CacheConfig;
pub use counter::{CounterCache, CounterField, CounterScope, CounterSet};
pub use error::{CacheError, CacheResult};
pub use fanout::{ContentRef, FanOut, FanOutReport, Mutation};
pub use keys::CacheKey;
pub use membership::{MemberSet, MembershipList};
pub use metrics::CacheMetrics;
pub use model::ContentKind;
pub use paged::{Cursor, Direction, ListSpec, Page, PageLookup, PagedCache, END_SENTINEL};
pub use snapshot::{RankCache, RankKind, VerifyCodes};
pub use source::{CountSource, RecordSource};
pub use store::{CacheStore, MemoryStore, RedisStore, ScoreBound, ScoredMember, WriteBatch};
pub use stream::{ImageTask, ImageTaskQueue};
pub use views::ViewCounter;
pub use writer::BackgroundWriter;

use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tracing::info;

/// Default TTL values (seconds)
pub mod ttl {
    pub const VERIFY_CODE: u64 = 900; // 15 minutes
    pub const INTERACTION: u64 = 3600; // 1 hour
    pub const CARD: u64 = 3600; // 1 hour
    pub const RANK: u64 = 3600; // 1 hour
    pub const PROFILE: u64 = 21_600; // 6 hours
    pub const DETAIL: u64 = 43_200; // 12 hours
    pub const COMMENT_LIST: u64 = 86_400; // 24 hours
    pub const VIEWS: u64 = 86_400; // 24 hours
    pub const COUNTER: u64 = 259_200; // 3 days
    pub const MEMBERSHIP: u64 = 17_280_000; // 200 days
}

/// Every cache component wired to one store, for injection into handlers
pub struct CacheLayer {
    config: CacheConfig,
    store: Arc<dyn CacheStore>,
    redis: Option<Arc<RedisStore>>,
    writer: BackgroundWriter,
    codec: Codec,
    batch: BatchResolver,
    counters: Arc<CounterCache>,
    paged: PagedCache,
    views: ViewCounter,
    lists: MembershipList,
    sets: MemberSet,
    ranks: RankCache,
    verify_codes: VerifyCodes,
    images: ImageTaskQueue,
    fanout: Arc<FanOut>,
}

impl CacheLayer {
    /// Build the layer over an existing store. Must run inside a Tokio
    /// runtime, the background writer spawns its workers here.
    pub fn new(config: CacheConfig, store: Arc<dyn CacheStore>, counts: Arc<dyn CountSource>) -> Self {
        let writer = BackgroundWriter::new(config.writer_workers, config.writer_queue);
        let codec = Codec::new(Arc::clone(&store));
        let counters = Arc::new(CounterCache::new(
            Arc::clone(&store),
            counts,
            config.coalesce_window,
            config.load_timeout,
        ));
        let paged = PagedCache::new(
            Arc::clone(&store),
            writer.clone(),
            config.coalesce_window,
            config.load_timeout,
        );
        let fanout = Arc::new(FanOut::new(
            Arc::clone(&store),
            Arc::clone(&counters),
            writer.clone(),
            Self::root_comment_spec_for(&config),
            Self::child_comment_spec_for(&config),
        ));

        Self {
            batch: BatchResolver::new(Arc::clone(&store)),
            views: ViewCounter::new(Arc::clone(&store)),
            lists: MembershipList::new(Arc::clone(&store)),
            sets: MemberSet::new(Arc::clone(&store)),
            ranks: RankCache::new(codec.clone()),
            verify_codes: VerifyCodes::new(codec.clone()),
            images: ImageTaskQueue::new(Arc::clone(&store)),
            redis: None,
            config,
            store,
            writer,
            codec,
            counters,
            paged,
            fanout,
        }
    }

    /// Connect to Redis and build the layer over it
    pub async fn connect(config: CacheConfig, counts: Arc<dyn CountSource>) -> anyhow::Result<Self> {
        let redis = Arc::new(RedisStore::connect(&config).await?);
        let store: Arc<dyn CacheStore> = redis.clone();
        let mut layer = Self::new(config, store, counts);
        layer.redis = Some(redis);
        Ok(layer)
    }

    /// Read-through over one record type, sharing this layer's store and writer
    pub fn read_through<T>(
        &self,
        source: Arc<dyn RecordSource<T>>,
        key_fn: fn(&str) -> String,
        ttl_secs: u64,
    ) -> ReadThrough<T>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        ReadThrough::new(
            Arc::clone(&self.store),
            self.writer.clone(),
            source,
            key_fn,
            ttl_secs,
            self.config.coalesce_window,
            self.config.load_timeout,
        )
    }

    fn root_comment_spec_for(config: &CacheConfig) -> ListSpec {
        ListSpec::new(Direction::NewestFirst, ttl::COMMENT_LIST, config)
    }

    fn child_comment_spec_for(config: &CacheConfig) -> ListSpec {
        ListSpec::new(Direction::OldestFirst, ttl::COMMENT_LIST, config)
    }

    /// Root comments under a content item, newest first
    pub fn root_comment_spec(&self) -> ListSpec {
        Self::root_comment_spec_for(&self.config)
    }

    /// Replies under a root comment, oldest first
    pub fn child_comment_spec(&self) -> ListSpec {
        Self::child_comment_spec_for(&self.config)
    }

    /// Activity feeds and per-user content lists, newest first
    pub fn feed_spec(&self) -> ListSpec {
        ListSpec::new(Direction::NewestFirst, ttl::INTERACTION, &self.config)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn writer(&self) -> &BackgroundWriter {
        &self.writer
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    pub fn batch(&self) -> &BatchResolver {
        &self.batch
    }

    pub fn counters(&self) -> &Arc<CounterCache> {
        &self.counters
    }

    pub fn paged(&self) -> &PagedCache {
        &self.paged
    }

    pub fn views(&self) -> &ViewCounter {
        &self.views
    }

    pub fn lists(&self) -> &MembershipList {
        &self.lists
    }

    pub fn sets(&self) -> &MemberSet {
        &self.sets
    }

    pub fn ranks(&self) -> &RankCache {
        &self.ranks
    }

    pub fn verify_codes(&self) -> &VerifyCodes {
        &self.verify_codes
    }

    pub fn images(&self) -> &ImageTaskQueue {
        &self.images
    }

    pub fn fanout(&self) -> &Arc<FanOut> {
        &self.fanout
    }

    /// Health check round trip to the store
    pub async fn ping(&self) -> CacheResult<()> {
        self.store.ping().await
    }

    /// Drain pending background writes, then close the Redis client
    pub async fn shutdown(&self) {
        self.writer.shutdown().await;
        if let Some(redis) = &self.redis {
            redis.close();
        }
        info!("Cache layer shut down");
    }
}
