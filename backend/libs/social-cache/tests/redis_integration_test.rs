//! Integration tests for the cache layer against a real Redis
//!
//! These tests require a running Redis instance.
//! Run with: cargo test --test redis_integration_test -- --ignored

use social_cache::{
    CacheConfig, CacheKey, CacheLayer, CacheStore, ContentKind, CountSource, CounterField,
    CounterScope, CounterSet, Cursor, PageLookup, RedisStore, ScoreBound, ScoredMember,
    WriteBatch,
};
use std::sync::Arc;

const REDIS_URL: &str = "redis://127.0.0.1:6379";

struct FixedCounts;

#[async_trait::async_trait]
impl CountSource for FixedCounts {
    async fn load_counts(&self, _scope: CounterScope, _id: &str) -> anyhow::Result<CounterSet> {
        Ok(CounterSet::new()
            .with(CounterField::Likes, 10)
            .with(CounterField::Comments, 2))
    }
}

async fn connect() -> CacheLayer {
    CacheLayer::connect(CacheConfig::new(REDIS_URL), Arc::new(FixedCounts))
        .await
        .expect("Failed to connect to Redis")
}

async fn clear(store: &Arc<dyn CacheStore>, keys: &[String]) {
    let mut batch = WriteBatch::new();
    for key in keys {
        batch.del(key.clone());
    }
    store.apply(&batch).await.expect("Failed to clear keys");
}

#[tokio::test]
#[ignore] // Requires Redis server
async fn test_ping_and_string_roundtrip() {
    let store = RedisStore::connect(&CacheConfig::new(REDIS_URL))
        .await
        .expect("Failed to connect to Redis");
    store.ping().await.expect("Ping failed");

    let mut batch = WriteBatch::new();
    batch.set("itest:string", "hello", 60);
    store.apply(&batch).await.expect("Failed to set");

    assert_eq!(
        store.get("itest:string").await.expect("Failed to get").as_deref(),
        Some("hello")
    );

    let mut batch = WriteBatch::new();
    batch.del("itest:string");
    store.apply(&batch).await.expect("Failed to delete");
    store.close();
}

#[tokio::test]
#[ignore] // Requires Redis server
async fn test_counter_population_and_increment() {
    let layer = connect().await;
    let id = "itest-artwork";
    clear(layer.store(), &[CacheKey::artwork_count(id)]).await;

    let counters = layer.counters();
    counters
        .ensure_populated(CounterScope::Artwork, id)
        .await
        .expect("Failed to populate");
    let likes = counters
        .increment(CounterScope::Artwork, id, CounterField::Likes, 1)
        .await
        .expect("Failed to increment");
    assert_eq!(likes, 11);

    let counts = counters
        .get(CounterScope::Artwork, id)
        .await
        .expect("Failed to read counters")
        .expect("Counter hash missing");
    assert_eq!(counts.get(CounterField::Comments), 2);

    clear(layer.store(), &[CacheKey::artwork_count(id)]).await;
    layer.shutdown().await;
}

#[tokio::test]
#[ignore] // Requires Redis server
async fn test_paged_list_with_end_sentinel() {
    let layer = connect().await;
    let key = CacheKey::comment_root_list("itest-artwork");
    clear(layer.store(), &[key.clone()]).await;

    let spec = layer.root_comment_spec().with_page_size(3);
    let rows: Vec<ScoredMember> = (0..5u64)
        .rev()
        .map(|i| ScoredMember::new(format!("c{}", i), (1000 + i) as f64))
        .collect();

    layer
        .paged()
        .fill(&key, &spec, &rows[..3])
        .await
        .expect("Failed to fill head page");
    layer
        .paged()
        .fill(&key, &spec, &rows[3..])
        .await
        .expect("Failed to fill tail page");

    let first = match layer
        .paged()
        .read_page(&key, &spec, &Cursor::Start)
        .await
        .expect("Failed to read head page")
    {
        PageLookup::Hit(page) => page,
        PageLookup::Miss => panic!("head page should be cached"),
    };
    assert_eq!(first.members(), vec!["c4", "c3", "c2"]);
    assert!(!first.is_end);

    let next = first.next.expect("Missing cursor");
    match layer
        .paged()
        .read_page(&key, &spec, &next)
        .await
        .expect("Failed to read tail page")
    {
        PageLookup::Hit(page) => {
            assert_eq!(page.members(), vec!["c1", "c0"]);
            assert!(page.is_end);
        }
        PageLookup::Miss => panic!("tail page should be cached"),
    }

    clear(layer.store(), &[key]).await;
    layer.shutdown().await;
}

#[tokio::test]
#[ignore] // Requires Redis server
async fn test_membership_and_views() {
    let layer = connect().await;
    let likes = CacheKey::user_like("itest-user");
    let views = CacheKey::artwork_view("itest-artwork");
    clear(layer.store(), &[likes.clone(), views.clone()]).await;

    assert_eq!(
        layer.lists().contains(&likes, "a1").await.expect("Failed to check"),
        None
    );
    layer
        .lists()
        .fill(&likes, vec![ScoredMember::new("a1", 1.0), ScoredMember::new("a2", 2.0)])
        .await
        .expect("Failed to fill membership");
    assert_eq!(
        layer.lists().contains(&likes, "a2").await.expect("Failed to check"),
        Some(true)
    );
    assert_eq!(
        layer
            .store()
            .zcount(&likes, ScoreBound::Inclusive(2.0), ScoreBound::PosInf)
            .await
            .expect("Failed to count"),
        1
    );

    for viewer in ["v1", "v2", "v1"] {
        layer
            .views()
            .record_view(ContentKind::Artwork, "itest-artwork", viewer)
            .await
            .expect("Failed to record view");
    }
    assert_eq!(
        layer
            .views()
            .total_views(ContentKind::Artwork, "itest-artwork", 100)
            .await,
        102
    );

    clear(layer.store(), &[likes, views]).await;
    layer.shutdown().await;
}
