//! End-to-end consistency scenarios against the in-process store
//!
//! Run with: cargo test -p social-cache --test consistency_test

use social_cache::{
    ttl, BackgroundWriter, CacheConfig, CacheKey, CacheLayer, CacheStore, ContentKind, ContentRef,
    CountSource, CounterField, CounterScope, CounterSet, Cursor, Direction, ListSpec, MemoryStore,
    Mutation, PageLookup, PagedCache, RecordSource, ScoredMember,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

static TRACING: Once = Once::new();

fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Relational counts with a configurable delay, counting every query
struct SlowCounts {
    likes: i64,
    delay: Duration,
    calls: AtomicUsize,
}

impl SlowCounts {
    fn new(likes: i64, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            likes,
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl CountSource for SlowCounts {
    async fn load_counts(&self, _scope: CounterScope, _id: &str) -> anyhow::Result<CounterSet> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(CounterSet::new().with(CounterField::Likes, self.likes))
    }
}

/// User cards keyed by id
struct Cards {
    rows: HashMap<String, String>,
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl RecordSource<String> for Cards {
    async fn fetch_many(&self, ids: &[String]) -> anyhow::Result<HashMap<String, String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ids
            .iter()
            .filter_map(|id| self.rows.get(id).map(|row| (id.clone(), row.clone())))
            .collect())
    }
}

fn layer(store: Arc<MemoryStore>, counts: Arc<dyn CountSource>) -> CacheLayer {
    init_tracing();
    CacheLayer::new(CacheConfig::new("redis://127.0.0.1:6379"), store, counts)
}

/// Root comments as the document store returns them, newest first
fn comment_rows(n: u64) -> Vec<ScoredMember> {
    (0..n)
        .rev()
        .map(|i| ScoredMember::new(format!("comment-{:03}", i), (1_700_000_000_000 + i * 1000) as f64))
        .collect()
}

fn db_page(rows: &[ScoredMember], cursor: &Cursor, page_size: usize) -> Vec<ScoredMember> {
    rows.iter()
        .filter(|row| match cursor {
            Cursor::Start => true,
            Cursor::After { score, member } => {
                row.score < *score || (row.score == *score && row.member < *member)
            }
        })
        .take(page_size)
        .cloned()
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_population_is_idempotent() {
    let store = Arc::new(MemoryStore::new());
    let counts = SlowCounts::new(10, Duration::from_millis(20));
    let layer = layer(store.clone(), counts.clone());
    let counters = Arc::clone(layer.counters());

    let mut handles = Vec::new();
    for _ in 0..20 {
        let counters = Arc::clone(&counters);
        handles.push(tokio::spawn(async move {
            counters
                .ensure_populated(CounterScope::Artwork, "A")
                .await
                .unwrap();
            counters
                .increment(CounterScope::Artwork, "A", CounterField::Likes, 1)
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let cached = counters
        .get(CounterScope::Artwork, "A")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cached.get(CounterField::Likes), 30);
    assert!(counts.calls() <= 2);
}

#[tokio::test]
async fn test_batch_order_is_preserved() {
    let store = Arc::new(MemoryStore::new());
    store.put_raw("user:card:a", "\"card a\"");
    store.put_raw("user:card:c", "\"card c\"");
    let layer = layer(store.clone(), SlowCounts::new(0, Duration::ZERO));

    let cards = Arc::new(Cards {
        rows: HashMap::from([("b".to_string(), "card b".to_string())]),
        calls: AtomicUsize::new(0),
    });
    let reader = layer.read_through::<String>(cards.clone(), CacheKey::user_card, ttl::CARD);

    let ids: Vec<String> = ["a", "b", "c", "gone"].iter().map(|s| s.to_string()).collect();
    let records = reader.load_many(&ids).await.unwrap();
    assert_eq!(records, vec!["card a", "card b", "card c"]);
    assert_eq!(cards.calls.load(Ordering::SeqCst), 1);

    // The recovered record is written back in the background.
    layer.writer().wait_idle().await;
    assert_eq!(
        store.get("user:card:b").await.unwrap().as_deref(),
        Some("\"card b\"")
    );
    assert!(store.get("user:card:gone").await.unwrap().is_none());
}

#[tokio::test]
async fn test_pagination_is_deterministic() {
    let store = Arc::new(MemoryStore::new());
    let layer = layer(store.clone(), SlowCounts::new(0, Duration::ZERO));
    let spec = layer.root_comment_spec();
    assert_eq!(spec.page_size, 20);

    let rows = Arc::new(comment_rows(25));
    let loads = Arc::new(AtomicUsize::new(0));
    let key = CacheKey::comment_root_list("A");

    let mut seen: Vec<String> = Vec::new();
    let mut cursor = Cursor::Start;
    let mut pages = Vec::new();
    loop {
        let rows = Arc::clone(&rows);
        let loads = Arc::clone(&loads);
        let page = layer
            .paged()
            .page_or_load(&key, &spec, cursor.clone(), move |cursor, size| async move {
                loads.fetch_add(1, Ordering::SeqCst);
                Ok(db_page(&rows, &cursor, size))
            })
            .await
            .unwrap();
        layer.writer().wait_idle().await;

        seen.extend(page.members());
        pages.push(page.items.len());
        match page.next {
            Some(next) if !page.is_end => cursor = next,
            _ => break,
        }
    }

    assert_eq!(pages, vec![20, 5]);
    assert_eq!(seen.len(), 25);
    let expected: Vec<String> = rows.iter().map(|r| r.member.clone()).collect();
    assert_eq!(seen, expected);

    // Both pages are now answered from cache alone.
    let first = match layer.paged().read_page(&key, &spec, &Cursor::Start).await.unwrap() {
        PageLookup::Hit(page) => page,
        PageLookup::Miss => panic!("head page should be cached"),
    };
    assert_eq!(first.items.len(), 20);
    assert!(!first.is_end);
    match layer
        .paged()
        .read_page(&key, &spec, first.next.as_ref().unwrap())
        .await
        .unwrap()
    {
        PageLookup::Hit(page) => {
            assert_eq!(page.items.len(), 5);
            assert!(page.is_end);
        }
        PageLookup::Miss => panic!("tail page should be cached"),
    }
    assert_eq!(loads.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_cap_keeps_most_recent_entries() {
    let store = Arc::new(MemoryStore::new());
    let paged = PagedCache::new(
        store.clone(),
        BackgroundWriter::new(1, 8),
        Duration::from_millis(500),
        Duration::from_secs(5),
    );
    let spec = ListSpec::new(
        Direction::NewestFirst,
        ttl::COMMENT_LIST,
        &CacheConfig::new("redis://127.0.0.1:6379"),
    );
    assert_eq!(spec.cap, 310);

    let rows = comment_rows(400);
    for chunk in rows.chunks(spec.page_size) {
        paged.fill("feed", &spec, chunk).await.unwrap();
    }
    assert_eq!(store.zcard("feed").await.unwrap(), 310);

    // Newest 310 survive; the tail (and the end sentinel) is evicted.
    let newest = rows[0].member.clone();
    let oldest_kept = rows[309].member.clone();
    let first_evicted = rows[310].member.clone();
    assert!(store.zscore("feed", &newest).await.unwrap().is_some());
    assert!(store.zscore("feed", &oldest_kept).await.unwrap().is_some());
    assert!(store.zscore("feed", &first_evicted).await.unwrap().is_none());
    assert!(store
        .zscore("feed", social_cache::END_SENTINEL)
        .await
        .unwrap()
        .is_none());

    assert!(paged
        .push("feed", &spec, ScoredMember::new("fresh", 1_800_000_000_000.0))
        .await
        .unwrap());
    assert_eq!(store.zcard("feed").await.unwrap(), 310);
    assert!(store.zscore("feed", &oldest_kept).await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_misses_are_coalesced() {
    let store = Arc::new(MemoryStore::new());
    let counts = SlowCounts::new(42, Duration::from_millis(100));
    let layer = layer(store.clone(), counts.clone());
    let counters = Arc::clone(layer.counters());

    let mut handles = Vec::new();
    for _ in 0..50 {
        let counters = Arc::clone(&counters);
        handles.push(tokio::spawn(async move {
            counters.get_or_load(CounterScope::User, "hot").await
        }));
    }

    for handle in handles {
        match handle.await.unwrap() {
            Ok(counts) => assert_eq!(counts.get(CounterField::Likes), 42),
            Err(e) => assert!(matches!(e, social_cache::CacheError::Timeout { .. })),
        }
    }
    assert!(counts.calls() <= 2, "loader ran {} times", counts.calls());
}

#[tokio::test]
async fn test_reads_fail_open_when_store_is_down() {
    let store = Arc::new(MemoryStore::new());
    let layer = layer(store.clone(), SlowCounts::new(7, Duration::ZERO));
    store.set_unavailable(true);

    let cards = Arc::new(Cards {
        rows: HashMap::from([
            ("a".to_string(), "card a".to_string()),
            ("b".to_string(), "card b".to_string()),
        ]),
        calls: AtomicUsize::new(0),
    });
    let reader = layer.read_through::<String>(cards, CacheKey::user_card, ttl::CARD);
    let records = reader
        .load_many(&["a".to_string(), "b".to_string()])
        .await
        .unwrap();
    assert_eq!(records, vec!["card a", "card b"]);

    let counts = layer
        .counters()
        .get_or_load(CounterScope::Artwork, "A")
        .await
        .unwrap();
    assert_eq!(counts.get(CounterField::Likes), 7);

    let rows = comment_rows(3);
    let page = layer
        .paged()
        .page_or_load(
            &CacheKey::comment_root_list("A"),
            &layer.root_comment_spec(),
            Cursor::Start,
            move |_, _| async move { Ok(rows) },
        )
        .await
        .unwrap();
    assert_eq!(page.items.len(), 3);
    assert!(page.is_end);

    assert_eq!(layer.views().total_views(ContentKind::Artwork, "A", 12).await, 12);

    layer.writer().wait_idle().await;
    layer.shutdown().await;
}

#[tokio::test]
async fn test_first_like_on_uncached_artwork() {
    let store = Arc::new(MemoryStore::new());
    let layer = layer(store.clone(), SlowCounts::new(10, Duration::ZERO));
    assert!(!store.exists(&CacheKey::artwork_count("A")).await.unwrap());

    let report = layer
        .fanout()
        .apply(&Mutation::Like {
            actor: "u1".into(),
            content: ContentRef::new(ContentKind::Artwork, "A", "author"),
            active: true,
            at_ms: 1_700_000_000_000,
        })
        .await;
    assert!(report.applied);

    let counts = layer
        .counters()
        .get(CounterScope::Artwork, "A")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(counts.get(CounterField::Likes), 11);
}

#[tokio::test]
async fn test_submitted_fan_out_runs_in_background() {
    let store = Arc::new(MemoryStore::new());
    let layer = layer(store.clone(), SlowCounts::new(0, Duration::ZERO));
    store.put_raw("trend:detail:T", "{}");

    assert!(layer.fanout().submit(Mutation::Edit {
        content: ContentRef::new(ContentKind::Trend, "T", "author"),
    }));
    layer.writer().wait_idle().await;

    assert!(!store.exists("trend:detail:T").await.unwrap());
    layer.shutdown().await;
}
