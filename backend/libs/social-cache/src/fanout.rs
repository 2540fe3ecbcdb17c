//! Invalidation and fan-out hooks
//!
//! One fact ("user X liked artwork Y") is cached in several places: the
//! content's counter hash, the actor's counters, the actor's membership list
//! and every snapshot that embeds those counts. After the database write
//! succeeds, [`FanOut::apply`] touches each of them in a single pipelined
//! batch. Snapshots are always deleted, never patched.
//!
//! Nothing here is allowed to fail the user action. Counter hashes that
//! cannot be populated skip their increments, list additions only go to lists
//! that are already cached, and a failed batch is logged with all its keys.

use crate::counter::{CounterCache, CounterField, CounterScope};
use crate::metrics::CacheMetrics;
use crate::model::ContentKind;
use crate::snapshot::RankKind;
use crate::paged::{self, ListSpec};
use crate::store::{CacheStore, ScoredMember, WriteBatch};
use crate::writer::BackgroundWriter;
use crate::{ttl, CacheKey};
use std::sync::Arc;
use tracing::{debug, warn};

/// A piece of content and its author
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentRef {
    pub kind: ContentKind,
    pub id: String,
    pub author_id: String,
}

impl ContentRef {
    pub fn new(kind: ContentKind, id: impl Into<String>, author_id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            author_id: author_id.into(),
        }
    }
}

/// A committed write whose cached copies need updating. `active` is false
/// for the undo (unlike, uncollect, unfollow, comment delete).
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Like {
        actor: String,
        content: ContentRef,
        active: bool,
        at_ms: i64,
    },
    Collect {
        actor: String,
        content: ContentRef,
        active: bool,
        at_ms: i64,
    },
    Follow {
        follower: String,
        followee: String,
        active: bool,
        at_ms: i64,
    },
    Comment {
        content: ContentRef,
        comment_id: String,
        /// Root comment for replies, `None` for a root comment
        root_id: Option<String>,
        active: bool,
        at_ms: i64,
    },
    Publish {
        content: ContentRef,
        at_ms: i64,
    },
    Edit {
        content: ContentRef,
    },
    Delete {
        content: ContentRef,
    },
}

impl Mutation {
    pub fn label(&self) -> String {
        match self {
            Mutation::Like { content, active, .. } => {
                format!(
                    "{} {}",
                    if *active { "like" } else { "unlike" },
                    content.kind.detail_key(&content.id)
                )
            }
            Mutation::Collect { content, active, .. } => {
                format!(
                    "{} {}",
                    if *active { "collect" } else { "uncollect" },
                    content.kind.detail_key(&content.id)
                )
            }
            Mutation::Follow {
                follower,
                followee,
                active,
                ..
            } => format!(
                "{} {}->{}",
                if *active { "follow" } else { "unfollow" },
                follower,
                followee
            ),
            Mutation::Comment {
                content,
                comment_id,
                active,
                ..
            } => format!(
                "{} {} on {}",
                if *active { "comment" } else { "uncomment" },
                comment_id,
                content.kind.detail_key(&content.id)
            ),
            Mutation::Publish { content, .. } => {
                format!("publish {}", content.kind.detail_key(&content.id))
            }
            Mutation::Edit { content } => format!("edit {}", content.kind.detail_key(&content.id)),
            Mutation::Delete { content } => {
                format!("delete {}", content.kind.detail_key(&content.id))
            }
        }
    }
}

/// What one fan-out touched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FanOutReport {
    /// Every key of the pipelined batch
    pub keys: Vec<String>,
    /// Counter hashes whose increments were skipped because they could not
    /// be populated
    pub skipped: Vec<String>,
    /// Whether the batch went through without error
    pub applied: bool,
}

struct CounterTouch {
    scope: CounterScope,
    id: String,
    field: CounterField,
    delta: i64,
}

impl CounterTouch {
    fn new(scope: CounterScope, id: &str, field: CounterField, delta: i64) -> Self {
        Self {
            scope,
            id: id.to_string(),
            field,
            delta,
        }
    }
}

/// List additions that only apply when the list is already cached
struct ListAdd {
    key: String,
    member: ScoredMember,
    ttl_secs: u64,
    trim: Option<ListSpec>,
}

/// Everything one mutation does to the cache, before it is checked and sent
#[derive(Default)]
struct Plan {
    counters: Vec<CounterTouch>,
    adds: Vec<ListAdd>,
    removes: Vec<(String, String)>,
    deletes: Vec<String>,
}

impl Plan {
    fn counter(&mut self, scope: CounterScope, id: &str, field: CounterField, delta: i64) {
        self.counters.push(CounterTouch::new(scope, id, field, delta));
    }

    fn membership(&mut self, key: String, member: &str, active: bool, at_ms: i64) {
        if active {
            self.adds.push(ListAdd {
                key,
                member: ScoredMember::new(member, at_ms as f64),
                ttl_secs: ttl::MEMBERSHIP,
                trim: None,
            });
        } else {
            self.removes.push((key, member.to_string()));
        }
    }

    fn delete(&mut self, key: String) {
        if !self.deletes.contains(&key) {
            self.deletes.push(key);
        }
    }

    fn profile_and_card(&mut self, user_id: &str) {
        self.delete(CacheKey::user_profile(user_id));
        self.delete(CacheKey::user_card(user_id));
    }
}

fn delta(active: bool) -> i64 {
    if active {
        1
    } else {
        -1
    }
}

fn authored_field(kind: ContentKind) -> CounterField {
    match kind {
        ContentKind::Artwork => CounterField::Arts,
        ContentKind::Trend => CounterField::Trends,
    }
}

/// Applies mutations to every cached copy they affect
pub struct FanOut {
    store: Arc<dyn CacheStore>,
    counters: Arc<CounterCache>,
    writer: BackgroundWriter,
    root_comments: ListSpec,
    child_comments: ListSpec,
    metrics: CacheMetrics,
}

impl FanOut {
    pub fn new(
        store: Arc<dyn CacheStore>,
        counters: Arc<CounterCache>,
        writer: BackgroundWriter,
        root_comments: ListSpec,
        child_comments: ListSpec,
    ) -> Self {
        Self {
            store,
            counters,
            writer,
            root_comments,
            child_comments,
            metrics: CacheMetrics::new(),
        }
    }

    fn plan(&self, mutation: &Mutation) -> Plan {
        let mut plan = Plan::default();

        match mutation {
            Mutation::Like {
                actor,
                content,
                active,
                at_ms,
            } => {
                let d = delta(*active);
                plan.counter(content.kind.into(), &content.id, CounterField::Likes, d);
                plan.counter(CounterScope::User, actor, CounterField::Likes, d);
                plan.membership(CacheKey::user_like(actor), &content.id, *active, *at_ms);
                plan.delete(content.kind.detail_key(&content.id));
                plan.delete(CacheKey::rank(content.kind.as_str()));
                plan.delete(CacheKey::user_profile(actor));
                plan.profile_and_card(&content.author_id);
            }
            Mutation::Collect {
                actor,
                content,
                active,
                at_ms,
            } => {
                let d = delta(*active);
                plan.counter(content.kind.into(), &content.id, CounterField::Collects, d);
                plan.counter(CounterScope::User, actor, CounterField::Collects, d);
                plan.membership(CacheKey::user_collect(actor), &content.id, *active, *at_ms);
                plan.delete(content.kind.detail_key(&content.id));
                plan.delete(CacheKey::rank(content.kind.as_str()));
                plan.delete(CacheKey::user_profile(actor));
            }
            Mutation::Follow {
                follower,
                followee,
                active,
                at_ms,
            } => {
                let d = delta(*active);
                plan.counter(CounterScope::User, followee, CounterField::Followers, d);
                plan.counter(CounterScope::User, follower, CounterField::Following, d);
                plan.membership(CacheKey::user_follow(follower), followee, *active, *at_ms);
                plan.membership(CacheKey::user_fans(followee), follower, *active, *at_ms);
                plan.profile_and_card(follower);
                plan.profile_and_card(followee);
                plan.delete(RankKind::Users.key());
            }
            Mutation::Comment {
                content,
                comment_id,
                root_id,
                active,
                at_ms,
            } => {
                plan.counter(
                    content.kind.into(),
                    &content.id,
                    CounterField::Comments,
                    delta(*active),
                );
                let (list_key, spec) = match root_id {
                    None => (CacheKey::comment_root_list(&content.id), self.root_comments),
                    Some(root) => (CacheKey::comment_child_list(root), self.child_comments),
                };
                if *active {
                    plan.adds.push(ListAdd {
                        key: list_key,
                        member: ScoredMember::new(comment_id.as_str(), *at_ms as f64),
                        ttl_secs: spec.ttl_secs,
                        trim: Some(spec),
                    });
                } else {
                    plan.removes.push((list_key, comment_id.clone()));
                    if root_id.is_none() {
                        plan.delete(CacheKey::comment_child_list(comment_id));
                    }
                }
                plan.delete(content.kind.detail_key(&content.id));
            }
            Mutation::Publish { content, at_ms } => {
                plan.counter(
                    CounterScope::User,
                    &content.author_id,
                    authored_field(content.kind),
                    1,
                );
                plan.membership(
                    content.kind.author_list_key(&content.author_id),
                    &content.id,
                    true,
                    *at_ms,
                );
                plan.profile_and_card(&content.author_id);
            }
            Mutation::Edit { content } => {
                plan.delete(content.kind.detail_key(&content.id));
            }
            Mutation::Delete { content } => {
                plan.counter(
                    CounterScope::User,
                    &content.author_id,
                    authored_field(content.kind),
                    -1,
                );
                plan.removes
                    .push((content.kind.author_list_key(&content.author_id), content.id.clone()));
                plan.delete(content.kind.detail_key(&content.id));
                plan.delete(content.kind.count_key(&content.id));
                plan.delete(content.kind.view_key(&content.id));
                plan.delete(CacheKey::comment_root_list(&content.id));
                plan.delete(CacheKey::rank(content.kind.as_str()));
                plan.profile_and_card(&content.author_id);
            }
        }

        plan
    }

    /// Bring every cached copy in line with `mutation`. Never fails; the
    /// report says what was touched and what was skipped.
    pub async fn apply(&self, mutation: &Mutation) -> FanOutReport {
        let plan = self.plan(mutation);
        let mut report = FanOutReport::default();
        let mut batch = WriteBatch::new();

        // Populate each counter hash once before incrementing it.
        let mut ready: Vec<String> = Vec::new();
        for touch in &plan.counters {
            let key = touch.scope.key(&touch.id);
            if ready.contains(&key) || report.skipped.contains(&key) {
                continue;
            }
            match self.counters.ensure_populated(touch.scope, &touch.id).await {
                Ok(()) => ready.push(key),
                Err(e) => {
                    warn!(key = %key, error = %e, "Counter population failed, skipping increment");
                    self.metrics.record_error(&key, e.kind());
                    report.skipped.push(key);
                }
            }
        }
        for touch in &plan.counters {
            let key = touch.scope.key(&touch.id);
            if ready.contains(&key) {
                batch
                    .hincr_by(key.as_str(), touch.field.as_str(), touch.delta)
                    .expire(key.as_str(), ttl::COUNTER);
            }
        }

        for add in plan.adds {
            let accepted = match &add.trim {
                Some(spec) => paged::accepts_push(self.store.as_ref(), &add.key, spec.direction).await,
                None => self.store.exists(&add.key).await,
            };
            match accepted {
                Ok(true) => {
                    batch
                        .zadd(add.key.as_str(), vec![add.member])
                        .expire(add.key.as_str(), add.ttl_secs);
                    if let Some(spec) = &add.trim {
                        paged::trim(&mut batch, &add.key, spec);
                    }
                }
                Ok(false) => debug!(key = %add.key, "List not cached up to the new member, skipping add"),
                Err(e) => warn!(key = %add.key, error = %e, "List check failed, skipping add"),
            }
        }
        for (key, member) in plan.removes {
            batch.zrem(key, vec![member]);
        }
        for key in &plan.deletes {
            batch.del(key.as_str());
        }

        report.keys = batch.keys();
        if batch.is_empty() {
            report.applied = true;
            return report;
        }

        match self.store.apply(&batch).await {
            Ok(()) => {
                report.applied = true;
                for key in &plan.deletes {
                    self.metrics.record_invalidation(key);
                }
                debug!(
                    mutation = %mutation.label(),
                    keys = report.keys.len(),
                    "Fan-out applied"
                );
            }
            Err(e) => {
                for key in &report.keys {
                    warn!(
                        mutation = %mutation.label(),
                        key = %key,
                        error = %e,
                        "Fan-out batch failed"
                    );
                    self.metrics.record_error(key, e.kind());
                }
            }
        }

        report
    }

    /// Run [`apply`](Self::apply) on the background writer
    pub fn submit(self: &Arc<Self>, mutation: Mutation) -> bool {
        let fanout = Arc::clone(self);
        self.writer.submit(mutation.label(), async move {
            fanout.apply(&mutation).await;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::CounterSet;
    use crate::paged::Direction;
    use crate::source::CountSource;
    use crate::store::MemoryStore;
    use crate::CacheConfig;
    use std::time::Duration;

    struct Counts;

    #[async_trait::async_trait]
    impl CountSource for Counts {
        async fn load_counts(&self, scope: CounterScope, id: &str) -> anyhow::Result<CounterSet> {
            if id == "broken" {
                anyhow::bail!("counts query failed");
            }
            Ok(match scope {
                CounterScope::User => CounterSet::new()
                    .with(CounterField::Likes, 3)
                    .with(CounterField::Collects, 1)
                    .with(CounterField::Followers, 100)
                    .with(CounterField::Following, 0)
                    .with(CounterField::Arts, 5)
                    .with(CounterField::Trends, 0),
                _ => CounterSet::new()
                    .with(CounterField::Likes, 10)
                    .with(CounterField::Collects, 0)
                    .with(CounterField::Comments, 4)
                    .with(CounterField::Forwards, 0)
                    .with(CounterField::Views, 0),
            })
        }
    }

    fn fanout(store: Arc<MemoryStore>) -> FanOut {
        let config = CacheConfig::new("redis://localhost");
        let counters = Arc::new(CounterCache::new(
            store.clone(),
            Arc::new(Counts),
            Duration::from_millis(500),
            Duration::from_secs(5),
        ));
        FanOut::new(
            store,
            counters,
            BackgroundWriter::new(1, 16),
            ListSpec::new(Direction::NewestFirst, ttl::COMMENT_LIST, &config),
            ListSpec::new(Direction::OldestFirst, ttl::COMMENT_LIST, &config),
        )
    }

    fn artwork() -> ContentRef {
        ContentRef::new(ContentKind::Artwork, "A", "author")
    }

    #[tokio::test]
    async fn test_like_fans_out() {
        let store = Arc::new(MemoryStore::new());
        store.put_raw("artwork:detail:A", "{}");
        store.put_raw("user:profile:author", "{}");
        store.put_raw("rank:artwork", "{}");
        let fanout = fanout(store.clone());

        let report = fanout
            .apply(&Mutation::Like {
                actor: "u1".into(),
                content: artwork(),
                active: true,
                at_ms: 1_700_000_000_000,
            })
            .await;

        assert!(report.applied);
        assert!(report.skipped.is_empty());
        let counts = store.hget_all("artwork:count:A").await.unwrap();
        assert_eq!(counts.get("likes").map(String::as_str), Some("11"));
        let actor = store.hget_all("user:count:u1").await.unwrap();
        assert_eq!(actor.get("likes").map(String::as_str), Some("4"));
        assert!(!store.exists("artwork:detail:A").await.unwrap());
        assert!(!store.exists("user:profile:author").await.unwrap());
        assert!(!store.exists("rank:artwork").await.unwrap());
        // The actor's like list was not cached, so it stays absent.
        assert!(!store.exists("user:like:u1").await.unwrap());
    }

    #[tokio::test]
    async fn test_unlike_removes_from_cached_list() {
        let store = Arc::new(MemoryStore::new());
        let mut seed = WriteBatch::new();
        seed.zadd(
            "user:like:u1",
            vec![ScoredMember::new("A", 1.0), ScoredMember::new("B", 2.0)],
        );
        store.apply(&seed).await.unwrap();
        let fanout = fanout(store.clone());

        fanout
            .apply(&Mutation::Like {
                actor: "u1".into(),
                content: artwork(),
                active: false,
                at_ms: 0,
            })
            .await;
        assert_eq!(store.zscore("user:like:u1", "A").await.unwrap(), None);
        assert_eq!(store.zscore("user:like:u1", "B").await.unwrap(), Some(2.0));
    }

    #[tokio::test]
    async fn test_follow_updates_both_sides() {
        let store = Arc::new(MemoryStore::new());
        let mut seed = WriteBatch::new();
        seed.zadd("user:fans:b", vec![ScoredMember::new("z", 1.0)]);
        store.apply(&seed).await.unwrap();
        store.put_raw("rank:user", "{}");
        let fanout = fanout(store.clone());

        fanout
            .apply(&Mutation::Follow {
                follower: "a".into(),
                followee: "b".into(),
                active: true,
                at_ms: 5,
            })
            .await;

        let followee = store.hget_all("user:count:b").await.unwrap();
        assert_eq!(followee.get("followers").map(String::as_str), Some("101"));
        let follower = store.hget_all("user:count:a").await.unwrap();
        assert_eq!(follower.get("following").map(String::as_str), Some("1"));
        assert_eq!(store.zscore("user:fans:b", "a").await.unwrap(), Some(5.0));
        assert!(!store.exists("user:follow:a").await.unwrap());
        assert!(!store.exists("rank:user").await.unwrap());
    }

    #[tokio::test]
    async fn test_collect_drops_rank_snapshot() {
        let store = Arc::new(MemoryStore::new());
        store.put_raw("rank:trend", "{}");
        let fanout = fanout(store.clone());

        let report = fanout
            .apply(&Mutation::Collect {
                actor: "u1".into(),
                content: ContentRef::new(ContentKind::Trend, "T", "author"),
                active: true,
                at_ms: 1,
            })
            .await;

        assert!(report.applied);
        assert!(!store.exists("rank:trend").await.unwrap());
        let counts = store.hget_all("trend:count:T").await.unwrap();
        assert_eq!(counts.get("collects").map(String::as_str), Some("1"));
    }

    #[tokio::test]
    async fn test_root_comment_delete_drops_replies() {
        let store = Arc::new(MemoryStore::new());
        let mut seed = WriteBatch::new();
        seed.zadd("comment:rootList:A", vec![ScoredMember::new("c1", 1.0)])
            .zadd("comment:childList:c1", vec![ScoredMember::new("r1", 2.0)]);
        store.apply(&seed).await.unwrap();
        let fanout = fanout(store.clone());

        fanout
            .apply(&Mutation::Comment {
                content: artwork(),
                comment_id: "c1".into(),
                root_id: None,
                active: false,
                at_ms: 0,
            })
            .await;

        assert!(!store.exists("comment:rootList:A").await.unwrap());
        assert!(!store.exists("comment:childList:c1").await.unwrap());
        let counts = store.hget_all("artwork:count:A").await.unwrap();
        assert_eq!(counts.get("comments").map(String::as_str), Some("3"));
    }

    #[tokio::test]
    async fn test_population_failure_skips_increment() {
        let store = Arc::new(MemoryStore::new());
        let fanout = fanout(store.clone());

        let report = fanout
            .apply(&Mutation::Like {
                actor: "u1".into(),
                content: ContentRef::new(ContentKind::Artwork, "broken", "author"),
                active: true,
                at_ms: 1,
            })
            .await;

        assert!(report.applied);
        assert_eq!(report.skipped, vec!["artwork:count:broken".to_string()]);
        assert!(!store.exists("artwork:count:broken").await.unwrap());
        let actor = store.hget_all("user:count:u1").await.unwrap();
        assert_eq!(actor.get("likes").map(String::as_str), Some("4"));
    }

    #[tokio::test]
    async fn test_partial_batch_failure_keeps_other_writes() {
        let store = Arc::new(MemoryStore::new());
        store.put_raw("user:like:u1", "corrupt");
        let fanout = fanout(store.clone());

        let report = fanout
            .apply(&Mutation::Like {
                actor: "u1".into(),
                content: artwork(),
                active: true,
                at_ms: 1,
            })
            .await;

        assert!(!report.applied);
        assert!(report.keys.contains(&"user:like:u1".to_string()));
        let actor = store.hget_all("user:count:u1").await.unwrap();
        assert_eq!(actor.get("likes").map(String::as_str), Some("4"));
        let counts = store.hget_all("artwork:count:A").await.unwrap();
        assert_eq!(counts.get("likes").map(String::as_str), Some("11"));
    }

    #[tokio::test]
    async fn test_reply_skips_thread_with_uncached_tail() {
        let store = Arc::new(MemoryStore::new());
        let fanout = fanout(store.clone());
        let thread = ListSpec::new(
            Direction::OldestFirst,
            ttl::COMMENT_LIST,
            &CacheConfig::new("redis://localhost"),
        )
        .with_page_size(3);
        let replies: Vec<ScoredMember> = (1..=4)
            .map(|i| ScoredMember::new(format!("r{}", i), i as f64))
            .collect();

        // First page cached, r4 still only in the database.
        crate::PagedCache::new(
            store.clone(),
            BackgroundWriter::new(1, 4),
            Duration::from_millis(500),
            Duration::from_secs(5),
        )
        .fill("comment:childList:root", &thread, &replies[..3])
        .await
        .unwrap();

        for (id, at) in [("r5", 5), ("r6", 6), ("r7", 7)] {
            fanout
                .apply(&Mutation::Comment {
                    content: artwork(),
                    comment_id: id.into(),
                    root_id: Some("root".into()),
                    active: true,
                    at_ms: at,
                })
                .await;
        }
        assert_eq!(store.zcard("comment:childList:root").await.unwrap(), 3);
        assert_eq!(store.zscore("comment:childList:root", "r5").await.unwrap(), None);

        // With the end cached, the reply is appended before the sentinel.
        let mut seed = WriteBatch::new();
        seed.zadd(
            "comment:childList:root",
            vec![
                replies[3].clone(),
                ScoredMember::new(crate::END_SENTINEL, Direction::OldestFirst.sentinel_score()),
            ],
        );
        store.apply(&seed).await.unwrap();
        fanout
            .apply(&Mutation::Comment {
                content: artwork(),
                comment_id: "r5".into(),
                root_id: Some("root".into()),
                active: true,
                at_ms: 5,
            })
            .await;
        assert_eq!(store.zscore("comment:childList:root", "r5").await.unwrap(), Some(5.0));
    }

    #[tokio::test]
    async fn test_delete_clears_everything() {
        let store = Arc::new(MemoryStore::new());
        store.put_raw("artwork:detail:A", "{}");
        store.put_raw("rank:artwork", "{}");
        store.pfadd("artwork:view:A", &["u".into()]).await.unwrap();
        let fanout = fanout(store.clone());

        let report = fanout.apply(&Mutation::Delete { content: artwork() }).await;

        assert!(report.applied);
        for key in ["artwork:detail:A", "artwork:count:A", "artwork:view:A", "rank:artwork"] {
            assert!(!store.exists(key).await.unwrap(), "{} should be gone", key);
        }
        let author = store.hget_all("user:count:author").await.unwrap();
        assert_eq!(author.get("arts").map(String::as_str), Some("4"));
    }

    #[tokio::test]
    async fn test_store_down_never_panics() {
        let store = Arc::new(MemoryStore::new());
        let fanout = fanout(store.clone());
        store.set_unavailable(true);

        let report = fanout.apply(&Mutation::Edit { content: artwork() }).await;
        assert!(!report.applied);
        assert_eq!(report.keys, vec!["artwork:detail:A".to_string()]);
    }
}
