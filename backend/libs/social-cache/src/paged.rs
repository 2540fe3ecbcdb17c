//! Paginated ordered-set cache
//!
//! Comment and feed lists live in a sorted set keyed by creation time (or any
//! other score in `[0, 2^53)`). Readers page through it with a cursor made of
//! the last score and member they saw. A reserved sentinel member marks that
//! the database has nothing past it, so the tail page can be answered from
//! cache without a database round trip.
//!
//! A list goes through these states:
//!
//! - empty: key absent, every read is a miss
//! - populated: holds pages written from database results
//! - known-end: the sentinel is present, reads reaching it are authoritative
//! - capped: trimming removed the tail (and with it the sentinel)
//!
//! New members go into cached lists only where they cannot hide uncached
//! rows: at the head of a newest-first list, or before the sentinel of an
//! oldest-first list.
//!
//! A page far from the head can be filled before the head page is. Head reads
//! then see the deep page as if it followed directly. The next head fill
//! repairs this.

use crate::coalesce::Coalescer;
use crate::metrics::CacheMetrics;
use crate::store::{CacheStore, ScoreBound, ScoredMember, WriteBatch};
use crate::writer::BackgroundWriter;
use crate::{CacheConfig, CacheError, CacheResult};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Member marking that no rows exist past it
pub const END_SENTINEL: &str = "__end__";

/// Exclusive upper bound for real scores (largest exactly representable integer range)
pub const MAX_SCORE: f64 = 9_007_199_254_740_992.0;

/// Read order of a list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Highest score first (feeds, like lists)
    NewestFirst,
    /// Lowest score first (reply threads)
    OldestFirst,
}

impl Direction {
    /// Score that sorts after every real score when reading in this direction
    pub fn sentinel_score(&self) -> f64 {
        match self {
            Direction::NewestFirst => -1.0,
            Direction::OldestFirst => MAX_SCORE,
        }
    }
}

/// Position in a list
#[derive(Debug, Clone, PartialEq)]
pub enum Cursor {
    Start,
    /// Continue after the given member
    After { score: f64, member: String },
}

impl Cursor {
    pub fn after(member: &ScoredMember) -> Self {
        Cursor::After {
            score: member.score,
            member: member.member.clone(),
        }
    }

    /// Opaque token handed to clients; `None` for the start
    pub fn token(&self) -> Option<String> {
        match self {
            Cursor::Start => None,
            Cursor::After { score, member } => Some(format!("{}:{}", score, member)),
        }
    }

    pub fn parse(token: Option<&str>) -> CacheResult<Self> {
        let Some(token) = token.filter(|t| !t.is_empty()) else {
            return Ok(Cursor::Start);
        };
        let (score, member) = token
            .split_once(':')
            .ok_or_else(|| CacheError::InvalidData(format!("malformed cursor `{}`", token)))?;
        let score = score
            .parse::<f64>()
            .map_err(|_| CacheError::InvalidData(format!("malformed cursor `{}`", token)))?;
        Ok(Cursor::After {
            score,
            member: member.to_string(),
        })
    }

    /// Whether `m` was already handed out on a page ending at this cursor.
    /// Only meaningful for members at the head of a range read from the
    /// cursor's inclusive bound.
    fn covers(&self, m: &ScoredMember, direction: Direction) -> bool {
        match self {
            Cursor::Start => false,
            Cursor::After { score, member } => {
                m.score == *score
                    && match direction {
                        Direction::NewestFirst => m.member >= *member,
                        Direction::OldestFirst => m.member <= *member,
                    }
            }
        }
    }
}

/// Shape and limits of one list family
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ListSpec {
    pub direction: Direction,
    pub page_size: usize,
    pub cap: usize,
    pub ttl_secs: u64,
}

impl ListSpec {
    pub fn new(direction: Direction, ttl_secs: u64, config: &CacheConfig) -> Self {
        Self {
            direction,
            page_size: config.page_size,
            cap: config.list_cap,
            ttl_secs,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_cap(mut self, cap: usize) -> Self {
        self.cap = cap.max(1);
        self
    }

    /// ZREMRANGEBYRANK window that evicts everything past the first `cap`
    /// entries in read order. Empty while the list is within its cap.
    fn excess_ranks(&self) -> (isize, isize) {
        let cap = self.cap as isize;
        match self.direction {
            Direction::NewestFirst => (0, -(cap + 1)),
            Direction::OldestFirst => (cap, -1),
        }
    }
}

/// One page of a list
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub items: Vec<ScoredMember>,
    /// No rows exist past this page
    pub is_end: bool,
    /// Cursor for the following page, absent at the end
    pub next: Option<Cursor>,
}

impl Page {
    fn new(items: Vec<ScoredMember>, is_end: bool) -> Self {
        let next = if is_end {
            None
        } else {
            items.last().map(Cursor::after)
        };
        Self {
            items,
            is_end,
            next,
        }
    }

    pub fn members(&self) -> Vec<String> {
        self.items.iter().map(|m| m.member.clone()).collect()
    }
}

/// Outcome of a cache-only page read
#[derive(Debug, Clone, PartialEq)]
pub enum PageLookup {
    Hit(Page),
    /// Not enough cached rows to answer authoritatively
    Miss,
}

/// Cursor-paginated sorted-set lists
pub struct PagedCache {
    store: Arc<dyn CacheStore>,
    writer: BackgroundWriter,
    coalescer: Coalescer<Vec<ScoredMember>>,
    load_timeout: Duration,
    metrics: CacheMetrics,
}

impl PagedCache {
    pub fn new(
        store: Arc<dyn CacheStore>,
        writer: BackgroundWriter,
        coalesce_window: Duration,
        load_timeout: Duration,
    ) -> Self {
        Self {
            store,
            writer,
            coalescer: Coalescer::new(coalesce_window),
            load_timeout,
            metrics: CacheMetrics::new(),
        }
    }

    async fn range(
        &self,
        key: &str,
        spec: &ListSpec,
        cursor: &Cursor,
        offset: usize,
        count: usize,
    ) -> CacheResult<Vec<ScoredMember>> {
        match (spec.direction, cursor) {
            (Direction::NewestFirst, Cursor::Start) => {
                self.store
                    .zrevrange_by_score(key, ScoreBound::PosInf, ScoreBound::NegInf, offset, count)
                    .await
            }
            (Direction::NewestFirst, Cursor::After { score, .. }) => {
                self.store
                    .zrevrange_by_score(
                        key,
                        ScoreBound::Inclusive(*score),
                        ScoreBound::NegInf,
                        offset,
                        count,
                    )
                    .await
            }
            (Direction::OldestFirst, Cursor::Start) => {
                self.store
                    .zrange_by_score(key, ScoreBound::NegInf, ScoreBound::PosInf, offset, count)
                    .await
            }
            (Direction::OldestFirst, Cursor::After { score, .. }) => {
                self.store
                    .zrange_by_score(
                        key,
                        ScoreBound::Inclusive(*score),
                        ScoreBound::PosInf,
                        offset,
                        count,
                    )
                    .await
            }
        }
    }

    /// Answer a page from cache alone
    pub async fn read_page(&self, key: &str, spec: &ListSpec, cursor: &Cursor) -> CacheResult<PageLookup> {
        let want = spec.page_size + 1;
        let mut kept: Vec<ScoredMember> = Vec::with_capacity(want);
        let mut offset = 0;
        let mut skipping = true;

        // Ties at the cursor score that were already returned are skipped,
        // which may take more than one round trip when there are many.
        loop {
            let need = want - kept.len();
            let batch = self.range(key, spec, cursor, offset, need).await?;
            let fetched = batch.len();
            offset += fetched;

            for m in batch {
                if skipping && cursor.covers(&m, spec.direction) {
                    continue;
                }
                skipping = false;
                kept.push(m);
            }

            if kept.len() >= want || fetched < need {
                break;
            }
        }

        let mut items = Vec::with_capacity(spec.page_size);
        let mut is_end = false;
        for m in kept {
            if m.member == END_SENTINEL {
                is_end = true;
                break;
            }
            if items.len() == spec.page_size {
                break;
            }
            items.push(m);
        }

        if is_end || items.len() == spec.page_size {
            debug!(key = %key, items = items.len(), is_end, "Page cache hit");
            self.metrics.record_hit(key);
            Ok(PageLookup::Hit(Page::new(items, is_end)))
        } else {
            debug!(key = %key, items = items.len(), "Page cache miss");
            self.metrics.record_miss(key);
            Ok(PageLookup::Miss)
        }
    }

    /// Cached page, or a coalesced database load whose rows are written back
    /// in the background. `loader` gets the cursor and the page size and
    /// returns rows in read order.
    pub async fn page_or_load<F, Fut>(
        &self,
        key: &str,
        spec: &ListSpec,
        cursor: Cursor,
        loader: F,
    ) -> CacheResult<Page>
    where
        F: FnOnce(Cursor, usize) -> Fut,
        Fut: Future<Output = anyhow::Result<Vec<ScoredMember>>> + Send + 'static,
    {
        match self.read_page(key, spec, &cursor).await {
            Ok(PageLookup::Hit(page)) => return Ok(page),
            Ok(PageLookup::Miss) => {}
            Err(e) => {
                warn!(key = %key, error = %e, "Page cache read failed, falling back to database");
                self.metrics.record_error(key, e.kind());
                self.metrics.record_fail_open(key);
            }
        }

        let load_key = format!(
            "{}@{}#{}",
            key,
            cursor.token().unwrap_or_default(),
            spec.page_size
        );
        let page_size = spec.page_size;
        let load_cursor = cursor.clone();
        let mut rows = self
            .coalescer
            .run(&load_key, self.load_timeout, move || loader(load_cursor, page_size))
            .await?;
        rows.retain(|m| m.member != END_SENTINEL);
        rows.truncate(page_size);

        let store = Arc::clone(&self.store);
        let owned_key = key.to_string();
        let owned_spec = *spec;
        let written = rows.clone();
        self.writer.submit(format!("fill {}", key), async move {
            fill_list(store.as_ref(), &owned_key, &owned_spec, &written).await
        });

        let is_end = rows.len() < page_size;
        Ok(Page::new(rows, is_end))
    }

    /// Write a database page. A short page also writes the end sentinel.
    pub async fn fill(&self, key: &str, spec: &ListSpec, rows: &[ScoredMember]) -> CacheResult<()> {
        fill_list(self.store.as_ref(), key, spec, rows).await?;
        self.metrics.record_write(key);
        Ok(())
    }

    /// Add a fresh member to a list that is already cached. Absent lists are
    /// left alone so the next read loads them whole, and so are oldest-first
    /// lists whose end is not cached (see [`accepts_push`]).
    pub async fn push(&self, key: &str, spec: &ListSpec, member: ScoredMember) -> CacheResult<bool> {
        if !valid_score(member.score) {
            return Err(CacheError::InvalidData(format!(
                "score {} outside [0, 2^53)",
                member.score
            )));
        }
        if !accepts_push(self.store.as_ref(), key, spec.direction).await? {
            return Ok(false);
        }

        let mut batch = WriteBatch::new();
        batch.zadd(key, vec![member]).expire(key, spec.ttl_secs);
        trim(&mut batch, key, spec);
        self.store.apply(&batch).await?;
        self.metrics.record_write(key);
        Ok(true)
    }

    pub async fn remove(&self, key: &str, members: Vec<String>) -> CacheResult<()> {
        let mut batch = WriteBatch::new();
        batch.zrem(key, members);
        self.store.apply(&batch).await?;
        self.metrics.record_invalidation(key);
        Ok(())
    }

    pub async fn invalidate(&self, key: &str) -> CacheResult<()> {
        let mut batch = WriteBatch::new();
        batch.del(key);
        self.store.apply(&batch).await?;
        self.metrics.record_invalidation(key);
        Ok(())
    }
}

fn valid_score(score: f64) -> bool {
    (0.0..MAX_SCORE).contains(&score)
}

async fn fill_list(
    store: &dyn CacheStore,
    key: &str,
    spec: &ListSpec,
    rows: &[ScoredMember],
) -> CacheResult<()> {
    let mut members: Vec<ScoredMember> = Vec::with_capacity(rows.len() + 1);
    for row in rows {
        if row.member == END_SENTINEL {
            continue;
        }
        if !valid_score(row.score) {
            warn!(key = %key, member = %row.member, score = row.score, "Skipping row with out-of-range score");
            continue;
        }
        members.push(row.clone());
    }
    if rows.len() < spec.page_size {
        members.push(ScoredMember::new(END_SENTINEL, spec.direction.sentinel_score()));
    }

    let mut batch = WriteBatch::new();
    batch.zadd(key, members).expire(key, spec.ttl_secs);
    trim(&mut batch, key, spec);
    store.apply(&batch).await?;
    debug!(key = %key, rows = rows.len(), "List page filled");
    Ok(())
}

/// Queue the eviction of entries farthest from the head beyond `cap`.
/// The sentinel sorts last, so it is the first to go.
pub(crate) fn trim(batch: &mut WriteBatch, key: &str, spec: &ListSpec) {
    let (start, stop) = spec.excess_ranks();
    batch.zrem_range_by_rank(key, start, stop);
}

/// Whether a new member may be added to the cached list at `key`.
///
/// A newest-first list grows at its head, so any cached list can take it. An
/// oldest-first list grows at its tail: unless the end sentinel is cached,
/// rows between the last cached page and the new member are unknown, and
/// adding it would let a later page read skip them.
pub(crate) async fn accepts_push(
    store: &dyn CacheStore,
    key: &str,
    direction: Direction,
) -> CacheResult<bool> {
    match direction {
        Direction::NewestFirst => store.exists(key).await,
        Direction::OldestFirst => Ok(store.zscore(key, END_SENTINEL).await?.is_some()),
    }
}
