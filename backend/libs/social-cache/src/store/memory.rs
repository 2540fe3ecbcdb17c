//! In-process implementation of [`CacheStore`].
//!
//! Follows Redis semantics for the commands the layer uses: empty collections
//! disappear, TTLs are checked lazily on access, pipelined batches keep going
//! after a failed sub-command. HyperLogLogs are kept as exact sets.

use super::{CacheStore, ScoreBound, ScoredMember, WriteBatch, WriteOp};
use crate::{CacheError, CacheResult};
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy)]
struct Score(f64);

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == CmpOrdering::Equal
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Debug, Default)]
struct SortedSet {
    scores: HashMap<String, f64>,
    ordered: BTreeSet<(Score, String)>,
}

impl SortedSet {
    fn insert(&mut self, member: &str, score: f64) {
        if let Some(old) = self.scores.insert(member.to_string(), score) {
            self.ordered.remove(&(Score(old), member.to_string()));
        }
        self.ordered.insert((Score(score), member.to_string()));
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(old) => {
                self.ordered.remove(&(Score(old), member.to_string()));
                true
            }
            None => false,
        }
    }

    fn len(&self) -> usize {
        self.scores.len()
    }

    fn in_range<'a>(
        &'a self,
        min: ScoreBound,
        max: ScoreBound,
    ) -> impl DoubleEndedIterator<Item = &'a (Score, String)> + 'a {
        self.ordered
            .iter()
            .filter(move |(s, _)| min.admits_as_min(s.0) && max.admits_as_max(s.0))
    }
}

#[derive(Debug)]
enum Value {
    Str(String),
    Hash(HashMap<String, String>),
    ZSet(SortedSet),
    Set(HashSet<String>),
    Hll(HashSet<String>),
    Stream(VecDeque<(String, Vec<(String, String)>)>),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Hash(_) => "hash",
            Value::ZSet(_) => "zset",
            Value::Set(_) => "set",
            Value::Hll(_) => "hyperloglog",
            Value::Stream(_) => "stream",
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Value::Str(_) | Value::Hll(_) | Value::Stream(_) => false,
            Value::Hash(h) => h.is_empty(),
            Value::ZSet(z) => z.len() == 0,
            Value::Set(s) => s.is_empty(),
        }
    }
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

fn wrong_type(key: &str, found: &Value) -> CacheError {
    CacheError::InvalidData(format!(
        "WRONGTYPE operation against key `{}` holding a {}",
        key,
        found.type_name()
    ))
}

/// In-process store with the same observable behavior as Redis for the
/// commands the layer issues.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<HashMap<String, Entry>>,
    unavailable: AtomicBool,
    stream_seq: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail as if the connection were lost
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Remaining time to live, `None` for missing keys and keys without TTL
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let data = self.data.lock();
        let entry = data.get(key)?;
        let now = Instant::now();
        if entry.is_expired(now) {
            return None;
        }
        entry.expires_at.map(|at| at.saturating_duration_since(now))
    }

    /// Number of live keys
    pub fn key_count(&self) -> usize {
        let now = Instant::now();
        self.data
            .lock()
            .values()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    /// Store a raw string without TTL, e.g. to plant a corrupt value in tests
    pub fn put_raw(&self, key: &str, value: &str) {
        self.data
            .lock()
            .insert(key.to_string(), Entry::new(Value::Str(value.to_string())));
    }

    fn check(&self) -> CacheResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }

    /// Run `f` against the live entry for `key`, purging it first if expired
    fn read<T>(&self, key: &str, f: impl FnOnce(Option<&Value>) -> CacheResult<T>) -> CacheResult<T> {
        self.check()?;
        let mut data = self.data.lock();
        purge_expired(&mut data, key);
        f(data.get(key).map(|e| &e.value))
    }

    fn apply_op(data: &mut HashMap<String, Entry>, op: &WriteOp) -> CacheResult<()> {
        let now = Instant::now();
        purge_expired(data, op.key());

        match op {
            WriteOp::Set {
                key,
                value,
                ttl_secs,
            } => {
                data.insert(
                    key.clone(),
                    Entry {
                        value: Value::Str(value.clone()),
                        expires_at: Some(now + Duration::from_secs(*ttl_secs)),
                    },
                );
            }
            WriteOp::Del { key } => {
                data.remove(key);
            }
            WriteOp::Expire { key, ttl_secs } => {
                if let Some(entry) = data.get_mut(key) {
                    entry.expires_at = Some(now + Duration::from_secs(*ttl_secs));
                }
            }
            WriteOp::HSetNx { key, field, value } => {
                let entry = data
                    .entry(key.clone())
                    .or_insert_with(|| Entry::new(Value::Hash(HashMap::new())));
                match &mut entry.value {
                    Value::Hash(hash) => {
                        hash.entry(field.clone()).or_insert_with(|| value.to_string());
                    }
                    other => return Err(wrong_type(key, other)),
                }
            }
            WriteOp::HIncrBy { key, field, delta } => {
                hincr(data, key, field, *delta)?;
            }
            WriteOp::ZAdd { key, members } => {
                let entry = data
                    .entry(key.clone())
                    .or_insert_with(|| Entry::new(Value::ZSet(SortedSet::default())));
                match &mut entry.value {
                    Value::ZSet(zset) => {
                        for m in members {
                            zset.insert(&m.member, m.score);
                        }
                    }
                    other => return Err(wrong_type(key, other)),
                }
            }
            WriteOp::ZRem { key, members } => {
                if let Some(entry) = data.get_mut(key) {
                    match &mut entry.value {
                        Value::ZSet(zset) => {
                            for m in members {
                                zset.remove(m);
                            }
                        }
                        other => return Err(wrong_type(key, other)),
                    }
                }
            }
            WriteOp::ZRemRangeByRank { key, start, stop } => {
                if let Some(entry) = data.get_mut(key) {
                    match &mut entry.value {
                        Value::ZSet(zset) => {
                            remove_rank_window(zset, *start, *stop);
                        }
                        other => return Err(wrong_type(key, other)),
                    }
                }
            }
            WriteOp::SAdd { key, members } => {
                let entry = data
                    .entry(key.clone())
                    .or_insert_with(|| Entry::new(Value::Set(HashSet::new())));
                match &mut entry.value {
                    Value::Set(set) => set.extend(members.iter().cloned()),
                    other => return Err(wrong_type(key, other)),
                }
            }
            WriteOp::SRem { key, members } => {
                if let Some(entry) = data.get_mut(key) {
                    match &mut entry.value {
                        Value::Set(set) => {
                            for m in members {
                                set.remove(m);
                            }
                        }
                        other => return Err(wrong_type(key, other)),
                    }
                }
            }
        }

        drop_if_empty(data, op.key());
        Ok(())
    }
}

fn purge_expired(data: &mut HashMap<String, Entry>, key: &str) {
    let now = Instant::now();
    if data.get(key).map(|e| e.is_expired(now)).unwrap_or(false) {
        data.remove(key);
    }
}

fn drop_if_empty(data: &mut HashMap<String, Entry>, key: &str) {
    if data.get(key).map(|e| e.value.is_empty()).unwrap_or(false) {
        data.remove(key);
    }
}

fn hincr(data: &mut HashMap<String, Entry>, key: &str, field: &str, delta: i64) -> CacheResult<i64> {
    let entry = data
        .entry(key.to_string())
        .or_insert_with(|| Entry::new(Value::Hash(HashMap::new())));
    match &mut entry.value {
        Value::Hash(hash) => {
            let current = match hash.get(field) {
                Some(raw) => raw.parse::<i64>().map_err(|_| {
                    CacheError::InvalidData(format!("hash value `{}` is not an integer", raw))
                })?,
                None => 0,
            };
            let next = current + delta;
            hash.insert(field.to_string(), next.to_string());
            Ok(next)
        }
        other => Err(wrong_type(key, other)),
    }
}

fn remove_rank_window(zset: &mut SortedSet, start: isize, stop: isize) {
    let Some((from, to)) = rank_window(zset.len(), start, stop) else {
        return;
    };
    let doomed: Vec<String> = zset
        .ordered
        .iter()
        .skip(from)
        .take(to - from + 1)
        .map(|(_, m)| m.clone())
        .collect();
    for member in &doomed {
        zset.remove(member);
    }
}

/// Redis rank window (negative indices count from the end), clamped
fn rank_window(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (start + len).max(0) } else { start };
    let stop = if stop < 0 { stop + len } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len || stop < 0 {
        return None;
    }
    Some((start as usize, stop as usize))
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

#[async_trait::async_trait]
impl CacheStore for MemoryStore {
    async fn ping(&self) -> CacheResult<()> {
        self.check()
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.read(key, |value| match value {
            None => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s.clone())),
            Some(other) => Err(wrong_type(key, other)),
        })
    }

    async fn mget(&self, keys: &[String]) -> CacheResult<Vec<Option<String>>> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            // MGET never fails on type mismatch, it yields nil
            out.push(self.read(key, |value| match value {
                Some(Value::Str(s)) => Ok(Some(s.clone())),
                _ => Ok(None),
            })?);
        }
        Ok(out)
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        self.read(key, |value| Ok(value.is_some()))
    }

    async fn apply(&self, batch: &WriteBatch) -> CacheResult<()> {
        self.check()?;
        let mut data = self.data.lock();
        let mut failures = Vec::new();
        for op in batch.ops() {
            if let Err(e) = Self::apply_op(&mut data, op) {
                failures.push(format!("{} {}: {}", op.command(), op.key(), e));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(CacheError::InvalidData(failures.join("; ")))
        }
    }

    async fn hget_all(&self, key: &str) -> CacheResult<HashMap<String, String>> {
        self.read(key, |value| match value {
            None => Ok(HashMap::new()),
            Some(Value::Hash(h)) => Ok(h.clone()),
            Some(other) => Err(wrong_type(key, other)),
        })
    }

    async fn hget_all_many(&self, keys: &[String]) -> CacheResult<Vec<HashMap<String, String>>> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            out.push(self.hget_all(key).await?);
        }
        Ok(out)
    }

    async fn hincr_by(&self, key: &str, field: &str, delta: i64, ttl_secs: u64) -> CacheResult<i64> {
        self.check()?;
        let mut data = self.data.lock();
        purge_expired(&mut data, key);
        let value = hincr(&mut data, key, field, delta)?;
        if let Some(entry) = data.get_mut(key) {
            entry.expires_at = Some(Instant::now() + Duration::from_secs(ttl_secs));
        }
        Ok(value)
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
        offset: usize,
        count: usize,
    ) -> CacheResult<Vec<ScoredMember>> {
        self.read(key, |value| match value {
            None => Ok(Vec::new()),
            Some(Value::ZSet(z)) => Ok(z
                .in_range(min, max)
                .skip(offset)
                .take(count)
                .map(|(s, m)| ScoredMember::new(m.clone(), s.0))
                .collect()),
            Some(other) => Err(wrong_type(key, other)),
        })
    }

    async fn zrevrange_by_score(
        &self,
        key: &str,
        max: ScoreBound,
        min: ScoreBound,
        offset: usize,
        count: usize,
    ) -> CacheResult<Vec<ScoredMember>> {
        self.read(key, |value| match value {
            None => Ok(Vec::new()),
            Some(Value::ZSet(z)) => Ok(z
                .in_range(min, max)
                .rev()
                .skip(offset)
                .take(count)
                .map(|(s, m)| ScoredMember::new(m.clone(), s.0))
                .collect()),
            Some(other) => Err(wrong_type(key, other)),
        })
    }

    async fn zcard(&self, key: &str) -> CacheResult<u64> {
        self.read(key, |value| match value {
            None => Ok(0),
            Some(Value::ZSet(z)) => Ok(z.len() as u64),
            Some(other) => Err(wrong_type(key, other)),
        })
    }

    async fn zcount(&self, key: &str, min: ScoreBound, max: ScoreBound) -> CacheResult<u64> {
        self.read(key, |value| match value {
            None => Ok(0),
            Some(Value::ZSet(z)) => Ok(z.in_range(min, max).count() as u64),
            Some(other) => Err(wrong_type(key, other)),
        })
    }

    async fn zscore(&self, key: &str, member: &str) -> CacheResult<Option<f64>> {
        self.read(key, |value| match value {
            None => Ok(None),
            Some(Value::ZSet(z)) => Ok(z.scores.get(member).copied()),
            Some(other) => Err(wrong_type(key, other)),
        })
    }

    async fn sismember(&self, key: &str, member: &str) -> CacheResult<bool> {
        self.read(key, |value| match value {
            None => Ok(false),
            Some(Value::Set(s)) => Ok(s.contains(member)),
            Some(other) => Err(wrong_type(key, other)),
        })
    }

    async fn srandmember(&self, key: &str, count: usize) -> CacheResult<Vec<String>> {
        self.read(key, |value| match value {
            None => Ok(Vec::new()),
            Some(Value::Set(s)) => {
                let mut members: Vec<String> = s.iter().cloned().collect();
                members.shuffle(&mut rand::thread_rng());
                members.truncate(count);
                Ok(members)
            }
            Some(other) => Err(wrong_type(key, other)),
        })
    }

    async fn sdiff(&self, keys: &[String]) -> CacheResult<Vec<String>> {
        self.check()?;
        let Some((first, rest)) = keys.split_first() else {
            return Ok(Vec::new());
        };
        let mut data = self.data.lock();
        for key in keys {
            purge_expired(&mut data, key);
        }
        let mut result: HashSet<String> = match data.get(first).map(|e| &e.value) {
            None => HashSet::new(),
            Some(Value::Set(s)) => s.clone(),
            Some(other) => return Err(wrong_type(first, other)),
        };
        for key in rest {
            match data.get(key).map(|e| &e.value) {
                None => {}
                Some(Value::Set(s)) => result.retain(|m| !s.contains(m)),
                Some(other) => return Err(wrong_type(key, other)),
            }
        }
        let mut out: Vec<String> = result.into_iter().collect();
        out.sort();
        Ok(out)
    }

    async fn pfadd(&self, key: &str, elements: &[String]) -> CacheResult<bool> {
        self.check()?;
        let mut data = self.data.lock();
        purge_expired(&mut data, key);
        let mut created = false;
        let entry = data.entry(key.to_string()).or_insert_with(|| {
            created = true;
            Entry::new(Value::Hll(HashSet::new()))
        });
        match &mut entry.value {
            Value::Hll(set) => {
                let mut changed = created;
                for element in elements {
                    changed |= set.insert(element.clone());
                }
                Ok(changed)
            }
            other => Err(wrong_type(key, other)),
        }
    }

    async fn pfcount(&self, key: &str) -> CacheResult<u64> {
        self.read(key, |value| match value {
            None => Ok(0),
            Some(Value::Hll(set)) => Ok(set.len() as u64),
            Some(other) => Err(wrong_type(key, other)),
        })
    }

    async fn xadd_capped(
        &self,
        key: &str,
        max_len: usize,
        fields: &[(String, String)],
    ) -> CacheResult<String> {
        self.check()?;
        let id = format!(
            "{}-{}",
            now_millis(),
            self.stream_seq.fetch_add(1, Ordering::SeqCst)
        );
        let mut data = self.data.lock();
        purge_expired(&mut data, key);
        let entry = data
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Stream(VecDeque::new())));
        match &mut entry.value {
            Value::Stream(stream) => {
                stream.push_back((id.clone(), fields.to_vec()));
                while stream.len() > max_len {
                    stream.pop_front();
                }
                Ok(id)
            }
            other => Err(wrong_type(key, other)),
        }
    }
}

impl MemoryStore {
    /// Entries of a stream, oldest first
    pub fn stream_entries(&self, key: &str) -> Vec<(String, Vec<(String, String)>)> {
        match self.data.lock().get(key).map(|e| &e.value) {
            Some(Value::Stream(stream)) => stream.iter().cloned().collect(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_string_set_get_and_ttl() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.set("user:card:1", "{}", 60);
        store.apply(&batch).await.unwrap();

        assert_eq!(store.get("user:card:1").await.unwrap(), Some("{}".to_string()));
        let ttl = store.ttl("user:card:1").unwrap();
        assert!(ttl <= Duration::from_secs(60) && ttl > Duration::from_secs(58));
        assert_eq!(store.get("user:card:2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_hsetnx_does_not_overwrite() {
        let store = MemoryStore::new();
        store.hincr_by("artwork:count:1", "likes", 1, 60).await.unwrap();

        let mut batch = WriteBatch::new();
        batch
            .hset_nx("artwork:count:1", "likes", 10)
            .hset_nx("artwork:count:1", "collects", 4);
        store.apply(&batch).await.unwrap();

        let hash = store.hget_all("artwork:count:1").await.unwrap();
        assert_eq!(hash.get("likes").map(String::as_str), Some("1"));
        assert_eq!(hash.get("collects").map(String::as_str), Some("4"));
    }

    #[tokio::test]
    async fn test_sorted_set_ranges_follow_redis_order() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.zadd(
            "z",
            vec![
                ScoredMember::new("a", 1.0),
                ScoredMember::new("c", 2.0),
                ScoredMember::new("b", 2.0),
                ScoredMember::new("d", 3.0),
            ],
        );
        store.apply(&batch).await.unwrap();

        let asc = store
            .zrange_by_score("z", ScoreBound::Inclusive(2.0), ScoreBound::PosInf, 0, 10)
            .await
            .unwrap();
        let members: Vec<&str> = asc.iter().map(|m| m.member.as_str()).collect();
        assert_eq!(members, vec!["b", "c", "d"]);

        let desc = store
            .zrevrange_by_score("z", ScoreBound::Exclusive(3.0), ScoreBound::NegInf, 1, 2)
            .await
            .unwrap();
        let members: Vec<&str> = desc.iter().map(|m| m.member.as_str()).collect();
        assert_eq!(members, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_zrem_range_by_rank_negative_indices() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.zadd(
            "z",
            (0..5).map(|i| ScoredMember::new(i.to_string(), i as f64)).collect(),
        );
        store.apply(&batch).await.unwrap();

        let mut trim = WriteBatch::new();
        trim.zrem_range_by_rank("z", -2, -1).zrem_range_by_rank("z", 0, 0);
        store.apply(&trim).await.unwrap();
        assert_eq!(store.zcard("z").await.unwrap(), 2);
        assert_eq!(store.zscore("z", "1").await.unwrap(), Some(1.0));
        assert_eq!(store.zscore("z", "4").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_empty_collections_disappear() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.sadd("s", vec!["x".into()]);
        store.apply(&batch).await.unwrap();
        assert!(store.exists("s").await.unwrap());

        let mut batch = WriteBatch::new();
        batch.srem("s", vec!["x".into()]);
        store.apply(&batch).await.unwrap();
        assert!(!store.exists("s").await.unwrap());
    }

    #[tokio::test]
    async fn test_batch_continues_after_failed_op() {
        let store = MemoryStore::new();
        store.put_raw("user:card:1", "plain");

        let mut batch = WriteBatch::new();
        batch
            .hincr_by("user:card:1", "likes", 1)
            .set("user:card:2", "{}", 60);
        let err = store.apply(&batch).await.unwrap_err();

        assert!(err.to_string().contains("HINCRBY user:card:1"));
        assert!(store.exists("user:card:2").await.unwrap());
    }

    #[tokio::test]
    async fn test_unavailable_fails_every_call() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        let err = store.get("k").await.unwrap_err();
        assert!(err.is_store_failure());
        store.set_unavailable(false);
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sdiff_and_hll() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch
            .sadd("a", vec!["1".into(), "2".into(), "3".into()])
            .sadd("b", vec!["2".into()]);
        store.apply(&batch).await.unwrap();
        assert_eq!(
            store.sdiff(&["a".into(), "b".into(), "missing".into()]).await.unwrap(),
            vec!["1".to_string(), "3".to_string()]
        );

        assert!(store.pfadd("h", &["u1".into()]).await.unwrap());
        assert!(!store.pfadd("h", &["u1".into()]).await.unwrap());
        assert_eq!(store.pfcount("h").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stream_is_trimmed() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store
                .xadd_capped("s", 3, &[("n".to_string(), i.to_string())])
                .await
                .unwrap();
        }
        let entries = store.stream_entries("s");
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].1[0].1, "2");
    }

    #[test]
    fn test_expired_keys_are_purged_on_access() {
        let store = MemoryStore::new();
        store.data.lock().insert(
            "user:card:1".to_string(),
            Entry {
                value: Value::Str("{}".to_string()),
                expires_at: Some(Instant::now() - Duration::from_secs(1)),
            },
        );

        let value = tokio_test::assert_ok!(tokio_test::block_on(store.get("user:card:1")));
        assert_eq!(value, None);
        assert_eq!(store.key_count(), 0);
        assert!(store.ttl("user:card:1").is_none());
    }

    #[test]
    fn test_rank_window() {
        assert_eq!(rank_window(5, 0, -1), Some((0, 4)));
        assert_eq!(rank_window(5, -2, -1), Some((3, 4)));
        assert_eq!(rank_window(5, 3, 100), Some((3, 4)));
        assert_eq!(rank_window(5, 4, 2), None);
        assert_eq!(rank_window(0, 0, -1), None);
    }
}
