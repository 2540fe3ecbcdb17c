//! Cache store abstraction
//!
//! The layer talks to the shared data store only through [`CacheStore`]. The
//! trait mirrors the Redis commands the layer needs and nothing more, so that
//! the in-process [`MemoryStore`] can stand in for Redis in tests and local
//! development.

mod memory;
mod redis_store;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

use crate::CacheResult;
use std::collections::HashMap;
use std::fmt;

/// One member of a sorted set together with its score
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMember {
    pub member: String,
    pub score: f64,
}

impl ScoredMember {
    pub fn new(member: impl Into<String>, score: f64) -> Self {
        Self {
            member: member.into(),
            score,
        }
    }
}

/// Score bound for range queries (`-inf`, `+inf`, `x` or `(x`)
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreBound {
    NegInf,
    PosInf,
    Inclusive(f64),
    Exclusive(f64),
}

impl ScoreBound {
    /// Whether `score` lies on the allowed side of this bound when used as a minimum
    pub fn admits_as_min(&self, score: f64) -> bool {
        match *self {
            ScoreBound::NegInf => true,
            ScoreBound::PosInf => false,
            ScoreBound::Inclusive(b) => score >= b,
            ScoreBound::Exclusive(b) => score > b,
        }
    }

    /// Whether `score` lies on the allowed side of this bound when used as a maximum
    pub fn admits_as_max(&self, score: f64) -> bool {
        match *self {
            ScoreBound::NegInf => false,
            ScoreBound::PosInf => true,
            ScoreBound::Inclusive(b) => score <= b,
            ScoreBound::Exclusive(b) => score < b,
        }
    }
}

impl fmt::Display for ScoreBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScoreBound::NegInf => write!(f, "-inf"),
            ScoreBound::PosInf => write!(f, "+inf"),
            ScoreBound::Inclusive(v) => write!(f, "{}", v),
            ScoreBound::Exclusive(v) => write!(f, "({}", v),
        }
    }
}

/// A single write inside a pipelined [`WriteBatch`]
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Set {
        key: String,
        value: String,
        ttl_secs: u64,
    },
    Del {
        key: String,
    },
    Expire {
        key: String,
        ttl_secs: u64,
    },
    HSetNx {
        key: String,
        field: String,
        value: i64,
    },
    HIncrBy {
        key: String,
        field: String,
        delta: i64,
    },
    ZAdd {
        key: String,
        members: Vec<ScoredMember>,
    },
    ZRem {
        key: String,
        members: Vec<String>,
    },
    /// Rank window with Redis semantics: negative indices count from the end
    ZRemRangeByRank {
        key: String,
        start: isize,
        stop: isize,
    },
    SAdd {
        key: String,
        members: Vec<String>,
    },
    SRem {
        key: String,
        members: Vec<String>,
    },
}

impl WriteOp {
    pub fn key(&self) -> &str {
        match self {
            WriteOp::Set { key, .. }
            | WriteOp::Del { key }
            | WriteOp::Expire { key, .. }
            | WriteOp::HSetNx { key, .. }
            | WriteOp::HIncrBy { key, .. }
            | WriteOp::ZAdd { key, .. }
            | WriteOp::ZRem { key, .. }
            | WriteOp::ZRemRangeByRank { key, .. }
            | WriteOp::SAdd { key, .. }
            | WriteOp::SRem { key, .. } => key,
        }
    }

    pub fn command(&self) -> &'static str {
        match self {
            WriteOp::Set { .. } => "SET",
            WriteOp::Del { .. } => "DEL",
            WriteOp::Expire { .. } => "EXPIRE",
            WriteOp::HSetNx { .. } => "HSETNX",
            WriteOp::HIncrBy { .. } => "HINCRBY",
            WriteOp::ZAdd { .. } => "ZADD",
            WriteOp::ZRem { .. } => "ZREM",
            WriteOp::ZRemRangeByRank { .. } => "ZREMRANGEBYRANK",
            WriteOp::SAdd { .. } => "SADD",
            WriteOp::SRem { .. } => "SREM",
        }
    }
}

/// Ordered, non-atomic group of writes sent in one round trip.
///
/// Sub-operations run in the order they were added. A failure of one does not
/// undo the others.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>, ttl_secs: u64) -> &mut Self {
        self.ops.push(WriteOp::Set {
            key: key.into(),
            value: value.into(),
            ttl_secs,
        });
        self
    }

    pub fn del(&mut self, key: impl Into<String>) -> &mut Self {
        self.ops.push(WriteOp::Del { key: key.into() });
        self
    }

    pub fn expire(&mut self, key: impl Into<String>, ttl_secs: u64) -> &mut Self {
        self.ops.push(WriteOp::Expire {
            key: key.into(),
            ttl_secs,
        });
        self
    }

    pub fn hset_nx(&mut self, key: impl Into<String>, field: impl Into<String>, value: i64) -> &mut Self {
        self.ops.push(WriteOp::HSetNx {
            key: key.into(),
            field: field.into(),
            value,
        });
        self
    }

    pub fn hincr_by(&mut self, key: impl Into<String>, field: impl Into<String>, delta: i64) -> &mut Self {
        self.ops.push(WriteOp::HIncrBy {
            key: key.into(),
            field: field.into(),
            delta,
        });
        self
    }

    pub fn zadd(&mut self, key: impl Into<String>, members: Vec<ScoredMember>) -> &mut Self {
        if !members.is_empty() {
            self.ops.push(WriteOp::ZAdd {
                key: key.into(),
                members,
            });
        }
        self
    }

    pub fn zrem(&mut self, key: impl Into<String>, members: Vec<String>) -> &mut Self {
        if !members.is_empty() {
            self.ops.push(WriteOp::ZRem {
                key: key.into(),
                members,
            });
        }
        self
    }

    pub fn zrem_range_by_rank(&mut self, key: impl Into<String>, start: isize, stop: isize) -> &mut Self {
        self.ops.push(WriteOp::ZRemRangeByRank {
            key: key.into(),
            start,
            stop,
        });
        self
    }

    pub fn sadd(&mut self, key: impl Into<String>, members: Vec<String>) -> &mut Self {
        if !members.is_empty() {
            self.ops.push(WriteOp::SAdd {
                key: key.into(),
                members,
            });
        }
        self
    }

    pub fn srem(&mut self, key: impl Into<String>, members: Vec<String>) -> &mut Self {
        if !members.is_empty() {
            self.ops.push(WriteOp::SRem {
                key: key.into(),
                members,
            });
        }
        self
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Distinct keys touched by the batch, in first-touch order
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = Vec::new();
        for op in &self.ops {
            if !keys.iter().any(|k| k == op.key()) {
                keys.push(op.key().to_string());
            }
        }
        keys
    }
}

/// Core store operations used by the cache layer
#[async_trait::async_trait]
pub trait CacheStore: Send + Sync {
    /// Health check round trip
    async fn ping(&self) -> CacheResult<()>;

    /// GET; `None` when the key is absent
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// MGET; one slot per key, in key order
    async fn mget(&self, keys: &[String]) -> CacheResult<Vec<Option<String>>>;

    async fn exists(&self, key: &str) -> CacheResult<bool>;

    /// Run a pipelined batch of writes
    async fn apply(&self, batch: &WriteBatch) -> CacheResult<()>;

    /// HGETALL; empty map when the key is absent
    async fn hget_all(&self, key: &str) -> CacheResult<HashMap<String, String>>;

    /// Pipelined HGETALL for several keys, in key order
    async fn hget_all_many(&self, keys: &[String]) -> CacheResult<Vec<HashMap<String, String>>>;

    /// HINCRBY followed by EXPIRE in one pipeline; returns the new value
    async fn hincr_by(&self, key: &str, field: &str, delta: i64, ttl_secs: u64) -> CacheResult<i64>;

    /// ZRANGEBYSCORE key min max WITHSCORES LIMIT offset count
    async fn zrange_by_score(
        &self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
        offset: usize,
        count: usize,
    ) -> CacheResult<Vec<ScoredMember>>;

    /// ZREVRANGEBYSCORE key max min WITHSCORES LIMIT offset count
    async fn zrevrange_by_score(
        &self,
        key: &str,
        max: ScoreBound,
        min: ScoreBound,
        offset: usize,
        count: usize,
    ) -> CacheResult<Vec<ScoredMember>>;

    async fn zcard(&self, key: &str) -> CacheResult<u64>;

    async fn zcount(&self, key: &str, min: ScoreBound, max: ScoreBound) -> CacheResult<u64>;

    async fn zscore(&self, key: &str, member: &str) -> CacheResult<Option<f64>>;

    async fn sismember(&self, key: &str, member: &str) -> CacheResult<bool>;

    async fn srandmember(&self, key: &str, count: usize) -> CacheResult<Vec<String>>;

    async fn sdiff(&self, keys: &[String]) -> CacheResult<Vec<String>>;

    /// PFADD; true when the estimate changed
    async fn pfadd(&self, key: &str, elements: &[String]) -> CacheResult<bool>;

    async fn pfcount(&self, key: &str) -> CacheResult<u64>;

    /// XADD key MAXLEN ~ max_len * field value ...; returns the entry id
    async fn xadd_capped(
        &self,
        key: &str,
        max_len: usize,
        fields: &[(String, String)],
    ) -> CacheResult<String>;
}
