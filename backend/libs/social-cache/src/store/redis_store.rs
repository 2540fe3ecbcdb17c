use super::{CacheStore, ScoreBound, ScoredMember, WriteBatch, WriteOp};
use crate::{CacheConfig, CacheError, CacheResult};
use anyhow::Context;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Pipeline};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// Redis-backed store.
///
/// One `ConnectionManager` is shared process-wide. It multiplexes commands
/// and reconnects on its own, so each call works on a cheap clone and no lock
/// guards it.
pub struct RedisStore {
    conn: ConnectionManager,
    op_timeout: Duration,
    closed: AtomicBool,
}

impl RedisStore {
    pub async fn connect(config: &CacheConfig) -> anyhow::Result<Self> {
        let client = Client::open(config.redis_url.as_str())
            .context("failed to parse REDIS_URL connection string")?;
        let conn = tokio::time::timeout(config.op_timeout, ConnectionManager::new(client))
            .await
            .context("timed out initializing Redis connection manager")?
            .context("failed to initialize Redis connection manager")?;

        info!(op_timeout_ms = config.op_timeout.as_millis() as u64, "Redis cache store connected");

        Ok(Self::from_manager(conn, config.op_timeout))
    }

    pub fn from_manager(conn: ConnectionManager, op_timeout: Duration) -> Self {
        Self {
            conn,
            op_timeout,
            closed: AtomicBool::new(false),
        }
    }

    /// Stop accepting work. Calls made afterwards fail as `Unavailable` and
    /// callers fall through to the database.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("Redis cache store closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Bound a store call by the configured timeout
    async fn timed<T, F>(&self, op: &'static str, fut: F) -> CacheResult<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        if self.is_closed() {
            return Err(CacheError::Unavailable("store closed".to_string()));
        }
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result.map_err(CacheError::Redis),
            Err(_) => Err(CacheError::Timeout {
                op,
                after: self.op_timeout,
            }),
        }
    }

    fn push_op(pipe: &mut Pipeline, op: &WriteOp) {
        match op {
            WriteOp::Set {
                key,
                value,
                ttl_secs,
            } => {
                pipe.set_ex(key, value, *ttl_secs).ignore();
            }
            WriteOp::Del { key } => {
                pipe.del(key).ignore();
            }
            WriteOp::Expire { key, ttl_secs } => {
                pipe.cmd("EXPIRE").arg(key).arg(*ttl_secs).ignore();
            }
            WriteOp::HSetNx { key, field, value } => {
                pipe.cmd("HSETNX").arg(key).arg(field).arg(*value).ignore();
            }
            WriteOp::HIncrBy { key, field, delta } => {
                pipe.cmd("HINCRBY").arg(key).arg(field).arg(*delta).ignore();
            }
            WriteOp::ZAdd { key, members } => {
                let cmd = pipe.cmd("ZADD").arg(key);
                for m in members {
                    cmd.arg(m.score).arg(&m.member);
                }
                cmd.ignore();
            }
            WriteOp::ZRem { key, members } => {
                pipe.cmd("ZREM").arg(key).arg(members).ignore();
            }
            WriteOp::ZRemRangeByRank { key, start, stop } => {
                pipe.zremrangebyrank(key, *start, *stop).ignore();
            }
            WriteOp::SAdd { key, members } => {
                pipe.cmd("SADD").arg(key).arg(members).ignore();
            }
            WriteOp::SRem { key, members } => {
                pipe.cmd("SREM").arg(key).arg(members).ignore();
            }
        }
    }

    fn scored(pairs: Vec<(String, f64)>) -> Vec<ScoredMember> {
        pairs
            .into_iter()
            .map(|(member, score)| ScoredMember { member, score })
            .collect()
    }
}

#[async_trait::async_trait]
impl CacheStore for RedisStore {
    async fn ping(&self) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let pong: String = self
            .timed("PING", redis::cmd("PING").query_async(&mut conn))
            .await?;
        debug!(reply = %pong, "Redis ping");
        Ok(())
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.conn.clone();
        self.timed("GET", conn.get::<_, Option<String>>(key)).await
    }

    async fn mget(&self, keys: &[String]) -> CacheResult<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        self.timed(
            "MGET",
            redis::cmd("MGET").arg(keys).query_async::<_, Vec<Option<String>>>(&mut conn),
        )
        .await
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.conn.clone();
        self.timed("EXISTS", conn.exists::<_, bool>(key)).await
    }

    async fn apply(&self, batch: &WriteBatch) -> CacheResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        // Plain pipeline, not MULTI: sub-commands keep their order but a
        // failing one leaves the others applied.
        let mut pipe = redis::pipe();
        for op in batch.ops() {
            Self::push_op(&mut pipe, op);
        }

        let mut conn = self.conn.clone();
        self.timed("PIPELINE", pipe.query_async::<_, ()>(&mut conn))
            .await?;

        debug!(count = batch.len(), "Cache pipeline applied");
        Ok(())
    }

    async fn hget_all(&self, key: &str) -> CacheResult<HashMap<String, String>> {
        let mut conn = self.conn.clone();
        self.timed("HGETALL", conn.hgetall::<_, HashMap<String, String>>(key))
            .await
    }

    async fn hget_all_many(&self, keys: &[String]) -> CacheResult<Vec<HashMap<String, String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.hgetall(key);
        }
        let mut conn = self.conn.clone();
        self.timed(
            "HGETALL",
            pipe.query_async::<_, Vec<HashMap<String, String>>>(&mut conn),
        )
        .await
    }

    async fn hincr_by(&self, key: &str, field: &str, delta: i64, ttl_secs: u64) -> CacheResult<i64> {
        let mut pipe = redis::pipe();
        pipe.cmd("HINCRBY")
            .arg(key)
            .arg(field)
            .arg(delta)
            .cmd("EXPIRE")
            .arg(key)
            .arg(ttl_secs)
            .ignore();

        let mut conn = self.conn.clone();
        let (value,): (i64,) = self
            .timed("HINCRBY", pipe.query_async(&mut conn))
            .await?;
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
        let mut conn = self.conn.clone();
        let pairs: Vec<(String, f64)> = self
            .timed(
                "ZRANGEBYSCORE",
                redis::cmd("ZRANGEBYSCORE")
                    .arg(key)
                    .arg(min.to_string())
                    .arg(max.to_string())
                    .arg("WITHSCORES")
                    .arg("LIMIT")
                    .arg(offset)
                    .arg(count)
                    .query_async(&mut conn),
            )
            .await?;
        Ok(Self::scored(pairs))
    }

    async fn zrevrange_by_score(
        &self,
        key: &str,
        max: ScoreBound,
        min: ScoreBound,
        offset: usize,
        count: usize,
    ) -> CacheResult<Vec<ScoredMember>> {
        let mut conn = self.conn.clone();
        let pairs: Vec<(String, f64)> = self
            .timed(
                "ZREVRANGEBYSCORE",
                redis::cmd("ZREVRANGEBYSCORE")
                    .arg(key)
                    .arg(max.to_string())
                    .arg(min.to_string())
                    .arg("WITHSCORES")
                    .arg("LIMIT")
                    .arg(offset)
                    .arg(count)
                    .query_async(&mut conn),
            )
            .await?;
        Ok(Self::scored(pairs))
    }

    async fn zcard(&self, key: &str) -> CacheResult<u64> {
        let mut conn = self.conn.clone();
        self.timed("ZCARD", conn.zcard::<_, u64>(key)).await
    }

    async fn zcount(&self, key: &str, min: ScoreBound, max: ScoreBound) -> CacheResult<u64> {
        let mut conn = self.conn.clone();
        self.timed(
            "ZCOUNT",
            redis::cmd("ZCOUNT")
                .arg(key)
                .arg(min.to_string())
                .arg(max.to_string())
                .query_async::<_, u64>(&mut conn),
        )
        .await
    }

    async fn zscore(&self, key: &str, member: &str) -> CacheResult<Option<f64>> {
        let mut conn = self.conn.clone();
        self.timed("ZSCORE", conn.zscore::<_, _, Option<f64>>(key, member))
            .await
    }

    async fn sismember(&self, key: &str, member: &str) -> CacheResult<bool> {
        let mut conn = self.conn.clone();
        self.timed("SISMEMBER", conn.sismember::<_, _, bool>(key, member))
            .await
    }

    async fn srandmember(&self, key: &str, count: usize) -> CacheResult<Vec<String>> {
        let mut conn = self.conn.clone();
        self.timed(
            "SRANDMEMBER",
            redis::cmd("SRANDMEMBER")
                .arg(key)
                .arg(count)
                .query_async::<_, Vec<String>>(&mut conn),
        )
        .await
    }

    async fn sdiff(&self, keys: &[String]) -> CacheResult<Vec<String>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        self.timed(
            "SDIFF",
            redis::cmd("SDIFF").arg(keys).query_async::<_, Vec<String>>(&mut conn),
        )
        .await
    }

    async fn pfadd(&self, key: &str, elements: &[String]) -> CacheResult<bool> {
        let mut conn = self.conn.clone();
        self.timed(
            "PFADD",
            redis::cmd("PFADD")
                .arg(key)
                .arg(elements)
                .query_async::<_, bool>(&mut conn),
        )
        .await
    }

    async fn pfcount(&self, key: &str) -> CacheResult<u64> {
        let mut conn = self.conn.clone();
        self.timed(
            "PFCOUNT",
            redis::cmd("PFCOUNT").arg(key).query_async::<_, u64>(&mut conn),
        )
        .await
    }

    async fn xadd_capped(
        &self,
        key: &str,
        max_len: usize,
        fields: &[(String, String)],
    ) -> CacheResult<String> {
        let mut cmd = redis::cmd("XADD");
        cmd.arg(key).arg("MAXLEN").arg("~").arg(max_len).arg("*");
        for (field, value) in fields {
            cmd.arg(field).arg(value);
        }
        let mut conn = self.conn.clone();
        self.timed("XADD", cmd.query_async::<_, String>(&mut conn))
            .await
    }
}
