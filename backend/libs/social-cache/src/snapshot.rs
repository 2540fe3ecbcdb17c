//! Rank snapshots and verification codes
//!
//! Both are plain TTL-bound string values written through the codec.

use crate::codec::Codec;
use crate::model::RankSnapshot;
use crate::{ttl, CacheKey, CacheResult};
use std::fmt;
use tracing::debug;

/// Hot lists computed by out-of-band jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RankKind {
    Artworks,
    Users,
    Tags,
    Topics,
}

impl RankKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RankKind::Artworks => "artwork",
            RankKind::Users => "user",
            RankKind::Tags => "tag",
            RankKind::Topics => "topic",
        }
    }

    pub fn key(&self) -> String {
        CacheKey::rank(self.as_str())
    }
}

impl fmt::Display for RankKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read/write/delete access to rank snapshots; this layer never computes them
#[derive(Clone)]
pub struct RankCache {
    codec: Codec,
}

impl RankCache {
    pub fn new(codec: Codec) -> Self {
        Self { codec }
    }

    pub async fn get(&self, kind: RankKind) -> CacheResult<Option<RankSnapshot>> {
        self.codec.get_json(&kind.key()).await
    }

    pub async fn put(&self, kind: RankKind, snapshot: &RankSnapshot) -> CacheResult<()> {
        debug!(kind = %kind, entries = snapshot.entries.len(), "Storing rank snapshot");
        self.codec.set_json(&kind.key(), snapshot, ttl::RANK).await
    }

    pub async fn invalidate(&self, kind: RankKind) -> CacheResult<()> {
        self.codec.delete(&[kind.key()]).await
    }
}

/// Short-lived one-shot verification codes
#[derive(Clone)]
pub struct VerifyCodes {
    codec: Codec,
}

impl VerifyCodes {
    pub fn new(codec: Codec) -> Self {
        Self { codec }
    }

    /// Store a code for `purpose` (register, login, reset) and `target`
    /// (email or phone), replacing any earlier one
    pub async fn put(&self, purpose: &str, target: &str, code: &str) -> CacheResult<()> {
        let key = CacheKey::verify_code(purpose, target);
        self.codec.set_string(&key, code, ttl::VERIFY_CODE).await
    }

    /// Check a submitted code. A matching code is consumed; a wrong one is
    /// left in place until it expires.
    pub async fn consume(&self, purpose: &str, target: &str, submitted: &str) -> CacheResult<bool> {
        let key = CacheKey::verify_code(purpose, target);
        match self.codec.get_string(&key).await? {
            Some(code) if code == submitted => {
                self.codec.delete(&[key]).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
