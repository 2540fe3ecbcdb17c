/// Configuration for the cache layer
///
/// Loads configuration from environment variables.
use anyhow::{Context, Result};
use std::fmt;
use std::time::Duration;

/// Cache layer configuration
#[derive(Clone)]
pub struct CacheConfig {
    /// Redis URL (redis://host:port or rediss://...)
    pub redis_url: String,
    /// Upper bound for a single store round trip
    pub op_timeout: Duration,
    /// Upper bound a caller waits for a database fallback load
    pub load_timeout: Duration,
    /// How long an in-flight fallback load stays joinable
    pub coalesce_window: Duration,
    /// Background writer worker count
    pub writer_workers: usize,
    /// Background writer queue capacity
    pub writer_queue: usize,
    /// Maximum live entries of a paginated list
    pub list_cap: usize,
    /// Default page size for paginated lists
    pub page_size: usize,
}

impl fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConfig")
            .field("redis_url", &"[REDACTED]")
            .field("op_timeout", &self.op_timeout)
            .field("load_timeout", &self.load_timeout)
            .field("coalesce_window", &self.coalesce_window)
            .field("writer_workers", &self.writer_workers)
            .field("writer_queue", &self.writer_queue)
            .field("list_cap", &self.list_cap)
            .field("page_size", &self.page_size)
            .finish()
    }
}

// Default values
const DEFAULT_OP_TIMEOUT_MS: u64 = 3_000;
const DEFAULT_LOAD_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_COALESCE_WINDOW_MS: u64 = 500;
const DEFAULT_WRITER_WORKERS: usize = 4;
const DEFAULT_WRITER_QUEUE: usize = 1024;
const DEFAULT_LIST_CAP: usize = 310;
const DEFAULT_PAGE_SIZE: usize = 20;

impl CacheConfig {
    /// Configuration with defaults for everything but the URL
    pub fn new(redis_url: impl Into<String>) -> Self {
        Self {
            redis_url: redis_url.into(),
            op_timeout: Duration::from_millis(DEFAULT_OP_TIMEOUT_MS),
            load_timeout: Duration::from_millis(DEFAULT_LOAD_TIMEOUT_MS),
            coalesce_window: Duration::from_millis(DEFAULT_COALESCE_WINDOW_MS),
            writer_workers: DEFAULT_WRITER_WORKERS,
            writer_queue: DEFAULT_WRITER_QUEUE,
            list_cap: DEFAULT_LIST_CAP,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let redis_url =
            std::env::var("REDIS_URL").context("REDIS_URL environment variable not set")?;

        Ok(Self {
            redis_url,
            op_timeout: Duration::from_millis(env_or("CACHE_OP_TIMEOUT_MS", DEFAULT_OP_TIMEOUT_MS)),
            load_timeout: Duration::from_millis(env_or(
                "CACHE_LOAD_TIMEOUT_MS",
                DEFAULT_LOAD_TIMEOUT_MS,
            )),
            coalesce_window: Duration::from_millis(env_or(
                "CACHE_COALESCE_WINDOW_MS",
                DEFAULT_COALESCE_WINDOW_MS,
            )),
            writer_workers: env_or("CACHE_WRITER_WORKERS", DEFAULT_WRITER_WORKERS).max(1),
            writer_queue: env_or("CACHE_WRITER_QUEUE", DEFAULT_WRITER_QUEUE).max(1),
            list_cap: env_or("CACHE_LIST_CAP", DEFAULT_LIST_CAP).max(1),
            page_size: env_or("CACHE_PAGE_SIZE", DEFAULT_PAGE_SIZE).max(1),
        })
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 8] = [
        "REDIS_URL",
        "CACHE_OP_TIMEOUT_MS",
        "CACHE_LOAD_TIMEOUT_MS",
        "CACHE_COALESCE_WINDOW_MS",
        "CACHE_WRITER_WORKERS",
        "CACHE_WRITER_QUEUE",
        "CACHE_LIST_CAP",
        "CACHE_PAGE_SIZE",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_default_values() {
        clear_env();
        std::env::set_var("REDIS_URL", "redis://localhost");

        let config = CacheConfig::from_env().unwrap();

        assert_eq!(config.op_timeout, Duration::from_secs(3));
        assert_eq!(config.load_timeout, Duration::from_secs(10));
        assert_eq!(config.coalesce_window, Duration::from_millis(500));
        assert_eq!(config.writer_workers, 4);
        assert_eq!(config.list_cap, 310);
        assert_eq!(config.page_size, 20);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_overrides_and_invalid_values() {
        clear_env();
        std::env::set_var("REDIS_URL", "redis://cache:6379");
        std::env::set_var("CACHE_LIST_CAP", "300");
        std::env::set_var("CACHE_PAGE_SIZE", "not-a-number");
        std::env::set_var("CACHE_WRITER_WORKERS", "0");

        let config = CacheConfig::from_env().unwrap();

        assert_eq!(config.list_cap, 300);
        assert_eq!(config.page_size, 20);
        assert_eq!(config.writer_workers, 1);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_missing_redis_url() {
        clear_env();
        assert!(CacheConfig::from_env().is_err());
    }

    #[test]
    fn test_debug_redacts_url() {
        let config = CacheConfig::new("redis://:secret@cache:6379");
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
