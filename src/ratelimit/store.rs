//! Shared store abstraction for fixed-window counters.
//!
//! The only operation the distributed backend needs is an atomic
//! increment that also starts the window's expiry when the counter is new.

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::Script;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::Result;

/// Increment `KEYS[1]`, starting an `ARGV[1]`-second expiry on the first hit.
///
/// A counter found without an expiry gets one too, so a window interrupted
/// by a crash or a manual write can never become permanent.
const INCREMENT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
local fresh = 0
if count == 1 or redis.call('TTL', KEYS[1]) == -1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
    fresh = 1
end
return {count, fresh}
"#;

/// Result of one atomic increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Counter value after the increment
    pub count: u64,
    /// Whether this increment (re)started the window's expiry
    pub fresh: bool,
}

/// A keyed store offering atomic increment-with-expiry.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Increment the counter at `key` by one as a single indivisible step.
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount>;
}

/// Redis-backed store, running the increment as one server-side script.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    script: Script,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to the Redis server at `url`.
    pub async fn connect(url: &str) -> Result<Self> {
        info!(url = %url, "Connecting to shared store");

        let client = redis::Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;

        Ok(Self {
            connection,
            script: Script::new(INCREMENT_SCRIPT),
        })
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount> {
        let mut connection = self.connection.clone();
        // EXPIRE takes whole seconds; a sub-second window still needs to expire.
        let seconds = window.as_secs().max(1);

        let (count, fresh): (u64, u8) = self
            .script
            .key(key)
            .arg(seconds)
            .invoke_async(&mut connection)
            .await?;

        Ok(WindowCount {
            count,
            fresh: fresh == 1,
        })
    }
}

#[derive(Debug)]
struct Window {
    count: u64,
    expires_at: Instant,
}

/// Default number of resident windows above which expired ones are purged.
const DEFAULT_PURGE_THRESHOLD: usize = 10000;

/// In-process store with the same contract as [`RedisStore`].
///
/// Gives one shared ceiling to every caller holding the same instance, which
/// makes it a stand-in for Redis in single-node deployments and tests.
/// Expired windows are purged on increment once more than the purge
/// threshold are resident, so memory follows the number of live windows.
#[derive(Debug)]
pub struct MemoryStore {
    windows: DashMap<String, Window>,
    purge_threshold: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_purge_threshold(DEFAULT_PURGE_THRESHOLD)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_purge_threshold(purge_threshold: usize) -> Self {
        Self {
            windows: DashMap::new(),
            purge_threshold,
        }
    }

    /// Drop expired windows, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.windows.len();
        let now = Instant::now();
        self.windows.retain(|_, window| window.expires_at > now);

        let purged = before.saturating_sub(self.windows.len());
        if purged > 0 {
            debug!(purged = purged, remaining = self.windows.len(), "Purged expired windows");
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount> {
        // Purge before taking the entry guard: `retain` locks every shard.
        if self.windows.len() > self.purge_threshold {
            self.purge_expired();
        }

        let now = Instant::now();

        // The entry guard holds the shard lock for the whole read-modify-write.
        let mut entry = self.windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            expires_at: now,
        });

        if entry.expires_at <= now {
            entry.count = 0;
        }

        entry.count += 1;
        let fresh = entry.count == 1;
        if fresh {
            entry.expires_at = now + window;
            debug!(key = %key, window = ?window, "Started new window");
        }

        Ok(WindowCount {
            count: entry.count,
            fresh,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_memory_store_counts_within_window() {
        let store = MemoryStore::new();
        let window = Duration::from_secs(1);

        let first = store.increment("k", window).await.unwrap();
        assert_eq!(first, WindowCount { count: 1, fresh: true });

        let second = store.increment("k", window).await.unwrap();
        assert_eq!(second, WindowCount { count: 2, fresh: false });
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_store_resets_after_expiry() {
        let store = MemoryStore::new();
        let window = Duration::from_secs(2);

        store.increment("k", window).await.unwrap();
        store.increment("k", window).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;

        let count = store.increment("k", window).await.unwrap();
        assert_eq!(count, WindowCount { count: 1, fresh: true });
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_store_purge_expired() {
        let store = MemoryStore::new();
        store.increment("short", Duration::from_secs(1)).await.unwrap();
        store.increment("long", Duration::from_secs(10)).await.unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(store.purge_expired(), 1);

        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_store_bounded_by_live_windows() {
        let store = MemoryStore::with_purge_threshold(8);
        let window = Duration::from_secs(1);

        for i in 0..100 {
            store.increment(&format!("client-{}", i), window).await.unwrap();
            tokio::time::advance(Duration::from_millis(500)).await;
            // At most two windows are live at once; the rest expire and are purged.
            assert!(store.len() <= 9, "{} resident windows", store.len());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_store_keeps_live_windows_over_threshold() {
        let store = MemoryStore::with_purge_threshold(2);
        let window = Duration::from_secs(60);

        for i in 0..5 {
            store.increment(&format!("client-{}", i), window).await.unwrap();
        }
        assert_eq!(store.len(), 5);

        let count = store.increment("client-0", window).await.unwrap();
        assert_eq!(count, WindowCount { count: 2, fresh: false });
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_memory_store_concurrent_increments_are_exact() {
        let store = Arc::new(MemoryStore::new());

        let handles: Vec<_> = (0..200)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store.increment("hot", Duration::from_secs(60)).await.unwrap()
                })
            })
            .collect();

        let mut counts: Vec<u64> = Vec::new();
        for handle in handles {
            counts.push(handle.await.unwrap().count);
        }
        counts.sort_unstable();

        assert_eq!(counts, (1..=200).collect::<Vec<_>>());
    }

    /// Requires a running Redis; set `TOLLGATE_TEST_REDIS_URL` and run with `--ignored`.
    #[tokio::test]
    #[ignore]
    async fn test_redis_store_increment() {
        let url = std::env::var("TOLLGATE_TEST_REDIS_URL")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379/".to_string());
        let store = RedisStore::connect(&url).await.unwrap();
        let key = format!("tollgate:test:{}", uuid::Uuid::new_v4());

        let first = store.increment(&key, Duration::from_secs(5)).await.unwrap();
        assert_eq!(first, WindowCount { count: 1, fresh: true });

        let second = store.increment(&key, Duration::from_secs(5)).await.unwrap();
        assert_eq!(second, WindowCount { count: 2, fresh: false });
    }
}
