//! Local backend: one token bucket per key, in process memory.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace};

use crate::config::LimiterConfig;
use crate::error::Result;

use super::backend::RateLimiterBackend;
use super::bucket::TokenBucket;
use super::engine::Decision;
use super::key::ResolvedKey;
use super::rules::RateLimitRule;

/// Default maximum number of resident buckets.
const DEFAULT_CAPACITY: usize = 10000;
/// Default idle time after which a bucket may be evicted.
const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(600);

/// Per-instance rate limiter keeping a registry of token buckets.
///
/// Buckets are created on first use of a key and shared by every later
/// caller of that key. The registry is bounded: once it grows past its
/// capacity, idle buckets are evicted first and then the least recently
/// used ones.
#[derive(Debug)]
pub struct LocalTokenBucketBackend {
    buckets: DashMap<String, Arc<TokenBucket>>,
    capacity: usize,
    idle_ttl: Duration,
}

impl LocalTokenBucketBackend {
    /// Create a backend with default registry bounds.
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_CAPACITY, DEFAULT_IDLE_TTL)
    }

    pub fn with_limits(capacity: usize, idle_ttl: Duration) -> Self {
        Self {
            buckets: DashMap::new(),
            capacity: capacity.max(1),
            idle_ttl,
        }
    }

    pub fn from_config(config: &LimiterConfig) -> Self {
        Self::with_limits(config.registry_capacity, config.bucket_idle_ttl())
    }

    /// Take one token for `key`, waiting up to `timeout` for a refill.
    pub async fn try_acquire(&self, key: &ResolvedKey, rate_per_second: f64, timeout: Duration) -> bool {
        let bucket = self.bucket(key.as_str(), rate_per_second);
        let acquired = bucket.try_acquire(timeout).await;

        trace!(
            key = %key,
            acquired = acquired,
            available = bucket.available(),
            "Token bucket acquisition"
        );

        acquired
    }

    /// Get or atomically create the bucket for `key`.
    fn bucket(&self, key: &str, rate_per_second: f64) -> Arc<TokenBucket> {
        if let Some(bucket) = self.buckets.get(key).map(|b| b.value().clone()) {
            return bucket;
        }

        let bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| {
                debug!(key = %key, rate = rate_per_second, "Creating token bucket");
                Arc::new(TokenBucket::new(rate_per_second))
            })
            .value()
            .clone();

        if self.buckets.len() > self.capacity {
            self.shrink(key);
        }

        bucket
    }

    /// Run [`evict_idle`](Self::evict_idle) every `every` in a background task.
    ///
    /// `None` or a zero period spawns nothing.
    pub fn spawn_sweeper(self: Arc<Self>, every: Option<Duration>) -> Option<JoinHandle<()>> {
        let Some(every) = every.filter(|period| !period.is_zero()) else {
            info!("Idle token bucket sweeper disabled");
            return None;
        };

        let mut interval = tokio::time::interval(every);
        Some(tokio::spawn(async move {
            loop {
                interval.tick().await;
                self.evict_idle();
            }
        }))
    }

    /// Remove buckets that have not been used within the idle TTL.
    ///
    /// A bucket still referenced by an in-flight acquisition is kept.
    /// Returns the number of buckets evicted.
    pub fn evict_idle(&self) -> usize {
        let before = self.buckets.len();
        let now = Instant::now();
        self.buckets.retain(|_, bucket| {
            Arc::strong_count(bucket) > 1
                || now.saturating_duration_since(bucket.last_used()) < self.idle_ttl
        });

        let evicted = before.saturating_sub(self.buckets.len());
        if evicted > 0 {
            debug!(evicted = evicted, remaining = self.buckets.len(), "Evicted idle token buckets");
        }
        evicted
    }

    /// Bring the registry back under capacity, never evicting `keep` or a
    /// bucket still referenced by an in-flight acquisition.
    fn shrink(&self, keep: &str) {
        self.evict_idle();
        if self.buckets.len() <= self.capacity {
            return;
        }

        // Evict a tenth of the capacity at once so the sort is not repeated on every insert.
        let target = self.capacity - self.capacity / 10;

        let mut by_age: Vec<(String, Instant)> = self
            .buckets
            .iter()
            .filter(|entry| entry.key() != keep && Arc::strong_count(entry.value()) == 1)
            .map(|entry| (entry.key().clone(), entry.value().last_used()))
            .collect();
        by_age.sort_by_key(|(_, last_used)| *last_used);

        let mut excess = self.buckets.len().saturating_sub(target);
        for (key, _) in by_age {
            if excess == 0 {
                break;
            }
            // Re-checked under the shard lock: a caller may have cloned it since the scan.
            if self.buckets.remove_if(&key, |_, bucket| Arc::strong_count(bucket) == 1).is_some() {
                excess -= 1;
            }
        }

        debug!(
            remaining = self.buckets.len(),
            capacity = self.capacity,
            "Evicted least recently used token buckets"
        );
    }

    /// Number of resident buckets.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.buckets.contains_key(key)
    }

    /// Clear all buckets.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.buckets.clear();
    }
}

impl Default for LocalTokenBucketBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateLimiterBackend for LocalTokenBucketBackend {
    async fn acquire(&self, rule: &RateLimitRule, key: &ResolvedKey) -> Result<Decision> {
        let acquired = self
            .try_acquire(key, rule.rate_per_second(), rule.acquire_timeout())
            .await;
        Ok(Decision::from_acquired(acquired))
    }

    fn name(&self) -> &'static str {
        "local"
    }
}
