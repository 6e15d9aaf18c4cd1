//! Distributed rate limiter using fixed-window counters in a shared store.
//!
//! Every service instance increments the same counter for a key, so the
//! limit is a global ceiling. Windows start at a key's first hit and end
//! when the store expires the counter.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::{Result, TollgateError};

use super::backend::RateLimiterBackend;
use super::engine::Decision;
use super::key::ResolvedKey;
use super::rules::RateLimitRule;
use super::store::{RedisStore, SharedStore};

/// A distributed rate limiter backed by a [`SharedStore`].
#[derive(Clone)]
pub struct DistributedCounterBackend {
    store: Arc<dyn SharedStore>,
}

impl std::fmt::Debug for DistributedCounterBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedCounterBackend").finish_non_exhaustive()
    }
}

impl DistributedCounterBackend {
    /// Create a new distributed rate limiter over `store`.
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    /// Connect to Redis at `url` and use it as the shared store.
    pub async fn connect(url: &str) -> Result<Self> {
        let store = RedisStore::connect(url).await?;
        Ok(Self::new(Arc::new(store)))
    }

    /// Atomically count one call against `key` and return the post-increment count.
    ///
    /// Any store failure is reported as [`TollgateError::BackendUnavailable`].
    pub async fn check(&self, key: &ResolvedKey, window: Duration) -> Result<u64> {
        let counted = self
            .store
            .increment(key.as_str(), window)
            .await
            .map_err(|e| match e {
                TollgateError::BackendUnavailable(_) => e,
                other => TollgateError::BackendUnavailable(other.to_string()),
            })?;

        if counted.fresh {
            debug!(key = %key, window = ?window, "Opened new counter window");
        }

        trace!(key = %key, count = counted.count, "Incremented window counter");

        Ok(counted.count)
    }
}

#[async_trait]
impl RateLimiterBackend for DistributedCounterBackend {
    async fn acquire(&self, rule: &RateLimitRule, key: &ResolvedKey) -> Result<Decision> {
        let count = self.check(key, rule.window()).await?;
        Ok(Decision::from_count(count, rule.limit))
    }

    fn name(&self) -> &'static str {
        "distributed"
    }
}
