//! Backend trait for abstracting local and distributed implementations.

use async_trait::async_trait;

use crate::error::Result;

use super::engine::Decision;
use super::key::ResolvedKey;
use super::rules::RateLimitRule;

/// Trait for rate limiter backends.
///
/// This trait abstracts over the local `LocalTokenBucketBackend` and the
/// shared-store `DistributedCounterBackend`, so the interceptor can work with
/// either. A third-party limiter can be plugged in by mapping its own
/// ALLOW/DENY answer onto [`Decision`].
#[async_trait]
pub trait RateLimiterBackend: Send + Sync {
    /// Consume one admission for `key` under `rule`.
    ///
    /// Errors mean the backend could not decide; callers treat them as DENY.
    async fn acquire(&self, rule: &RateLimitRule, key: &ResolvedKey) -> Result<Decision>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}
