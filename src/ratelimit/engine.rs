//! Rate decision: ALLOW or DENY for one call.

use tracing::{debug, trace};

use crate::error::Result;

use super::backend::RateLimiterBackend;
use super::key::ResolvedKey;
use super::rules::RateLimitRule;

/// Outcome of a rate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    /// Fixed-window rule: the `count`-th call in a window is allowed iff
    /// `count <= limit`.
    pub fn from_count(count: u64, limit: u64) -> Self {
        if count <= limit {
            Decision::Allow
        } else {
            Decision::Deny
        }
    }

    pub fn from_acquired(acquired: bool) -> Self {
        if acquired {
            Decision::Allow
        } else {
            Decision::Deny
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// Ask `backend` for a decision on `key`.
///
/// No retries happen here; a backend error is returned as-is for the caller
/// to apply its failure policy.
pub async fn decide(
    rule: &RateLimitRule,
    key: &ResolvedKey,
    backend: &dyn RateLimiterBackend,
) -> Result<Decision> {
    trace!(key = %key, backend = backend.name(), "Checking rate limit");

    let decision = backend.acquire(rule, key).await?;

    if decision == Decision::Deny {
        debug!(
            key = %key,
            backend = backend.name(),
            limit = rule.limit,
            window_secs = rule.window_secs,
            "Rate limit exceeded"
        );
    }

    Ok(decision)
}
