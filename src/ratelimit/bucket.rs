//! Token bucket used by the local backend.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Burst capacity expressed as seconds of refill.
const MAX_BURST_SECONDS: f64 = 1.0;

#[derive(Debug)]
struct BucketState {
    /// May go negative: a negative balance is tokens already promised to waiters.
    tokens: f64,
    last_refill: Instant,
    last_used: Instant,
}

/// A token bucket refilled continuously at a fixed rate.
///
/// Starts full with one second's worth of tokens (at least one). Refill and
/// debit happen together under one lock, so concurrent callers can never be
/// admitted faster than `capacity + rate * elapsed`.
#[derive(Debug)]
pub struct TokenBucket {
    rate: f64,
    capacity: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a full bucket refilling at `rate_per_second`.
    pub fn new(rate_per_second: f64) -> Self {
        let capacity = (rate_per_second * MAX_BURST_SECONDS).max(1.0);
        let now = Instant::now();

        Self {
            rate: rate_per_second,
            capacity,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: now,
                last_used: now,
            }),
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Take one token, waiting at most `timeout` for it to refill.
    ///
    /// When the token cannot arrive within `timeout` this returns `false`
    /// immediately rather than sleeping first. A zero timeout never waits.
    /// If the returned future is dropped while waiting, the reserved token
    /// stays spent.
    pub async fn try_acquire(&self, timeout: Duration) -> bool {
        let wait = match self.reserve(timeout) {
            Some(wait) => wait,
            None => return false,
        };

        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        true
    }

    /// Debit one token if it is available within `timeout`, returning how
    /// long the caller must wait for it.
    fn reserve(&self, timeout: Duration) -> Option<Duration> {
        let mut state = self.state.lock();
        let now = Instant::now();

        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.capacity);
        state.last_refill = now;
        state.last_used = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            return Some(Duration::ZERO);
        }

        let missing = 1.0 - state.tokens;
        let wait = Duration::try_from_secs_f64(missing / self.rate).unwrap_or(Duration::MAX);
        if wait > timeout {
            return None;
        }

        state.tokens -= 1.0;
        Some(wait)
    }

    /// Tokens currently available, after refill.
    pub fn available(&self) -> f64 {
        let state = self.state.lock();
        let elapsed = Instant::now()
            .saturating_duration_since(state.last_refill)
            .as_secs_f64();
        (state.tokens + elapsed * self.rate).min(self.capacity)
    }

    /// When the bucket last served an acquisition attempt.
    pub fn last_used(&self) -> Instant {
        self.state.lock().last_used
    }
}
