//! Rate limiting logic and state management.

mod backend;
mod bucket;
mod distributed;
mod engine;
mod key;
mod local;
mod rules;
mod store;

pub use backend::RateLimiterBackend;
pub use bucket::TokenBucket;
pub use distributed::DistributedCounterBackend;
pub use engine::{decide, Decision};
pub use key::{client_identity, ResolvedKey, CLIENT_IDENTITY_HEADERS};
pub use local::LocalTokenBucketBackend;
pub use rules::{Dimension, RateLimitRule, RuleSet};
pub use store::{MemoryStore, RedisStore, SharedStore, WindowCount};
