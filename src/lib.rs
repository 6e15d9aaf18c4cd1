//! Tollgate - Per-Operation Rate Limiting
//!
//! This crate enforces a declared call rate around arbitrary operations. A
//! distributed backend shares fixed-window counters across instances through
//! Redis; a local backend keeps token buckets in process memory. Both sit
//! behind the same interceptor, which resolves the rate limit key, asks the
//! backend for a decision and either runs the operation or writes a fallback
//! response to the caller.

pub mod config;
pub mod context;
pub mod error;
pub mod fallback;
pub mod interceptor;
pub mod ratelimit;

pub use context::{CallContext, RequestCarrier, ResponseCarrier};
pub use error::{Result, TollgateError};
pub use fallback::FallbackRenderer;
pub use interceptor::{DenyReason, Outcome, RateLimitInterceptor};
