//! Rate limit interception around arbitrary operations.
//!
//! Each guarded call goes through
//! `resolve key -> decide -> {execute | render fallback}`. The operation is
//! only invoked on ALLOW. Backend failures are treated like DENY.

use std::future::Future;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::context::CallContext;
use crate::error::Result;
use crate::fallback::FallbackRenderer;
use crate::ratelimit::{decide, Decision, RateLimitRule, RateLimiterBackend, ResolvedKey, RuleSet};

/// Why a call was suppressed.
///
/// Only for observability: the caller receives the same fallback either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// The backend denied the call
    RateLimited,
    /// The backend could not decide, so the call was denied
    BackendUnavailable,
}

/// Result of a guarded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The operation ran; this is its output, unchanged
    Completed(T),
    /// The operation did not run and the fallback was rendered
    Suppressed(DenyReason),
}

impl<T> Outcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed(_))
    }

    pub fn into_completed(self) -> Option<T> {
        match self {
            Outcome::Completed(value) => Some(value),
            Outcome::Suppressed(_) => None,
        }
    }
}

/// Enforces rate limit rules around operation invocations.
pub struct RateLimitInterceptor {
    backend: Arc<dyn RateLimiterBackend>,
    renderer: FallbackRenderer,
    rules: RuleSet,
}

impl RateLimitInterceptor {
    /// Create an interceptor deciding with `backend`, with no rules attached.
    pub fn new(backend: Arc<dyn RateLimiterBackend>) -> Self {
        Self {
            backend,
            renderer: FallbackRenderer::default(),
            rules: RuleSet::new(),
        }
    }

    pub fn with_renderer(mut self, renderer: FallbackRenderer) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_rules(mut self, rules: RuleSet) -> Self {
        self.rules = rules;
        self
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Run `op` under `rule`.
    ///
    /// Returns `Err` only for an invalid rule or an unresolvable key, before
    /// any backend call.
    /// Errors produced by `op` itself are part of `T` and pass through
    /// untouched. `ctx` is bound as the current call context until this
    /// returns.
    #[instrument(skip(self, ctx, op), fields(key = %rule.key, dimension = ?rule.dimension))]
    pub async fn execute<F, Fut, T>(&self, rule: &RateLimitRule, ctx: CallContext, op: F) -> Result<Outcome<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        ctx.clone().scope(self.guard(rule, &ctx, op)).await
    }

    /// Run `op` under the rule attached to `operation`.
    ///
    /// Operations without a rule run unguarded.
    pub async fn execute_operation<F, Fut, T>(&self, operation: &str, ctx: CallContext, op: F) -> Result<Outcome<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        match self.rules.get(operation) {
            Some(rule) => self.execute(rule, ctx, op).await,
            None => {
                debug!(operation = %operation, "No rate limit rule attached, running unguarded");
                Ok(Outcome::Completed(ctx.scope(op()).await))
            }
        }
    }

    async fn guard<F, Fut, T>(&self, rule: &RateLimitRule, ctx: &CallContext, op: F) -> Result<Outcome<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        rule.validate(&rule.key)?;
        let key = ResolvedKey::resolve(rule, ctx.request())?;

        match decide(rule, &key, self.backend.as_ref()).await {
            Ok(Decision::Allow) => {
                debug!(key = %key, "Call admitted");
                Ok(Outcome::Completed(op().await))
            }
            Ok(Decision::Deny) => {
                self.renderer.render(ctx);
                Ok(Outcome::Suppressed(DenyReason::RateLimited))
            }
            Err(e) => {
                warn!(
                    key = %key,
                    backend = self.backend.name(),
                    error = %e,
                    "Rate limit backend failed, denying call"
                );
                self.renderer.render(ctx);
                Ok(Outcome::Suppressed(DenyReason::BackendUnavailable))
            }
        }
    }
}
