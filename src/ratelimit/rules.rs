//! Rate limit rules and their attachment to operations.
//!
//! A rules document maps operation names to the policy guarding them:
//!
//! ```yaml
//! rules:
//!   action:
//!     key: action
//!     window_secs: 1
//!     limit: 3
//!   login:
//!     prefix: "login:"
//!     dimension: client_identity
//!     window_secs: 60
//!     limit: 10
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, TollgateError};

/// Where the rate limit key of a call comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    /// The rule's own `key`, verbatim
    #[default]
    Custom,
    /// The calling client's network address
    ClientIdentity,
}

/// An immutable limiting policy attached to one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitRule {
    /// Logical key, used verbatim for the `custom` dimension
    #[serde(default)]
    pub key: String,
    /// Prepended to the dimension value to form the final key
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Calls permitted per window
    #[serde(default = "default_limit")]
    pub limit: u64,
    /// Key derivation basis
    #[serde(default)]
    pub dimension: Dimension,
    /// How long the local backend may wait for a token
    #[serde(default)]
    pub acquire_timeout_ms: u64,
}

fn default_prefix() -> String {
    "limiter:".to_string()
}

fn default_window_secs() -> u64 {
    1
}

fn default_limit() -> u64 {
    3
}

impl RateLimitRule {
    /// Create a `custom`-dimension rule with default prefix and no acquire timeout.
    ///
    /// The rule is not validated here; the interceptor rejects a zero
    /// `limit` or `window_secs` before consulting any backend.
    pub fn new(key: impl Into<String>, limit: u64, window_secs: u64) -> Self {
        Self {
            key: key.into(),
            prefix: default_prefix(),
            window_secs,
            limit,
            dimension: Dimension::Custom,
            acquire_timeout_ms: 0,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_dimension(mut self, dimension: Dimension) -> Self {
        self.dimension = dimension;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// Steady-state refill rate for token bucket backends.
    pub fn rate_per_second(&self) -> f64 {
        self.limit as f64 / self.window_secs as f64
    }

    /// Check the invariants `window_secs > 0` and `limit > 0`.
    pub fn validate(&self, name: &str) -> Result<()> {
        if self.window_secs == 0 {
            return Err(TollgateError::InvalidRule {
                name: name.to_string(),
                reason: "window_secs must be greater than zero".to_string(),
            });
        }
        if self.limit == 0 {
            return Err(TollgateError::InvalidRule {
                name: name.to_string(),
                reason: "limit must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// All rules, indexed by operation name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    rules: BTreeMap<String, RateLimitRule>,
}

impl RuleSet {
    /// Create an empty rule set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load rules from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load and validate rules from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let set: RuleSet = serde_yaml::from_str(yaml)
            .map_err(|e| TollgateError::Config(format!("Failed to parse rate limit rules: {}", e)))?;

        for (name, rule) in &set.rules {
            rule.validate(name)?;
        }

        Ok(set)
    }

    /// Attach a rule to an operation, replacing any previous one.
    pub fn insert(&mut self, operation: impl Into<String>, rule: RateLimitRule) -> Result<()> {
        let operation = operation.into();
        rule.validate(&operation)?;
        self.rules.insert(operation, rule);
        Ok(())
    }

    /// The rule guarding `operation`, if any.
    pub fn get(&self, operation: &str) -> Option<&RateLimitRule> {
        self.rules.get(operation)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RateLimitRule)> {
        self.rules.iter().map(|(name, rule)| (name.as_str(), rule))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rules_with_defaults() {
        let yaml = r#"
rules:
  action:
    key: action
"#;
        let rules = RuleSet::from_yaml(yaml).unwrap();
        let rule = rules.get("action").unwrap();

        assert_eq!(rule.key, "action");
        assert_eq!(rule.prefix, "limiter:");
        assert_eq!(rule.window_secs, 1);
        assert_eq!(rule.limit, 3);
        assert_eq!(rule.dimension, Dimension::Custom);
        assert_eq!(rule.acquire_timeout(), Duration::ZERO);
    }

    #[test]
    fn test_parse_client_identity_rule() {
        let yaml = r#"
rules:
  login:
    prefix: "login:"
    dimension: client_identity
    window_secs: 60
    limit: 10
    acquire_timeout_ms: 250
"#;
        let rules = RuleSet::from_yaml(yaml).unwrap();
        let rule = rules.get("login").unwrap();

        assert_eq!(rule.dimension, Dimension::ClientIdentity);
        assert_eq!(rule.window(), Duration::from_secs(60));
        assert_eq!(rule.acquire_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_zero_window_rejected() {
        let yaml = r#"
rules:
  broken:
    key: broken
    window_secs: 0
"#;
        let err = RuleSet::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, TollgateError::InvalidRule { ref name, .. } if name == "broken"));
    }

    #[test]
    fn test_zero_limit_rejected_on_insert() {
        let mut rules = RuleSet::new();
        let err = rules.insert("op", RateLimitRule::new("op", 0, 1)).unwrap_err();
        assert!(matches!(err, TollgateError::InvalidRule { .. }));
        assert!(rules.is_empty());
    }

    #[test]
    fn test_unknown_operation() {
        let rules = RuleSet::from_yaml("rules: {}").unwrap();
        assert!(rules.get("missing").is_none());
    }

    #[test]
    fn test_rate_per_second() {
        assert_eq!(RateLimitRule::new("a", 10, 5).rate_per_second(), 2.0);
        assert_eq!(RateLimitRule::new("a", 1, 2).rate_per_second(), 0.5);
    }
}
