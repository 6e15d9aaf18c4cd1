//! Configuration management for Tollgate.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

use crate::error::Result;

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "TOLLGATE";

/// Main configuration for Tollgate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Limiter backend configuration
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Degraded response written on denial
    #[serde(default)]
    pub fallback: FallbackConfig,

    /// Path to the rate limit rules file
    #[serde(default)]
    pub rules_path: Option<String>,
}

/// Which backend decides ALLOW/DENY.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process token buckets, one ceiling per instance
    #[default]
    Local,
    /// Fixed-window counters in a shared Redis store, one global ceiling
    Distributed,
}

/// Limiter backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Selected backend
    #[serde(default)]
    pub backend: BackendKind,

    /// Redis connection URL for the distributed backend
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Maximum number of resident token buckets
    #[serde(default = "default_registry_capacity")]
    pub registry_capacity: usize,

    /// Buckets unused for this long are eligible for eviction
    #[serde(default = "default_bucket_idle_ttl")]
    pub bucket_idle_ttl_secs: u64,

    /// How often the idle bucket sweeper runs; `0` disables it
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            redis_url: default_redis_url(),
            registry_capacity: default_registry_capacity(),
            bucket_idle_ttl_secs: default_bucket_idle_ttl(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl LimiterConfig {
    pub fn bucket_idle_ttl(&self) -> Duration {
        Duration::from_secs(self.bucket_idle_ttl_secs)
    }

    /// Period of the idle bucket sweeper, or `None` when it is disabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/".to_string()
}

fn default_registry_capacity() -> usize {
    10000
}

fn default_bucket_idle_ttl() -> u64 {
    600
}

fn default_sweep_interval() -> u64 {
    60
}

/// Fallback response configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    /// Body written to the caller when a call is suppressed
    #[serde(default = "default_fallback_body")]
    pub body: String,

    /// Content type of the fallback body
    #[serde(default = "default_content_type")]
    pub content_type: String,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            body: default_fallback_body(),
            content_type: default_content_type(),
        }
    }
}

fn default_fallback_body() -> String {
    "Service is busy, please try again later\n".to_string()
}

fn default_content_type() -> String {
    "text/plain;charset=UTF-8".to_string()
}

impl TollgateConfig {
    /// Load configuration from an optional file, overlaid with `TOLLGATE__*`
    /// environment variables (e.g. `TOLLGATE__LIMITER__BACKEND=distributed`).
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path, "Loading configuration file");
            builder = builder.add_source(config::File::with_name(path));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TollgateConfig::default();
        assert_eq!(config.limiter.backend, BackendKind::Local);
        assert_eq!(config.limiter.registry_capacity, 10000);
        assert_eq!(config.limiter.bucket_idle_ttl(), Duration::from_secs(600));
        assert_eq!(config.limiter.sweep_interval(), Some(Duration::from_secs(60)));
        assert_eq!(config.fallback.content_type, "text/plain;charset=UTF-8");
        assert!(config.rules_path.is_none());
    }

    #[test]
    fn test_from_yaml_partial() {
        let yaml = r#"
limiter:
  backend: distributed
  redis_url: redis://cache:6379/
rules_path: /etc/tollgate/rules.yaml
"#;
        let config = TollgateConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.limiter.backend, BackendKind::Distributed);
        assert_eq!(config.limiter.redis_url, "redis://cache:6379/");
        assert_eq!(config.limiter.sweep_interval_secs, 60);
        assert_eq!(config.rules_path.as_deref(), Some("/etc/tollgate/rules.yaml"));
        assert_eq!(config.fallback.body, default_fallback_body());
    }

    #[test]
    fn test_zero_sweep_interval_disables_sweeper() {
        let config = TollgateConfig::from_yaml("limiter:\n  sweep_interval_secs: 0\n").unwrap();
        assert_eq!(config.limiter.sweep_interval(), None);
    }

    #[test]
    fn test_from_yaml_rejects_unknown_backend() {
        let yaml = "limiter:\n  backend: gossip\n";
        assert!(TollgateConfig::from_yaml(yaml).is_err());
    }
}
