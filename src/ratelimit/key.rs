//! Rate limit key resolution.

use crate::context::RequestCarrier;
use crate::error::{Result, TollgateError};

use super::rules::{Dimension, RateLimitRule};

/// Headers checked, in order, for the client address before the peer address.
pub const CLIENT_IDENTITY_HEADERS: [&str; 3] =
    ["x-forwarded-for", "proxy-client-ip", "wl-proxy-client-ip"];

const UNKNOWN: &str = "unknown";

/// A concrete key identifying one rate limited resource.
///
/// Always non-empty: it is only produced by [`ResolvedKey::resolve`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResolvedKey(String);

impl ResolvedKey {
    /// Derive the key for a call: `rule.prefix` followed by the dimension value.
    ///
    /// Fails with [`TollgateError::InvalidKey`] when the dimension yields nothing.
    pub fn resolve(rule: &RateLimitRule, request: &dyn RequestCarrier) -> Result<Self> {
        let value = match rule.dimension {
            Dimension::Custom => rule.key.clone(),
            Dimension::ClientIdentity => client_identity(request).unwrap_or_default(),
        };

        // A blank key is rejected, but a non-blank one is used exactly as configured.
        if value.trim().is_empty() {
            return Err(TollgateError::InvalidKey(format!(
                "{:?} dimension produced an empty key",
                rule.dimension
            )));
        }

        Ok(Self(format!("{}{}", rule.prefix, value)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResolvedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ResolvedKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Best guess at the originating client address of a request.
pub fn client_identity(request: &dyn RequestCarrier) -> Option<String> {
    CLIENT_IDENTITY_HEADERS
        .iter()
        .filter_map(|name| request.header(name))
        .map(|value| first_hop(&value))
        .chain(std::iter::once(request.peer_address().trim().to_string()))
        .find(|candidate| is_valid_address(candidate))
}

/// `x-forwarded-for` may carry a proxy chain; the client is the first hop.
fn first_hop(value: &str) -> String {
    value.split(',').next().unwrap_or_default().trim().to_string()
}

fn is_valid_address(candidate: &str) -> bool {
    !candidate.is_empty() && !candidate.eq_ignore_ascii_case(UNKNOWN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StaticRequest;

    fn ip_rule() -> RateLimitRule {
        RateLimitRule::new("", 3, 1).with_dimension(Dimension::ClientIdentity)
    }

    #[test]
    fn test_custom_key() {
        let rule = RateLimitRule::new("action", 3, 1);
        let key = ResolvedKey::resolve(&rule, &StaticRequest::new("10.0.0.1")).unwrap();
        assert_eq!(key.as_str(), "limiter:action");
    }

    #[test]
    fn test_custom_key_with_prefix() {
        let rule = RateLimitRule::new("export", 3, 1).with_prefix("reports:");
        let key = ResolvedKey::resolve(&rule, &StaticRequest::default()).unwrap();
        assert_eq!(key.to_string(), "reports:export");
    }

    #[test]
    fn test_empty_custom_key_rejected() {
        let rule = RateLimitRule::new("", 3, 1);
        let err = ResolvedKey::resolve(&rule, &StaticRequest::new("10.0.0.1")).unwrap_err();
        assert!(err.is_invalid_key());

        let rule = RateLimitRule::new("   ", 3, 1);
        assert!(ResolvedKey::resolve(&rule, &StaticRequest::new("10.0.0.1")).is_err());
    }

    #[test]
    fn test_custom_key_used_verbatim() {
        let rule = RateLimitRule::new(" action ", 3, 1);
        let key = ResolvedKey::resolve(&rule, &StaticRequest::new("10.0.0.1")).unwrap();
        assert_eq!(key.as_str(), "limiter: action ");

        let rule = RateLimitRule::new("action", 3, 1);
        let trimmed = ResolvedKey::resolve(&rule, &StaticRequest::default()).unwrap();
        assert_ne!(key, trimmed);
    }

    #[test]
    fn test_forwarded_for_wins() {
        let request = StaticRequest::new("10.0.0.1").with_header("x-forwarded-for", "1.2.3.4");
        let key = ResolvedKey::resolve(&ip_rule(), &request).unwrap();
        assert_eq!(key.as_str(), "limiter:1.2.3.4");
    }

    #[test]
    fn test_forwarded_for_chain_uses_first_hop() {
        let request = StaticRequest::new("10.0.0.1")
            .with_header("x-forwarded-for", "1.2.3.4, 172.16.0.9, 10.0.0.7");
        assert_eq!(client_identity(&request).as_deref(), Some("1.2.3.4"));
    }

    #[test]
    fn test_unknown_headers_fall_through() {
        let request = StaticRequest::new("10.0.0.1")
            .with_header("x-forwarded-for", "UNKNOWN")
            .with_header("proxy-client-ip", "")
            .with_header("wl-proxy-client-ip", "5.6.7.8");
        assert_eq!(client_identity(&request).as_deref(), Some("5.6.7.8"));
    }

    #[test]
    fn test_falls_back_to_peer_address() {
        let request = StaticRequest::new("10.0.0.1").with_header("x-forwarded-for", "unknown");
        let key = ResolvedKey::resolve(&ip_rule(), &request).unwrap();
        assert_eq!(key.as_str(), "limiter:10.0.0.1");
    }

    #[test]
    fn test_no_identity_rejected() {
        let err = ResolvedKey::resolve(&ip_rule(), &StaticRequest::new("")).unwrap_err();
        assert!(matches!(err, TollgateError::InvalidKey(_)));
    }
}
