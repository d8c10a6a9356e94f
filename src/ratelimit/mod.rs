//! Fixed-window rate limiting per client per endpoint.
//!
//! # Layout
//!
//! ```text
//! RateLimiter (policy: key building, admit/deny, failure mode)
//!      │
//!      ▼
//! dyn RateLimitStore ──┬── LocalStore  (DashMap counters with per-entry expiry)
//!                      └── RedisStore  (INCR + PEXPIRE Lua script, shared by instances)
//! ```
//!
//! # Fixed Window Trade-off
//!
//! A window starts on the first request for a key and lasts `window`. Counts
//! are not carried over, so a client may send `max_requests` at the end of one
//! window and `max_requests` again at the start of the next one.

pub mod limiter;
pub mod local;
pub mod redis;
pub mod store;

use std::fmt;
use std::num::NonZeroU32;
use std::time::Duration;

use crate::error::{AppError, AppResult, GatewayError};

pub use limiter::{Decision, DenyReason, FailureMode, RateLimiter};
pub use local::LocalStore;
pub use redis::{RedisStore, RedisStoreConfig};
pub use store::{Increment, RateLimitStore, StoreError};

/// Separator between the client identity and endpoint in a rendered key.
pub const KEY_SEPARATOR: char = ':';

/// Composite lookup key: one counter per client per endpoint.
///
/// Endpoint paths always start with `/` and identities never contain `/`,
/// so `identity:path` splits unambiguously at the first `:/` even when the
/// identity is an IPv6 address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    client_identity: String,
    endpoint_path: String,
}

impl RateLimitKey {
    /// Build a key, rejecting parts that would make rendered keys collide.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::ClientInput` if the identity is empty or
    /// contains `/`, or if the path does not start with `/`.
    pub fn new(
        client_identity: impl Into<String>,
        endpoint_path: impl Into<String>,
    ) -> Result<Self, GatewayError> {
        let client_identity = client_identity.into();
        let endpoint_path = endpoint_path.into();

        if client_identity.is_empty() || client_identity.contains('/') {
            return Err(GatewayError::bad_request("Client identity could not be determined"));
        }

        if !endpoint_path.starts_with('/') {
            return Err(GatewayError::bad_request("Endpoint path must start with '/'"));
        }

        Ok(Self {
            client_identity,
            endpoint_path,
        })
    }

    pub fn client_identity(&self) -> &str {
        &self.client_identity
    }

    pub fn endpoint_path(&self) -> &str {
        &self.endpoint_path
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{KEY_SEPARATOR}{}",
            self.client_identity, self.endpoint_path
        )
    }
}

/// Limit applied to every key. Immutable for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    max_requests: NonZeroU32,
    window: Duration,
}

impl RateLimitPolicy {
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if either value is zero.
    pub fn new(max_requests: u32, window: Duration) -> AppResult<Self> {
        let max_requests = NonZeroU32::new(max_requests).ok_or_else(|| {
            AppError::ConfigError("maxRequests must be greater than 0".to_string())
        })?;

        if window.is_zero() {
            return Err(AppError::ConfigError(
                "rate limit window must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            max_requests,
            window,
        })
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests.get()
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_key_renders_identity_and_path() {
        let key = RateLimitKey::new("203.0.113.7", "/predict_winner").unwrap();
        assert_eq!(key.to_string(), "203.0.113.7:/predict_winner");
    }

    #[test]
    fn test_ipv6_keys_do_not_collide() {
        // IPv6 identities contain ':', the leading '/' of the path marks the boundary
        let a = RateLimitKey::new("::1", "/a").unwrap();
        let b = RateLimitKey::new("::1:", "/a").unwrap();
        assert_ne!(a, b);
        assert_ne!(a.to_string(), b.to_string());
    }

    #[test]
    fn test_key_rejects_slash_in_identity() {
        assert!(RateLimitKey::new("10.0.0.1/predict", "/x").is_err());
        assert!(RateLimitKey::new("", "/x").is_err());
    }

    #[test]
    fn test_key_rejects_relative_path() {
        assert!(RateLimitKey::new("10.0.0.1", "predict").is_err());
    }

    #[test]
    fn test_policy_rejects_zero_values() {
        assert!(RateLimitPolicy::new(0, Duration::from_secs(60)).is_err());
        assert!(RateLimitPolicy::new(10, Duration::ZERO).is_err());

        let policy = RateLimitPolicy::new(10, Duration::from_secs(60)).unwrap();
        assert_eq!(policy.max_requests(), 10);
        assert_eq!(policy.window(), Duration::from_secs(60));
    }
}
