//! Admit/deny policy on top of a counter store.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::store::{Increment, RateLimitStore, StoreError};
use super::{RateLimitKey, RateLimitPolicy};
use crate::error::GatewayError;
use crate::metrics;

/// What to do with a request when the counter store cannot be consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureMode {
    /// Deny (503). Keeps an overloaded upstream protected.
    #[default]
    Closed,
    /// Admit without counting.
    Open,
}

impl FailureMode {
    pub fn from_fail_open(fail_open: bool) -> Self {
        if fail_open { Self::Open } else { Self::Closed }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    RateLimitExceeded,
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Admit {
        /// Requests counted in this window, including this one (0 when failing open)
        count: u64,
        /// Requests left in this window
        remaining: u64,
    },
    Deny {
        reason: DenyReason,
        /// Time until the window resets
        retry_after: Duration,
    },
}

impl Decision {
    pub fn is_admit(&self) -> bool {
        matches!(self, Self::Admit { .. })
    }
}

/// Per-client, per-endpoint fixed-window rate limiter.
///
/// Holds no request state of its own; everything mutable lives in the store.
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    policy: RateLimitPolicy,
    failure_mode: FailureMode,
    store_timeout: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, policy: RateLimitPolicy) -> Self {
        Self {
            store,
            policy,
            failure_mode: FailureMode::default(),
            store_timeout: Duration::from_millis(250),
        }
    }

    pub fn with_failure_mode(mut self, failure_mode: FailureMode) -> Self {
        self.failure_mode = failure_mode;
        self
    }

    /// Bound every store round trip so a slow backend cannot pin a request.
    pub fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<dyn RateLimitStore> {
        &self.store
    }

    /// Count this request against `client_identity` + `endpoint_path`.
    ///
    /// The Nth request of a window is admitted, the (N+1)th is denied.
    ///
    /// # Errors
    ///
    /// - `GatewayError::ClientInput` if the key parts are invalid
    /// - `GatewayError::StoreUnavailable` if the store fails and the limiter fails closed
    pub async fn check(
        &self,
        client_identity: &str,
        endpoint_path: &str,
    ) -> Result<Decision, GatewayError> {
        let key = RateLimitKey::new(client_identity, endpoint_path)?;
        let backend = self.store.backend_name();

        let increment =
            match tokio::time::timeout(self.store_timeout, self.store.increment(&key, self.policy.window()))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(StoreError::Unavailable(format!(
                    "no answer within {:?}",
                    self.store_timeout
                ))),
            };

        match increment {
            Ok(increment) => {
                let decision = self.decide(increment);
                metrics::record_rate_limit_decision(backend, decision.is_admit());
                debug!(key = %key, count = increment.count, admitted = decision.is_admit(), "Rate limit checked");
                Ok(decision)
            }
            Err(e) => {
                metrics::record_store_error(backend);
                match self.failure_mode {
                    FailureMode::Closed => {
                        warn!(backend, error = %e, "Rate limit store failed, denying request");
                        Err(GatewayError::StoreUnavailable(e.to_string()))
                    }
                    FailureMode::Open => {
                        warn!(backend, error = %e, "Rate limit store failed, admitting request uncounted");
                        Ok(Decision::Admit {
                            count: 0,
                            remaining: u64::from(self.policy.max_requests()),
                        })
                    }
                }
            }
        }
    }

    fn decide(&self, increment: Increment) -> Decision {
        let max = u64::from(self.policy.max_requests());

        if increment.count > max {
            Decision::Deny {
                reason: DenyReason::RateLimitExceeded,
                retry_after: increment.resets_in.unwrap_or(self.policy.window()),
            }
        } else {
            Decision::Admit {
                count: increment.count,
                remaining: max - increment.count,
            }
        }
    }
}
