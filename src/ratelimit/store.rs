//! Counter store trait shared by the local and Redis backends.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use super::RateLimitKey;

/// Result of one increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Increment {
    /// Count for the key after this increment (1 on the first request of a window).
    pub count: u64,
    /// Whether this increment opened a new window.
    pub is_new_window: bool,
    /// Time left until the window resets, when the backend reports it.
    pub resets_in: Option<Duration>,
}

#[derive(Error, Debug)]
pub enum StoreError {
    /// Backend could not be reached or did not answer in time.
    #[error("rate limit store unavailable: {0}")]
    Unavailable(String),

    /// Local store holds its maximum number of live keys.
    #[error("rate limit store is full ({0} keys)")]
    Capacity(usize),
}

/// Backend holding the per-key counters.
///
/// Implementations must make concurrent increments of the same key
/// linearizable: N concurrent calls observe counts 1..=N in some order.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Increment the counter for `key`, opening a new window of length
    /// `window` if none is live.
    async fn increment(
        &self,
        key: &RateLimitKey,
        window: Duration,
    ) -> Result<Increment, StoreError>;

    /// Short backend name for logs and health output.
    fn backend_name(&self) -> &'static str;

    /// Whether the backend can currently serve increments.
    async fn is_healthy(&self) -> bool {
        true
    }
}
