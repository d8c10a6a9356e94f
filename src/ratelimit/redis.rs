//! Redis-backed counter store shared by every gateway instance.
//!
//! ## Atomicity
//!
//! Increment and expiry run in one Lua script, so concurrent requests for the
//! same key (from any instance) observe a strictly increasing count and the
//! first request of a window always sets the TTL:
//!
//! ```text
//! INCR key
//! if count == 1      → PEXPIRE key window_ms
//! if PTTL key < 0    → PEXPIRE key window_ms   (key left without TTL)
//! return {count, pttl}
//! ```
//!
//! ## Units
//!
//! Redis `PEXPIRE`/`PTTL` speak milliseconds. Windows are converted with
//! [`window_millis`] at this boundary and never passed as seconds.
//!
//! ## Timeouts
//!
//! Increment calls are bounded by the limiter's store timeout. The
//! `ConnectionManager` reconnects transparently after transport errors.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use tracing::{debug, info, warn};

use super::RateLimitKey;
use super::store::{Increment, RateLimitStore, StoreError};

const INCREMENT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
return {count, ttl}
"#;

/// Configuration for the Redis store.
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Connection URL (e.g., "redis://127.0.0.1:6379")
    pub url: String,
    /// Prefix applied to every counter key
    pub key_prefix: String,
    /// Bound on connecting and on health probes
    pub connect_timeout: Duration,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "courtside:ratelimit:".to_string(),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Counter store backed by Redis.
pub struct RedisStore {
    connection: ConnectionManager,
    script: Script,
    config: RedisStoreConfig,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("key_prefix", &self.config.key_prefix)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the URL is invalid or the first
    /// connection cannot be established within `connect_timeout`.
    pub async fn connect(config: RedisStoreConfig) -> Result<Self, StoreError> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| StoreError::Unavailable(format!("invalid Redis URL: {e}")))?;

        let connection = tokio::time::timeout(config.connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| {
                StoreError::Unavailable(format!(
                    "connecting to Redis timed out after {:?}",
                    config.connect_timeout
                ))
            })?
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        info!(key_prefix = %config.key_prefix, "Connected to Redis rate limit store");

        Ok(Self {
            connection,
            script: Script::new(INCREMENT_SCRIPT),
            config,
        })
    }

    fn redis_key(&self, key: &RateLimitKey) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }
}

#[async_trait]
impl RateLimitStore for RedisStore {
    async fn increment(
        &self,
        key: &RateLimitKey,
        window: Duration,
    ) -> Result<Increment, StoreError> {
        let redis_key = self.redis_key(key);
        let mut connection = self.connection.clone();

        let (count, ttl_ms): (i64, i64) = self
            .script
            .key(&redis_key)
            .arg(window_millis(window))
            .invoke_async(&mut connection)
            .await
            .map_err(|e| {
                warn!(error = %e, "Redis increment failed");
                StoreError::Unavailable(e.to_string())
            })?;

        debug!(key = %redis_key, count, ttl_ms, "Redis counter incremented");

        Ok(Increment {
            count: u64::try_from(count).unwrap_or(0),
            is_new_window: count == 1,
            resets_in: u64::try_from(ttl_ms).ok().map(Duration::from_millis),
        })
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }

    async fn is_healthy(&self) -> bool {
        let mut connection = self.connection.clone();
        let ping = async move {
            let pong: redis::RedisResult<String> =
                redis::cmd("PING").query_async(&mut connection).await;
            pong
        };

        matches!(
            tokio::time::timeout(self.config.connect_timeout, ping).await,
            Ok(Ok(_))
        )
    }
}

/// Window length in whole milliseconds, at least 1.
///
/// Sub-millisecond remainders round up so a window is never shortened.
pub fn window_millis(window: Duration) -> u64 {
    let millis = window.as_millis();
    let millis = if window.as_nanos() % 1_000_000 == 0 {
        millis
    } else {
        millis + 1
    };
    u64::try_from(millis).unwrap_or(u64::MAX).max(1)
}
