//! Shared application state for Axum handlers.
//!
//! The state is cloned into every request task. It holds:
//!
//! - **Limiter**: policy plus the injected counter store
//! - **Forwarder**: pooled HTTP client for the upstream
//! - **Audit**: logger with its background file writer
//! - **Configuration**: runtime configuration access
//!
//! # Structured Concurrency
//!
//! Background tasks (local counter pruning) are managed with
//! `tokio_util::task::TaskTracker` and `CancellationToken`. Call `shutdown()`
//! after the server stops to end them and flush the audit log.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::audit::{AuditConfig, AuditError, AuditLogger};
use crate::config::{Config, RateLimitBackend};
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::middleware::TrustedProxyConfig;
use crate::proxy::UpstreamForwarder;
use crate::ratelimit::{
    FailureMode, LocalStore, RateLimitPolicy, RateLimitStore, RateLimiter, RedisStore,
    RedisStoreConfig,
};

/// Shortest interval between local store prune passes.
const MIN_PRUNE_INTERVAL: Duration = Duration::from_secs(1);

/// Shared application state for Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Per-client, per-endpoint rate limiter
    pub limiter: Arc<RateLimiter>,
    /// Upstream HTTP forwarder
    pub forwarder: UpstreamForwarder,
    /// Audit trail for every request
    pub audit: Arc<AuditLogger>,
    /// Proxies whose forwarding headers are believed
    pub trusted_proxies: Arc<TrustedProxyConfig>,
    /// Timestamp when the application started
    pub started_at: Instant,
    /// Tracks spawned background tasks for graceful shutdown
    task_tracker: TaskTracker,
    /// Cancellation token for signaling background tasks to stop
    cancellation_token: CancellationToken,
}

impl AppState {
    /// Build state for the configured rate limit backend.
    ///
    /// With the local backend a background task prunes expired counters once
    /// per window. With the Redis backend the first connection is made here.
    ///
    /// # Errors
    ///
    /// - `AppError::StoreConnect` if Redis is unreachable
    /// - `AppError::ConfigError` for an invalid policy or upstream URL
    /// - `AppError::Io` if the audit log directory cannot be prepared
    pub async fn build(config: Config) -> AppResult<Self> {
        match config.rate_limit_backend {
            RateLimitBackend::Local => {
                let store = Arc::new(LocalStore::new(config.local_store_max_keys));
                let state = Self::with_store(config, store.clone())?;
                state.spawn_prune_task(store);
                Ok(state)
            }
            RateLimitBackend::Redis => {
                let store = RedisStore::connect(RedisStoreConfig {
                    url: config.redis_url.clone(),
                    key_prefix: config.redis_key_prefix.clone(),
                    ..RedisStoreConfig::default()
                })
                .await
                .map_err(|e| AppError::StoreConnect(e.to_string()))?;
                Self::with_store(config, Arc::new(store))
            }
        }
    }

    /// Build state around an already constructed counter store.
    ///
    /// # Errors
    ///
    /// Same as [`AppState::build`], minus store connection errors.
    pub fn with_store(config: Config, store: Arc<dyn RateLimitStore>) -> AppResult<Self> {
        let policy = RateLimitPolicy::new(config.max_requests, config.rate_limit_window)?;
        let limiter = RateLimiter::new(store, policy)
            .with_failure_mode(FailureMode::from_fail_open(config.rate_limit_fail_open))
            .with_store_timeout(config.store_timeout);

        let forwarder = UpstreamForwarder::new(config.upstream_url()?, config.upstream_timeout)?;
        let audit = AuditLogger::new(AuditConfig::from_config(&config)).map_err(|e| match e {
            AuditError::Io(e) => AppError::Io(e),
            other => AppError::Internal(other.to_string()),
        })?;
        let trusted_proxies = TrustedProxyConfig::new(&config.trusted_proxies);

        info!(
            backend = limiter.store().backend_name(),
            max_requests = policy.max_requests(),
            window_secs = policy.window().as_secs_f64(),
            fail_open = config.rate_limit_fail_open,
            upstream = %forwarder.base_url(),
            "Gateway state initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            limiter: Arc::new(limiter),
            forwarder,
            audit: Arc::new(audit),
            trusted_proxies: Arc::new(trusted_proxies),
            started_at: Instant::now(),
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        })
    }

    /// Spawn the task that drops expired local counters.
    fn spawn_prune_task(&self, store: Arc<LocalStore>) {
        let period = self.config.rate_limit_window.max(MIN_PRUNE_INTERVAL);
        let cancel = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            let mut ticker = interval(period);
            ticker.tick().await; // Skip the first immediate tick

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        debug!("Counter prune task received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        store.prune_expired();
                        metrics::set_local_store_keys(store.len());
                    }
                }
            }

            debug!("Counter prune task shutting down");
        });
    }

    /// Whether the counter store currently answers.
    pub async fn is_ready(&self) -> bool {
        self.limiter.store().is_healthy().await
    }

    /// Stop background tasks, then drain and close the audit log.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of background tasks");

        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        self.audit.shutdown().await;

        info!("All background tasks have completed");
    }

    /// Get the application uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
