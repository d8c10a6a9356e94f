//! Gateway configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is loaded from environment variables with sensible defaults
//! for development. In production, configure via environment variables or a `.env` file.
//!
//! # Rate Limiting
//!
//! - `MAX_REQUESTS`: Admitted requests per client per endpoint per window (default: 10)
//! - `WINDOW_SECONDS`: Fixed window length in seconds (default: 60)
//! - `RATE_LIMIT_BACKEND`: `local` (in-process counters) or `redis` (shared counters)
//! - `RATE_LIMIT_FAIL_OPEN`: Admit traffic when the counter store is down (default: false)
//!
//! # Upstream
//!
//! - `UPSTREAM_BASE_URL`: Absolute base URL of the proxied service (default: `http://localhost:8080`)
//! - `UPSTREAM_TIMEOUT_SECS`: Bound on a single forwarded call (default: 10)
//!
//! # Audit Log
//!
//! - `LOG_DIRECTORY`: Directory for the rotated audit files (default: `logs`)
//! - `LOG_RETENTION_DAYS`: Days of compressed archives to keep (default: 14)
//! - `LOG_MAX_FILE_SIZE_MB`: Size cap for a single audit file (default: 20)

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use reqwest::Url;

use crate::error::{AppError, AppResult};

/// Counter backend used by the rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RateLimitBackend {
    /// Per-process counters. Each gateway instance enforces its own limit.
    #[default]
    Local,
    /// Counters shared through Redis. All instances enforce one logical limit.
    Redis,
}

impl FromStr for RateLimitBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "memory" => Ok(Self::Local),
            "redis" | "shared" => Ok(Self::Redis),
            other => Err(format!("unknown backend '{other}' (expected 'local' or 'redis')")),
        }
    }
}

impl fmt::Display for RateLimitBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Redis => write!(f, "redis"),
        }
    }
}

/// Gateway configuration loaded from environment variables.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Gateway will listen on {}", config.server_addr());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Listen host address (default: "0.0.0.0")
    pub host: String,

    /// Listen port (default: 3000)
    pub port: u16,

    /// Maximum inbound request body size in bytes (default: 1 MiB)
    pub max_request_body_size: usize,

    /// Comma-separated list of allowed CORS origins ("*" allows any)
    pub cors_allowed_origins: Vec<String>,

    /// Proxies whose `X-Forwarded-For` / `X-Real-IP` headers are believed.
    ///
    /// Empty means the client identity is always the socket peer address.
    pub trusted_proxies: Vec<String>,

    // =========================================================================
    // Upstream Configuration
    // =========================================================================
    /// Base URL every admitted request is forwarded to
    pub upstream_base_url: String,

    /// Timeout for a forwarded call, including reading the upstream body
    pub upstream_timeout: Duration,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    /// Admitted requests per key per window (default: 10)
    pub max_requests: u32,

    /// Fixed window length (default: 60 seconds)
    pub rate_limit_window: Duration,

    /// Which counter store backs the limiter
    pub rate_limit_backend: RateLimitBackend,

    /// Admit requests when the store is unreachable (default: false, fail closed)
    pub rate_limit_fail_open: bool,

    /// Bound on a single store round trip (default: 250ms)
    pub store_timeout: Duration,

    /// Maximum number of keys the local store tracks at once
    pub local_store_max_keys: usize,

    /// Redis connection URL, used when the backend is `redis`
    pub redis_url: String,

    /// Prefix applied to every Redis counter key
    pub redis_key_prefix: String,

    // =========================================================================
    // Audit Log Configuration
    // =========================================================================
    /// Directory holding the daily audit files
    pub log_directory: PathBuf,

    /// Days of compressed archives to keep
    pub log_retention_days: u32,

    /// Size cap in megabytes for one audit file before it is rolled
    pub log_max_file_size_mb: u64,

    /// Records buffered between request tasks and the file writer
    pub audit_channel_capacity: usize,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log level (e.g., "info", "debug", "trace")
    pub log_level: String,

    /// Port for Prometheus metrics endpoint (default: 9090, 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if any value fails to parse or the
    /// resulting configuration is inconsistent.
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("PORT", 3000)?,
            max_request_body_size: Self::parse_env("MAX_REQUEST_BODY_SIZE", 1024 * 1024)?,
            cors_allowed_origins: Self::parse_list("CORS_ALLOWED_ORIGINS", "*"),
            trusted_proxies: Self::parse_list("TRUSTED_PROXIES", ""),

            // Upstream
            upstream_base_url: env::var("UPSTREAM_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            upstream_timeout: Duration::from_secs(Self::parse_env("UPSTREAM_TIMEOUT_SECS", 10)?),

            // Rate limiting
            max_requests: Self::parse_env("MAX_REQUESTS", 10)?,
            rate_limit_window: Duration::from_secs(Self::parse_env("WINDOW_SECONDS", 60)?),
            rate_limit_backend: Self::parse_env("RATE_LIMIT_BACKEND", RateLimitBackend::Local)?,
            rate_limit_fail_open: Self::parse_env("RATE_LIMIT_FAIL_OPEN", false)?,
            store_timeout: Duration::from_millis(Self::parse_env("STORE_TIMEOUT_MS", 250)?),
            local_store_max_keys: Self::parse_env("LOCAL_STORE_MAX_KEYS", 100_000)?,
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            redis_key_prefix: env::var("REDIS_KEY_PREFIX")
                .unwrap_or_else(|_| "courtside:ratelimit:".to_string()),

            // Audit log
            log_directory: env::var("LOG_DIRECTORY")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("logs")),
            log_retention_days: Self::parse_env("LOG_RETENTION_DAYS", 14)?,
            log_max_file_size_mb: Self::parse_env("LOG_MAX_FILE_SIZE_MB", 20)?,
            audit_channel_capacity: Self::parse_env("AUDIT_CHANNEL_CAPACITY", 1024)?,

            // Observability
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            metrics_port: Self::parse_env("METRICS_PORT", 9090)?,
        };

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if validation fails.
    pub fn validate(&self) -> AppResult<()> {
        if self.max_requests == 0 {
            return Err(AppError::ConfigError(
                "MAX_REQUESTS must be greater than 0".to_string(),
            ));
        }

        if self.rate_limit_window.is_zero() {
            return Err(AppError::ConfigError(
                "WINDOW_SECONDS must be greater than 0".to_string(),
            ));
        }

        if self.upstream_timeout.is_zero() {
            return Err(AppError::ConfigError(
                "UPSTREAM_TIMEOUT_SECS must be greater than 0".to_string(),
            ));
        }

        if self.store_timeout.is_zero() {
            return Err(AppError::ConfigError(
                "STORE_TIMEOUT_MS must be greater than 0".to_string(),
            ));
        }

        if self.max_request_body_size == 0 {
            return Err(AppError::ConfigError(
                "MAX_REQUEST_BODY_SIZE must be greater than 0".to_string(),
            ));
        }

        if self.local_store_max_keys == 0 {
            return Err(AppError::ConfigError(
                "LOCAL_STORE_MAX_KEYS must be greater than 0".to_string(),
            ));
        }

        if self.log_retention_days == 0 {
            return Err(AppError::ConfigError(
                "LOG_RETENTION_DAYS must be greater than 0".to_string(),
            ));
        }

        if self.log_max_file_size_mb == 0 {
            return Err(AppError::ConfigError(
                "LOG_MAX_FILE_SIZE_MB must be greater than 0".to_string(),
            ));
        }

        if self.audit_channel_capacity == 0 {
            return Err(AppError::ConfigError(
                "AUDIT_CHANNEL_CAPACITY must be greater than 0".to_string(),
            ));
        }

        self.upstream_url()?;

        Ok(())
    }

    /// Parse and check the upstream base URL.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` unless the URL is absolute `http` or `https`.
    pub fn upstream_url(&self) -> AppResult<Url> {
        let url = Url::parse(&self.upstream_base_url).map_err(|e| {
            AppError::ConfigError(format!(
                "UPSTREAM_BASE_URL '{}' is not an absolute URL: {e}",
                self.upstream_base_url
            ))
        })?;

        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(AppError::ConfigError(format!(
                "UPSTREAM_BASE_URL '{}' must be an http(s) URL with a host",
                self.upstream_base_url
            )));
        }

        Ok(url)
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Size cap for one audit file in bytes.
    pub fn log_max_file_size_bytes(&self) -> u64 {
        self.log_max_file_size_mb.saturating_mul(1024 * 1024)
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<std::net::SocketAddr> {
        if self.metrics_enabled() {
            Some(std::net::SocketAddr::from((
                [0, 0, 0, 0],
                self.metrics_port,
            )))
        } else {
            None
        }
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> AppResult<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .trim()
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    /// Parse a comma-separated list, dropping empty items.
    fn parse_list(name: &str, default: &str) -> Vec<String> {
        split_list(&env::var(name).unwrap_or_else(|_| default.to_string()))
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Default configuration for testing and development.
///
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Server
            host: "0.0.0.0".to_string(),
            port: 3000,
            max_request_body_size: 1024 * 1024,
            cors_allowed_origins: vec!["*".to_string()],
            trusted_proxies: vec![],
            // Upstream
            upstream_base_url: "http://localhost:8080".to_string(),
            upstream_timeout: Duration::from_secs(10),
            // Rate limiting
            max_requests: 10,
            rate_limit_window: Duration::from_secs(60),
            rate_limit_backend: RateLimitBackend::Local,
            rate_limit_fail_open: false,
            store_timeout: Duration::from_millis(250),
            local_store_max_keys: 100_000,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            redis_key_prefix: "courtside:ratelimit:".to_string(),
            // Audit log
            log_directory: PathBuf::from("logs"),
            log_retention_days: 14,
            log_max_file_size_mb: 20,
            audit_channel_capacity: 1024,
            // Observability
            log_level: "info".to_string(),
            metrics_port: 9090,
        }
    }
}
