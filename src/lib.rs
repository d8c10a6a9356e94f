//! # Courtside Gateway
//!
//! A rate-limited, audited reverse proxy that sits in front of the match
//! prediction API:
//!
//! - **Rate limiting**: fixed window per client and endpoint, in-process or
//!   shared through Redis
//! - **Forwarding**: admitted POST requests are relayed verbatim upstream
//! - **Audit**: one record per request, to the console and to a rolling,
//!   gzip-archived JSON log
//! - **Observability**: request ids, structured logging, Prometheus metrics,
//!   health endpoints
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Middleware (Request ID → Trace → CORS)                     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Gateway handler (validate → limit → forward → audit)       │
//! ├──────────────────────┬──────────────────┬───────────────────┤
//! │  RateLimiter         │  Forwarder       │  AuditLogger      │
//! │  (Local | Redis)     │  (reqwest)       │  (rolling file)   │
//! └──────────────────────┴──────────────────┴───────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use courtside_gateway::{AppState, Config, build_router};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let state = AppState::build(config).await?;
//!     let app = build_router(state.clone());
//!
//!     // Serve `app` with `into_make_service_with_connect_info::<SocketAddr>()`...
//!     state.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! ```bash
//! MAX_REQUESTS=10 WINDOW_SECONDS=60 UPSTREAM_BASE_URL=http://localhost:8080 cargo run
//! ```

pub mod audit;
pub mod config;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod proxy;
pub mod ratelimit;
pub mod routes;
pub mod state;
pub mod utils;
pub mod validation;

// Re-exports for convenience
pub use config::Config;
pub use error::{AppError, AppResult, GatewayError, GatewayResult};
pub use routes::build_router;
pub use state::AppState;
