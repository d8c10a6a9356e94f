//! Health and readiness endpoints.
//!
//! # Endpoints
//!
//! - `GET /health` - Liveness with store and audit details
//! - `GET /ready` - Readiness probe; 503 while the counter store is down
//!
//! # Health vs Readiness
//!
//! - **Health** (`/health`): Returns 200 even if degraded, includes details
//! - **Readiness** (`/ready`): Returns 503 if not ready to serve traffic
//!
//! Neither endpoint is rate limited or audited.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::instrument;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub rate_limit_backend: &'static str,
    pub store_healthy: bool,
    pub audit_failures: u64,
    pub uptime_seconds: u64,
    pub version: &'static str,
    pub timestamp: DateTime<Utc>,
}

/// Health check endpoint.
///
/// # Response Body
///
/// ```json
/// {
///   "status": "healthy",
///   "rate_limit_backend": "local",
///   "store_healthy": true,
///   "audit_failures": 0,
///   "uptime_seconds": 3600,
///   "version": "0.1.0",
///   "timestamp": "2026-01-15T10:30:00Z"
/// }
/// ```
#[instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let store_healthy = state.is_ready().await;

    Json(HealthResponse {
        status: if store_healthy { "healthy" } else { "degraded" },
        rate_limit_backend: state.limiter.store().backend_name(),
        store_healthy,
        audit_failures: state.audit.failures(),
        uptime_seconds: state.uptime_seconds(),
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now(),
    })
}

/// Readiness check endpoint for Kubernetes probes.
#[instrument(skip(state))]
pub async fn readiness_check(State(state): State<AppState>) -> StatusCode {
    if state.is_ready().await {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
