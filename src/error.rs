use std::time::Duration;

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Start-up and lifecycle errors.
///
/// These never reach a client; `main` turns them into process exit codes.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Failed to connect to rate limit store: {0}")]
    StoreConnect(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;

/// Errors raised while handling one proxied request.
///
/// Every variant maps to a definite HTTP status. Detail strings are logged
/// server-side only; clients get a fixed, sanitized message.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Malformed request (bad method, content type, body or path). Not retried.
    #[error("Invalid request: {message}")]
    ClientInput { status: StatusCode, message: String },

    /// The composite key used up its quota for the current window.
    #[error("Rate limit exceeded (limit {limit})")]
    RateLimitExceeded { limit: u32, retry_after: Duration },

    /// Counter store could not be consulted and the limiter fails closed.
    #[error("Rate limit store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    #[error("Upstream timed out: {0}")]
    UpstreamTimeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Plain-text body returned with every 429.
pub const RATE_LIMIT_MESSAGE: &str = "Too many requests. Please wait before trying again.";

impl GatewayError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::ClientInput {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    /// HTTP status surfaced to the caller.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::ClientInput { status, .. } => *status,
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::UpstreamUnreachable(_) => StatusCode::BAD_GATEWAY,
            Self::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ClientInput { .. } => "client_input",
            Self::RateLimitExceeded { .. } => "rate_limit_exceeded",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::UpstreamUnreachable(_) => "upstream_unreachable",
            Self::UpstreamTimeout(_) => "upstream_timeout",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Message that is safe to show to the caller.
    pub fn public_message(&self) -> String {
        match self {
            // Client errors describe the caller's own input
            Self::ClientInput { message, .. } => message.clone(),
            Self::RateLimitExceeded { .. } => RATE_LIMIT_MESSAGE.to_string(),
            Self::StoreUnavailable(_) => {
                "Service is temporarily unavailable. Please try again later.".to_string()
            }
            Self::UpstreamUnreachable(_) => {
                "Upstream service is unreachable. Please try again later.".to_string()
            }
            Self::UpstreamTimeout(_) => "Upstream service timed out. Please try again.".to_string(),
            Self::Internal(_) => {
                "An internal error occurred. Please contact support if the issue persists."
                    .to_string()
            }
        }
    }
}

/// Error response body for gateway-generated failures.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();

        match &self {
            Self::ClientInput { .. } | Self::RateLimitExceeded { .. } => {
                tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
            }
            _ => {
                // Full detail stays in the server log
                tracing::error!(error = %self, status = status.as_u16(), "Request failed");
            }
        }

        if let Self::RateLimitExceeded { limit, retry_after } = &self {
            let mut response = (status, RATE_LIMIT_MESSAGE).into_response();
            let headers = response.headers_mut();
            headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs(*retry_after)));
            headers.insert("x-ratelimit-limit", HeaderValue::from(*limit));
            headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
            return response;
        }

        let body = ErrorResponse {
            error: self.kind(),
            message: self.public_message(),
        };

        (status, axum::Json(body)).into_response()
    }
}

/// Whole seconds for a `Retry-After` header, rounded up and never zero.
pub fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs();
    let secs = if retry_after.subsec_nanos() > 0 { secs + 1 } else { secs };
    secs.max(1)
}

/// Convenience type alias for Results with GatewayError.
pub type GatewayResult<T> = Result<T, GatewayError>;
