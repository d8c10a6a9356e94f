//! Upstream forwarding: request snapshot, outcome, and the HTTP forwarder.

pub mod forwarder;

use std::fmt;

use axum::http::{HeaderMap, Method, StatusCode};
use bytes::Bytes;

use crate::error::GatewayError;

pub use forwarder::UpstreamForwarder;

/// Read-only snapshot of an inbound request, handed to the forwarder.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    /// Path starting with `/`
    pub path: String,
    /// Raw query string without the leading `?`
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ProxyRequest {
    /// Path plus query string, as sent upstream.
    pub fn path_and_query(&self) -> String {
        match &self.query {
            Some(query) if !query.is_empty() => format!("{}?{query}", self.path),
            _ => self.path.clone(),
        }
    }
}

/// Why a forward produced no upstream response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Connection refused, DNS failure, reset mid-response
    Unreachable,
    /// No complete response within the upstream timeout
    Timeout,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreachable => write!(f, "unreachable"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// Result of one forwarded call.
#[derive(Debug, Clone)]
pub enum ProxyOutcome {
    /// Upstream answered. Any status, including 4xx/5xx, is passed through.
    Success {
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
    },
    Failure { kind: FailureKind, message: String },
}

impl From<(FailureKind, String)> for GatewayError {
    fn from((kind, message): (FailureKind, String)) -> Self {
        match kind {
            FailureKind::Unreachable => GatewayError::UpstreamUnreachable(message),
            FailureKind::Timeout => GatewayError::UpstreamTimeout(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(path: &str, query: Option<&str>) -> ProxyRequest {
        ProxyRequest {
            method: Method::POST,
            path: path.to_string(),
            query: query.map(str::to_string),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    #[test]
    fn test_path_and_query() {
        assert_eq!(request("/predict_winner", None).path_and_query(), "/predict_winner");
        assert_eq!(request("/lookup", Some("v=2")).path_and_query(), "/lookup?v=2");
        assert_eq!(request("/lookup", Some("")).path_and_query(), "/lookup");
    }

    #[test]
    fn test_failure_maps_to_gateway_error() {
        let error: GatewayError = (FailureKind::Timeout, "10s".to_string()).into();
        assert_eq!(error.status(), StatusCode::GATEWAY_TIMEOUT);

        let error: GatewayError = (FailureKind::Unreachable, "refused".to_string()).into();
        assert_eq!(error.status(), StatusCode::BAD_GATEWAY);
    }
}
