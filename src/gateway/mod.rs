//! The proxy request path.
//!
//! Every request that is not an operational route lands in [`handle`] and
//! moves through these states:
//!
//! ```text
//! Received ──validate──► RateLimitChecked ──admit──► Forwarded ──┐
//!    │                        │                                  ├─► Logged ─► Responded
//!    └── invalid (4xx) ───────┴── deny (429) ──► Rejected ───────┘
//! ```
//!
//! Invalid input is refused before the limiter runs, so it consumes no quota.
//! Exactly one audit record is written per request: the normal path disarms
//! the [`InFlightGuard`] and writes the record itself, while an abandoned
//! request leaves the guard to write a 499 record on drop.

pub mod guard;

use std::time::Instant;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tracing::{debug, instrument};

use crate::audit::AuditRecord;
use crate::audit::record::MAX_RESPONSE_SUMMARY_BYTES;
use crate::error::{GatewayError, GatewayResult};
use crate::metrics;
use crate::middleware::{REQUEST_ID_HEADER, client_identity};
use crate::proxy::{ProxyOutcome, ProxyRequest};
use crate::ratelimit::Decision;
use crate::state::AppState;
use crate::validation::{
    validate_endpoint_path, validate_json_body, validate_json_content_type, validate_method,
};

pub use guard::InFlightGuard;

/// Upstream answer plus the quota left for this key.
struct Forwarded {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    remaining: u64,
}

/// Gate, forward and audit one request.
#[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
pub async fn handle(State(state): State<AppState>, request: Request) -> Response {
    let started = Instant::now();
    let client = client_identity(&request, &state.trusted_proxies);
    let (parts, body) = request.into_parts();

    let record = AuditRecord::new(parts.method.as_str(), parts.uri.path(), &client)
        .with_user_agent(header_string(&parts.headers, header::USER_AGENT.as_str()))
        .with_request_id(header_string(&parts.headers, REQUEST_ID_HEADER));
    let mut guard = InFlightGuard::new(state.audit.clone(), record, started);

    let result = admit_and_forward(&state, &client, &parts, body, &mut guard).await;

    // Past the last await: the request can no longer be abandoned
    let Some(record) = guard.disarm() else {
        return GatewayError::Internal("audit record already taken".into()).into_response();
    };
    let latency = started.elapsed();
    let limit = state.limiter.policy().max_requests();

    match result {
        Ok(forwarded) => {
            let summary = body_summary(&forwarded.body);
            state
                .audit
                .record_admitted(record.completed(forwarded.status.as_u16(), latency, &summary));
            metrics::record_request(
                parts.method.as_str(),
                forwarded.status.as_u16(),
                "success",
                latency.as_secs_f64(),
            );

            let mut response = Response::new(Body::from(forwarded.body));
            *response.status_mut() = forwarded.status;
            *response.headers_mut() = forwarded.headers;
            let headers = response.headers_mut();
            headers.insert("x-ratelimit-limit", HeaderValue::from(limit));
            headers.insert("x-ratelimit-remaining", HeaderValue::from(forwarded.remaining));
            response
        }
        Err(error) => {
            let status = error.status();
            state
                .audit
                .record_rejected(record.completed(status.as_u16(), latency, &error.to_string()));
            metrics::record_request(
                parts.method.as_str(),
                status.as_u16(),
                "rejected",
                latency.as_secs_f64(),
            );
            error.into_response()
        }
    }
}

async fn admit_and_forward(
    state: &AppState,
    client: &str,
    parts: &Parts,
    body: Body,
    guard: &mut InFlightGuard,
) -> GatewayResult<Forwarded> {
    let path = parts.uri.path();

    validate_method(&parts.method)?;
    validate_endpoint_path(path)?;
    validate_json_content_type(&parts.headers)?;

    let body = read_body(body, state.config.max_request_body_size).await?;
    let json = validate_json_body(&body)?;
    if let Some(record) = guard.record_mut() {
        record.request_body = json;
    }

    let remaining = match state.limiter.check(client, path).await? {
        Decision::Admit { remaining, .. } => remaining,
        Decision::Deny { retry_after, .. } => {
            return Err(GatewayError::RateLimitExceeded {
                limit: state.limiter.policy().max_requests(),
                retry_after,
            });
        }
    };

    let proxy_request = ProxyRequest {
        method: parts.method.clone(),
        path: path.to_string(),
        query: parts.uri.query().map(str::to_string),
        headers: parts.headers.clone(),
        body,
    };

    match state.forwarder.forward(&proxy_request).await {
        ProxyOutcome::Success {
            status,
            headers,
            body,
        } => {
            debug!(status = status.as_u16(), "Forwarded request");
            Ok(Forwarded {
                status,
                headers,
                body,
                remaining,
            })
        }
        ProxyOutcome::Failure { kind, message } => Err((kind, message).into()),
    }
}

/// Collect the body, refusing anything over `limit` bytes.
async fn read_body(body: Body, limit: usize) -> GatewayResult<Bytes> {
    axum::body::to_bytes(body, limit).await.map_err(|e| {
        debug!(error = %e, limit, "Request body rejected");
        GatewayError::ClientInput {
            status: StatusCode::PAYLOAD_TOO_LARGE,
            message: format!("Request body could not be read within the {limit} byte limit"),
        }
    })
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Lossy UTF-8 prefix of an upstream body for the audit record.
fn body_summary(body: &[u8]) -> String {
    let prefix = body.get(..MAX_RESPONSE_SUMMARY_BYTES + 4).unwrap_or(body);
    String::from_utf8_lossy(prefix).into_owned()
}
