//! HTTP forwarder for admitted requests.
//!
//! One pooled `reqwest::Client` is shared by all request tasks. The client
//! timeout covers connecting, sending, and reading the whole upstream body,
//! so a forward always finishes within `timeout`.
//!
//! Dropping the future returned by [`UpstreamForwarder::forward`] cancels the
//! upstream call; axum does this when the inbound connection goes away.

use std::time::{Duration, Instant};

use axum::http::header::{self, HeaderMap, HeaderName};
use reqwest::{Client, Url};
use tracing::{debug, warn};

use super::{FailureKind, ProxyOutcome, ProxyRequest};
use crate::error::{AppError, AppResult};
use crate::metrics;

/// Inbound headers copied onto the upstream request.
const FORWARDED_REQUEST_HEADERS: &[&str] = &["accept", "accept-language", "user-agent", "x-request-id"];

/// Upstream response headers that belong to one hop and are never passed back.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

/// Forwards admitted requests to the configured upstream.
#[derive(Clone)]
pub struct UpstreamForwarder {
    client: Client,
    base_url: Url,
    timeout: Duration,
}

impl UpstreamForwarder {
    /// Build a forwarder for `base_url` with a bounded request timeout.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Internal` if the HTTP client cannot be built.
    pub fn new(base_url: Url, timeout: Duration) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Full upstream URL for a request: base URL (including any base path)
    /// followed by the inbound path and query.
    pub fn target_url(&self, request: &ProxyRequest) -> String {
        format!(
            "{}{}",
            self.base_url.as_str().trim_end_matches('/'),
            request.path_and_query()
        )
    }

    /// Forward `request` upstream and classify what happened.
    pub async fn forward(&self, request: &ProxyRequest) -> ProxyOutcome {
        let url = self.target_url(request);
        let started = Instant::now();

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(request.body.clone());

        for name in FORWARDED_REQUEST_HEADERS {
            if let Some(value) = request.headers.get(*name) {
                builder = builder.header(*name, value.clone());
            }
        }

        let result = async {
            let response = builder.send().await?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.bytes().await?;
            Ok::<_, reqwest::Error>((status, headers, body))
        }
        .await;

        let elapsed = started.elapsed().as_secs_f64();

        match result {
            Ok((status, headers, body)) => {
                debug!(url = %url, status = status.as_u16(), elapsed_secs = elapsed, "Upstream responded");
                metrics::record_upstream_call("success", elapsed);
                ProxyOutcome::Success {
                    status,
                    headers: strip_hop_by_hop(headers),
                    body,
                }
            }
            Err(e) => {
                let kind = if e.is_timeout() {
                    FailureKind::Timeout
                } else {
                    FailureKind::Unreachable
                };
                warn!(url = %url, kind = %kind, error = %e, "Upstream call failed");
                metrics::record_upstream_call(&kind.to_string(), elapsed);

                let message = match kind {
                    FailureKind::Timeout => format!("no response within {:?}", self.timeout),
                    FailureKind::Unreachable => e.to_string(),
                };
                ProxyOutcome::Failure { kind, message }
            }
        }
    }
}

/// Drop hop-by-hop headers, plus any header named by `Connection`.
fn strip_hop_by_hop(mut headers: HeaderMap) -> HeaderMap {
    let connection_listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in connection_listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }
    headers
}
