//! End-to-end tests for the gateway.
//!
//! Each test starts an in-process upstream (a small axum app on an ephemeral
//! port) and a gateway pointed at it, then drives the gateway over real HTTP
//! with `reqwest`. Audit logs go to a temporary directory per test.
//!
//! Run with: `cargo test --test gateway_tests`
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use reqwest::Client;
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::net::TcpListener;

use courtside_gateway::error::RATE_LIMIT_MESSAGE;
use courtside_gateway::{AppState, Config, build_router};

// =============================================================================
// Fixtures
// =============================================================================

/// Request counters shared with the upstream handlers.
#[derive(Clone, Default)]
struct Counters {
    hits: Arc<AtomicUsize>,
    completed: Arc<AtomicUsize>,
}

/// In-process stand-in for the prediction API.
struct Upstream {
    base_url: String,
    counters: Counters,
}

impl Upstream {
    async fn start() -> Self {
        let counters = Counters::default();

        let app = Router::new()
            .route(
                "/predict_winner",
                post(|State(counters): State<Counters>, Json(body): Json<Value>| async move {
                    counters.hits.fetch_add(1, Ordering::SeqCst);
                    counters.completed.fetch_add(1, Ordering::SeqCst);
                    Json(json!({ "winner": body["team1"], "confidence": 0.62 }))
                }),
            )
            .route(
                "/create",
                post(|State(counters): State<Counters>| async move {
                    counters.hits.fetch_add(1, Ordering::SeqCst);
                    counters.completed.fetch_add(1, Ordering::SeqCst);
                    (StatusCode::CREATED, Json(json!({ "ok": true })))
                }),
            )
            .route(
                "/slow",
                post(|State(counters): State<Counters>| async move {
                    counters.hits.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(3)).await;
                    counters.completed.fetch_add(1, Ordering::SeqCst);
                    Json(json!({ "late": true }))
                }),
            )
            .with_state(counters.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            counters,
        }
    }

    fn hits(&self) -> usize {
        self.counters.hits.load(Ordering::SeqCst)
    }

    /// Handlers that ran to the end without being dropped.
    fn completed(&self) -> usize {
        self.counters.completed.load(Ordering::SeqCst)
    }
}

/// A running gateway plus the handles tests inspect.
struct Gateway {
    base_url: String,
    state: AppState,
    log_dir: TempDir,
    client: Client,
}

impl Gateway {
    /// Start a gateway in front of `upstream_base_url`; `configure` adjusts
    /// the test config before the gateway is built.
    async fn start(upstream_base_url: &str, configure: impl FnOnce(&mut Config)) -> Self {
        let log_dir = tempfile::tempdir().unwrap();

        let mut config = Config {
            host: "127.0.0.1".to_string(),
            upstream_base_url: upstream_base_url.to_string(),
            log_directory: log_dir.path().to_path_buf(),
            metrics_port: 0,
            ..Config::default()
        };
        configure(&mut config);
        config.validate().unwrap();

        let state = AppState::build(config).await.unwrap();
        let app = build_router(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
                .await
                .unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
            log_dir,
            client: Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_json(&self, path: &str, body: Value) -> reqwest::Response {
        self.client.post(self.url(path)).json(&body).send().await.unwrap()
    }

    /// Stop the audit writer and return every record it wrote.
    async fn audit_lines(&self) -> Vec<Value> {
        self.state.shutdown().await;

        let mut lines = Vec::new();
        for entry in std::fs::read_dir(self.log_dir.path()).unwrap() {
            let text = std::fs::read_to_string(entry.unwrap().path()).unwrap();
            lines.extend(text.lines().map(|line| serde_json::from_str::<Value>(line).unwrap()));
        }
        lines
    }
}

fn prediction() -> Value {
    json!({ "team1": "BOS", "team2": "LAL" })
}

/// A local port with nothing listening on it.
fn closed_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

// =============================================================================
// Rate limiting
// =============================================================================

#[tokio::test]
async fn test_admits_max_requests_then_rejects() {
    let upstream = Upstream::start().await;
    let gateway = Gateway::start(&upstream.base_url, |c| c.max_requests = 2).await;

    let first = gateway.post_json("/predict_winner", prediction()).await;
    let second = gateway.post_json("/predict_winner", prediction()).await;
    let third = gateway.post_json("/predict_winner", prediction()).await;

    assert_eq!(first.status(), 200);
    assert_eq!(second.status(), 200);
    assert_eq!(third.status(), 429);

    assert_eq!(first.headers()["x-ratelimit-limit"], "2");
    assert_eq!(first.headers()["x-ratelimit-remaining"], "1");
    assert_eq!(second.headers()["x-ratelimit-remaining"], "0");

    assert_eq!(third.headers()["x-ratelimit-remaining"], "0");
    let retry_after: u64 = third.headers()["retry-after"].to_str().unwrap().parse().unwrap();
    assert!((1..=60).contains(&retry_after));
    assert_eq!(third.text().await.unwrap(), RATE_LIMIT_MESSAGE);

    assert_eq!(upstream.hits(), 2);
}

#[tokio::test]
async fn test_counter_resets_after_window() {
    let upstream = Upstream::start().await;
    let gateway = Gateway::start(&upstream.base_url, |c| {
        c.max_requests = 1;
        c.rate_limit_window = Duration::from_millis(300);
    })
    .await;

    assert_eq!(gateway.post_json("/predict_winner", prediction()).await.status(), 200);
    assert_eq!(gateway.post_json("/predict_winner", prediction()).await.status(), 429);

    tokio::time::sleep(Duration::from_millis(450)).await;

    assert_eq!(gateway.post_json("/predict_winner", prediction()).await.status(), 200);
}

#[tokio::test]
async fn test_limits_are_per_client_and_per_endpoint() {
    let upstream = Upstream::start().await;
    let gateway = Gateway::start(&upstream.base_url, |c| {
        c.max_requests = 1;
        // Test traffic arrives from loopback, so forwarded addresses are used
        c.trusted_proxies = vec!["127.0.0.1/32".to_string()];
    })
    .await;

    let send = |client_ip: &'static str, path: &'static str| {
        gateway
            .client
            .post(gateway.url(path))
            .header("x-forwarded-for", client_ip)
            .json(&prediction())
            .send()
    };

    assert_eq!(send("198.51.100.1", "/predict_winner").await.unwrap().status(), 200);
    assert_eq!(send("198.51.100.1", "/predict_winner").await.unwrap().status(), 429);

    // Another client on the same endpoint
    assert_eq!(send("198.51.100.2", "/predict_winner").await.unwrap().status(), 200);

    // Same client on another endpoint
    assert_eq!(send("198.51.100.1", "/create").await.unwrap().status(), 201);
}

#[tokio::test]
async fn test_forwarded_header_ignored_without_trusted_proxies() {
    let upstream = Upstream::start().await;
    let gateway = Gateway::start(&upstream.base_url, |c| c.max_requests = 1).await;

    let send = |client_ip: &'static str| {
        gateway
            .client
            .post(gateway.url("/predict_winner"))
            .header("x-forwarded-for", client_ip)
            .json(&prediction())
            .send()
    };

    // Rotating the header does not buy a fresh quota
    assert_eq!(send("198.51.100.1").await.unwrap().status(), 200);
    assert_eq!(send("198.51.100.2").await.unwrap().status(), 429);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_admit_exactly_max() {
    let upstream = Upstream::start().await;
    let gateway = Arc::new(Gateway::start(&upstream.base_url, |c| c.max_requests = 10).await);
    let mut tasks = tokio::task::JoinSet::new();

    for _ in 0..50 {
        let gateway = gateway.clone();
        tasks.spawn(async move {
            gateway
                .post_json("/predict_winner", prediction())
                .await
                .status()
                .as_u16()
        });
    }

    let statuses = tasks.join_all().await;
    assert_eq!(statuses.iter().filter(|s| **s == 200).count(), 10);
    assert_eq!(statuses.iter().filter(|s| **s == 429).count(), 40);
    assert_eq!(upstream.hits(), 10);
}

// =============================================================================
// Forwarding
// =============================================================================

#[tokio::test]
async fn test_upstream_status_and_body_pass_through() {
    let upstream = Upstream::start().await;
    let gateway = Gateway::start(&upstream.base_url, |_| {}).await;

    let response = gateway.post_json("/create", json!({ "name": "x" })).await;

    assert_eq!(response.status(), 201);
    assert!(
        response.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("application/json")
    );
    assert!(response.headers().contains_key("x-request-id"));
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({ "ok": true }));
}

#[tokio::test]
async fn test_upstream_error_status_is_passed_through() {
    let upstream = Upstream::start().await;
    let gateway = Gateway::start(&upstream.base_url, |_| {}).await;

    // The upstream has no such route
    let response = gateway.post_json("/no_such_endpoint", prediction()).await;

    assert_eq!(response.status(), 404);
    assert_eq!(response.headers()["x-ratelimit-limit"], "10");
}

#[tokio::test]
async fn test_unreachable_upstream_returns_502_and_gateway_keeps_serving() {
    let upstream_url = format!("http://127.0.0.1:{}", closed_port());
    let gateway = Gateway::start(&upstream_url, |_| {}).await;

    for _ in 0..2 {
        let response = gateway.post_json("/predict_winner", prediction()).await;
        assert_eq!(response.status(), 502);

        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"], "upstream_unreachable");
        assert!(!body["message"].as_str().unwrap().contains("127.0.0.1"));
    }

    let health = gateway.client.get(gateway.url("/health")).send().await.unwrap();
    assert_eq!(health.status(), 200);

    let records = gateway.audit_lines().await;
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r["outcome"] == "rejected" && r["status_code"] == 502));
}

#[tokio::test]
async fn test_slow_upstream_returns_504() {
    let upstream = Upstream::start().await;
    let gateway = Gateway::start(&upstream.base_url, |c| {
        c.upstream_timeout = Duration::from_millis(300);
    })
    .await;

    let started = std::time::Instant::now();
    let response = gateway.post_json("/slow", json!({})).await;

    assert_eq!(response.status(), 504);
    assert!(started.elapsed() < Duration::from_secs(3));
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "upstream_timeout");
}

#[tokio::test]
async fn test_client_disconnect_cancels_upstream_and_audits_once() {
    let upstream = Upstream::start().await;
    let gateway = Gateway::start(&upstream.base_url, |_| {}).await;
    let impatient = Client::builder()
        .timeout(Duration::from_millis(300))
        .build()
        .unwrap();

    let result = impatient
        .post(gateway.url("/slow"))
        .json(&json!({}))
        .send()
        .await;
    assert!(result.unwrap_err().is_timeout());

    // Outlast the upstream sleep; a live forward would have completed by now
    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert_eq!(upstream.hits(), 1);
    assert_eq!(upstream.completed(), 0);

    let records = gateway.audit_lines().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["outcome"], "rejected");
    assert_eq!(records[0]["status_code"], 499);
    assert_eq!(records[0]["path"], "/slow");
    assert_eq!(gateway.state.audit.admitted(), 0);
    assert_eq!(gateway.state.audit.rejected(), 1);
}

// =============================================================================
// Input validation
// =============================================================================

#[tokio::test]
async fn test_invalid_requests_are_rejected_without_using_quota() {
    let upstream = Upstream::start().await;
    let gateway = Gateway::start(&upstream.base_url, |c| c.max_requests = 1).await;

    let wrong_method = gateway
        .client
        .get(gateway.url("/predict_winner"))
        .send()
        .await
        .unwrap();
    assert_eq!(wrong_method.status(), 405);

    let wrong_type = gateway
        .client
        .post(gateway.url("/predict_winner"))
        .header("content-type", "text/plain")
        .body("team1=BOS")
        .send()
        .await
        .unwrap();
    assert_eq!(wrong_type.status(), 415);

    let bad_json = gateway
        .client
        .post(gateway.url("/predict_winner"))
        .header("content-type", "application/json")
        .body("{\"team1\":")
        .send()
        .await
        .unwrap();
    assert_eq!(bad_json.status(), 400);
    let body: Value = bad_json.json().await.unwrap();
    assert_eq!(body["error"], "client_input");

    // Quota is untouched
    assert_eq!(gateway.post_json("/predict_winner", prediction()).await.status(), 200);
    assert_eq!(upstream.hits(), 1);
}

#[tokio::test]
async fn test_oversized_body_returns_413() {
    let upstream = Upstream::start().await;
    let gateway = Gateway::start(&upstream.base_url, |c| c.max_request_body_size = 64).await;

    let response = gateway
        .post_json("/predict_winner", json!({ "padding": "x".repeat(1024) }))
        .await;

    assert_eq!(response.status(), 413);
    assert_eq!(upstream.hits(), 0);
}

// =============================================================================
// Audit trail and operational routes
// =============================================================================

#[tokio::test]
async fn test_every_request_leaves_exactly_one_audit_record() {
    let upstream = Upstream::start().await;
    let gateway = Gateway::start(&upstream.base_url, |c| c.max_requests = 2).await;

    for _ in 0..3 {
        gateway.post_json("/predict_winner", prediction()).await;
    }
    gateway
        .client
        .post(gateway.url("/predict_winner"))
        .header("x-request-id", "req-42")
        .json(&prediction())
        .send()
        .await
        .unwrap();

    let records = gateway.audit_lines().await;
    assert_eq!(records.len(), 4);
    assert_eq!(gateway.state.audit.admitted(), 2);
    assert_eq!(gateway.state.audit.rejected(), 2);
    assert_eq!(gateway.state.audit.failures(), 0);

    let admitted: Vec<&Value> = records.iter().filter(|r| r["outcome"] == "admitted").collect();
    assert_eq!(admitted.len(), 2);
    assert_eq!(admitted[0]["level"], "info");
    assert_eq!(admitted[0]["path"], "/predict_winner");
    assert_eq!(admitted[0]["request_body"]["team1"], "BOS");
    assert!(admitted[0]["request_id"].is_string());

    let tagged = records.iter().find(|r| r["request_id"] == "req-42").unwrap();
    assert_eq!(tagged["status_code"], 429);
    assert_eq!(tagged["level"], "error");
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let upstream = Upstream::start().await;
    let gateway = Gateway::start(&upstream.base_url, |_| {}).await;

    let response = gateway
        .client
        .post(gateway.url("/predict_winner"))
        .header("x-request-id", "trace-me")
        .json(&prediction())
        .send()
        .await
        .unwrap();

    assert_eq!(response.headers()["x-request-id"], "trace-me");
}

#[tokio::test]
async fn test_health_and_readiness() {
    let upstream = Upstream::start().await;
    let gateway = Gateway::start(&upstream.base_url, |_| {}).await;

    let health = gateway.client.get(gateway.url("/health")).send().await.unwrap();
    assert_eq!(health.status(), 200);
    let body: Value = health.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["rate_limit_backend"], "local");

    let ready = gateway.client.get(gateway.url("/ready")).send().await.unwrap();
    assert_eq!(ready.status(), 200);

    // Operational routes are neither limited nor audited
    assert!(gateway.audit_lines().await.is_empty());
}

#[tokio::test]
async fn test_post_to_reserved_path_is_refused_and_audited() {
    let upstream = Upstream::start().await;
    let gateway = Gateway::start(&upstream.base_url, |_| {}).await;

    let health = gateway.post_json("/health", json!({})).await;
    assert_eq!(health.status(), 400);
    let ready = gateway.post_json("/ready", json!({})).await;
    assert_eq!(ready.status(), 400);

    // GET still reaches the operational handler
    let get = gateway.client.get(gateway.url("/health")).send().await.unwrap();
    assert_eq!(get.status(), 200);

    assert_eq!(upstream.hits(), 0);
    let records = gateway.audit_lines().await;
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r["outcome"] == "rejected" && r["status_code"] == 400));
    assert_eq!(records[0]["method"], "POST");
}
