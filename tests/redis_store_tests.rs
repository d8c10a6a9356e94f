//! Integration tests for the Redis counter store using testcontainers.
//!
//! These tests start a Redis container and exercise the shared store and the
//! limiter on top of it. They need Docker and are ignored by default.
//!
//! Run with: `cargo test --test redis_store_tests -- --ignored`
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage};

use courtside_gateway::ratelimit::{
    RateLimitKey, RateLimitPolicy, RateLimitStore, RateLimiter, RedisStore, RedisStoreConfig,
};

const REDIS_PORT: u16 = 6379;

/// Start Redis and connect a store with a per-test key prefix.
async fn start_store(prefix: &str) -> (ContainerAsync<GenericImage>, RedisStore) {
    let container = GenericImage::new("redis", "7-alpine")
        .with_exposed_port(REDIS_PORT.tcp())
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"))
        .start()
        .await
        .expect("Failed to start Redis container");

    let port = container
        .get_host_port_ipv4(REDIS_PORT)
        .await
        .expect("Failed to get Redis port");

    let store = RedisStore::connect(RedisStoreConfig {
        url: format!("redis://127.0.0.1:{port}"),
        key_prefix: prefix.to_string(),
        ..RedisStoreConfig::default()
    })
    .await
    .expect("Failed to connect to Redis");

    (container, store)
}

fn key(identity: &str, path: &str) -> RateLimitKey {
    RateLimitKey::new(identity, path).unwrap()
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_increment_counts_and_sets_ttl() {
    let (_container, store) = start_store("test:counts:").await;
    let window = Duration::from_secs(60);

    let first = store.increment(&key("10.0.0.1", "/predict_winner"), window).await.unwrap();
    assert_eq!(first.count, 1);
    assert!(first.is_new_window);
    let ttl = first.resets_in.unwrap();
    assert!(ttl > Duration::from_secs(55) && ttl <= window);

    let second = store.increment(&key("10.0.0.1", "/predict_winner"), window).await.unwrap();
    assert_eq!(second.count, 2);
    assert!(!second.is_new_window);

    let other = store.increment(&key("10.0.0.2", "/predict_winner"), window).await.unwrap();
    assert_eq!(other.count, 1);

    assert!(store.is_healthy().await);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_window_expires_in_milliseconds() {
    let (_container, store) = start_store("test:expiry:").await;
    let window = Duration::from_millis(400);

    store.increment(&key("a", "/x"), window).await.unwrap();
    store.increment(&key("a", "/x"), window).await.unwrap();

    tokio::time::sleep(Duration::from_millis(600)).await;

    let fresh = store.increment(&key("a", "/x"), window).await.unwrap();
    assert_eq!(fresh.count, 1);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_limiter_admits_exactly_max_under_concurrency() {
    let (_container, store) = start_store("test:concurrency:").await;
    let policy = RateLimitPolicy::new(10, Duration::from_secs(60)).unwrap();
    let limiter = Arc::new(
        RateLimiter::new(Arc::new(store), policy).with_store_timeout(Duration::from_secs(2)),
    );
    let mut tasks = tokio::task::JoinSet::new();

    for _ in 0..50 {
        let limiter = limiter.clone();
        tasks.spawn(async move {
            limiter
                .check("10.0.0.9", "/predict_winner")
                .await
                .unwrap()
                .is_admit()
        });
    }

    let admitted = tasks.join_all().await.into_iter().filter(|a| *a).count();
    assert_eq!(admitted, 10);
}

#[tokio::test]
async fn test_connect_to_closed_port_fails() {
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();

    let result = RedisStore::connect(RedisStoreConfig {
        url: format!("redis://127.0.0.1:{port}"),
        connect_timeout: Duration::from_secs(2),
        ..RedisStoreConfig::default()
    })
    .await;

    assert!(result.is_err());
}
