//! End-to-end admission scenarios driven directly against the pipeline
//! handler, without a bound socket or a live upstream (none is available
//! in a test binary) — only outcomes that resolve before the upstream
//! forward (block / rate-limit / challenge / reserved-path) are covered
//! here.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{Method, StatusCode};

use sentinel::config::Config;
use sentinel::proxy::handle_request;
use sentinel::state::ServerContext;

fn peer() -> ConnectInfo<SocketAddr> {
    ConnectInfo("127.0.0.1:9999".parse().unwrap())
}

fn test_context(rate_limit_per_ip: u64) -> Arc<ServerContext> {
    let config = Config {
        rules_dir: "rules".to_owned(),
        rate_limit_per_ip,
        ..Config::default()
    };
    Arc::new(ServerContext::new(config).expect("server context builds"))
}

fn get(path: &str) -> Request<Body> {
    Request::builder().method(Method::GET).uri(path).body(Body::empty()).unwrap()
}

fn post(path: &str, client_ip: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(path)
        .header("x-forwarded-for", client_ip)
        .header("content-length", "3")
        .body(Body::from("a=1"))
        .unwrap()
}

#[tokio::test]
async fn reserved_api_paths_404_before_pipeline_runs() {
    let ctx = test_context(100);
    let response = handle_request(State(ctx), peer(), get("/api/status")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn blocked_ip_is_denied_with_403() {
    let ctx = test_context(100);
    ctx.blocker.block("198.51.100.50", "test", None);

    let request = Request::builder()
        .method(Method::GET)
        .uri("/")
        .header("x-forwarded-for", "198.51.100.50")
        .body(Body::empty())
        .unwrap();

    let response = handle_request(State(ctx), peer(), request).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn global_rate_limit_returns_429_once_exceeded() {
    let ctx = test_context(3);
    let ip = "203.0.113.9";

    let mut last_status = StatusCode::OK;
    for _ in 0..5 {
        let request = Request::builder()
            .method(Method::GET)
            .uri("/nonexistent-upstream-path")
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap();
        last_status = handle_request(State(ctx.clone()), peer(), request).await.status();
    }

    // The 4th/5th request exceed the per-IP limit of 3 and must be rejected
    // before any upstream forward is attempted.
    assert_eq!(last_status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn credential_stuffing_rule_escalates_to_block() {
    let ctx = test_context(1000);
    let ip = "198.51.100.77";

    let mut statuses = Vec::new();
    for _ in 0..8 {
        statuses.push(handle_request(State(ctx.clone()), peer(), post("/login", ip)).await.status());
    }

    // Login Protection allows 5/minute per IP; the 6th attempt already sits
    // at 120% usage, past the 95%-block rung, so it and everything after
    // must be hard-blocked (403), and the IP stays blocked once set.
    assert_eq!(statuses[5], StatusCode::FORBIDDEN);
    assert_eq!(statuses.last().copied().unwrap(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn distinct_ips_do_not_share_a_rate_limit_bucket() {
    let ctx = test_context(2);

    let a = handle_request(
        State(ctx.clone()),
        peer(),
        Request::builder()
            .method(Method::GET)
            .uri("/nope")
            .header("x-forwarded-for", "192.0.2.1")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    let b = handle_request(
        State(ctx.clone()),
        peer(),
        Request::builder()
            .method(Method::GET)
            .uri("/nope")
            .header("x-forwarded-for", "192.0.2.2")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    // Both are first-time requests from different IPs; neither should be
    // rate-limited yet (they may still 502 trying to reach a real
    // upstream, which is fine — we only assert they are not 429).
    assert_ne!(a.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_ne!(b.status(), StatusCode::TOO_MANY_REQUESTS);
}
