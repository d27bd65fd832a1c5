mod common;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Method, Request, StatusCode};
use common::{TestApp, PASSWORD};
use identity_service::{
    clock::{Clock, ManualClock},
    error::AuthError,
    services::{
        CallerIdentity, RateLimitPolicies, RateLimitPolicy, RateLimiter, RouteClass,
        TrustedProxies,
    },
    store::MemoryCounterStore,
};
use serde_json::json;
use service_core::context::RequestContext;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

fn peer(ip: &str) -> ConnectInfo<SocketAddr> {
    ConnectInfo(SocketAddr::new(ip.parse().unwrap(), 40_000))
}

fn login_via(peer_ip: &str, forwarded_for: Option<&str>, password: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/auth/login")
        .header("content-type", "application/json")
        .extension(peer(peer_ip));
    if let Some(forwarded_for) = forwarded_for {
        builder = builder.header("x-forwarded-for", forwarded_for);
    }
    builder
        .body(Body::from(
            json!({ "identifier": "ada", "password": password }).to_string(),
        ))
        .unwrap()
}

fn login_from(ip: &str, password: &str) -> Request<Body> {
    login_via(ip, None, password)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_never_exceed_the_quota() {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::at_timestamp(common::START));
    let mut policies = RateLimitPolicies::default();
    policies.api = RateLimitPolicy::new(10, 60);
    let limiter = Arc::new(RateLimiter::new(
        Arc::new(MemoryCounterStore::new(clock)),
        policies,
        false,
        Duration::from_secs(1),
    ));
    let caller = CallerIdentity::Ip(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7)));

    let handles: Vec<_> = (0..50)
        .map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move {
                let ctx = RequestContext::with_timeout(Duration::from_secs(5));
                limiter.check(&ctx, RouteClass::Api, &caller).await
            })
        })
        .collect();

    let mut allowed = 0;
    let mut limited = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => allowed += 1,
            Err(AuthError::RateLimited { retry_after }) => {
                assert!(retry_after >= 1 && retry_after <= 60);
                limited += 1;
            }
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(allowed, 10);
    assert_eq!(limited, 40);
}

#[tokio::test]
async fn login_route_returns_429_with_retry_after() {
    let app = TestApp::new();

    // Five attempts are allowed per window; they need not succeed.
    for _ in 0..5 {
        let res = app.send(login_from("198.51.100.4", "Wr0ng&Password")).await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    }

    let res = app.send(login_from("198.51.100.4", PASSWORD)).await;
    assert_eq!(res.status, StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = res
        .headers
        .get("retry-after")
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after > 0 && retry_after <= 900);

    // Another caller has its own budget.
    let res = app.send(login_from("198.51.100.5", PASSWORD)).await;
    assert_eq!(res.status, StatusCode::OK);
}

#[tokio::test]
async fn quota_resets_after_the_window() {
    let app = TestApp::new();
    let register = || {
        Request::builder()
            .method(Method::POST)
            .uri("/auth/register")
            .header("content-type", "application/json")
            .extension(peer("192.0.2.10"))
            .body(Body::from("{}"))
            .unwrap()
    };

    for _ in 0..3 {
        let res = app.send(register()).await;
        assert_ne!(res.status, StatusCode::TOO_MANY_REQUESTS);
    }
    let res = app.send(register()).await;
    assert_eq!(res.status, StatusCode::TOO_MANY_REQUESTS);

    app.clock.advance(chrono::Duration::seconds(3600));

    let res = app.send(register()).await;
    assert_ne!(res.status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn responses_carry_quota_headers() {
    let app = TestApp::new();

    let res = app.send(login_from("198.51.100.9", PASSWORD)).await;

    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.headers.get("x-ratelimit-limit").unwrap(), "5");
    assert_eq!(res.headers.get("x-ratelimit-remaining").unwrap(), "4");
}

#[tokio::test]
async fn forged_forwarded_for_does_not_buy_new_quota() {
    let app = TestApp::new();

    let mut admitted = 0;
    for i in 0..20 {
        let forged = format!("10.9.0.{}", i);
        let res = app
            .send(login_via("203.0.113.50", Some(&forged), "Wr0ng&Password"))
            .await;
        if res.status != StatusCode::TOO_MANY_REQUESTS {
            admitted += 1;
        }
    }

    assert_eq!(admitted, 5);
}

#[tokio::test]
async fn trusted_proxy_forwards_the_client_address() {
    let mut config = common::test_config();
    config.rate_limit.trusted_proxies = TrustedProxies::parse_list("10.0.0.0/8").unwrap();
    let app = TestApp::with_config(config);

    // Spoofed entries to the left of the real client are ignored.
    for _ in 0..5 {
        let res = app
            .send(login_via("10.0.0.2", Some("6.6.6.6, 198.51.100.1"), PASSWORD))
            .await;
        assert_eq!(res.status, StatusCode::OK);
    }
    let res = app
        .send(login_via("10.0.0.2", Some("7.7.7.7, 198.51.100.1"), PASSWORD))
        .await;
    assert_eq!(res.status, StatusCode::TOO_MANY_REQUESTS);

    // A different client behind the same proxy has its own budget.
    let res = app
        .send(login_via("10.0.0.2", Some("198.51.100.2"), PASSWORD))
        .await;
    assert_eq!(res.status, StatusCode::OK);
}
