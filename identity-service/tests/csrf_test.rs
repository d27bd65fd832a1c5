mod common;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
};
use common::{bearer_request, json_request, role, token_of, TestApp};
use identity_service::models::Membership;
use serde_json::json;

fn logout_request(path: &str, access: &str, csrf: Option<&str>, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(path)
        .header(header::AUTHORIZATION, format!("Bearer {}", access));
    if let Some(csrf) = csrf {
        builder = builder.header("x-xsrf-token", csrf);
    }
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn csrf_endpoint_returns_token_and_cookie() {
    let app = TestApp::new();
    let tokens = app.login().await;

    let res = app
        .send(bearer_request(Method::GET, "/token/csrf", token_of(&tokens, "access_token")))
        .await;

    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["expires_in"], 60);
    let token = res.body["csrf_token"].as_str().unwrap();
    let cookie = res.headers.get(header::SET_COOKIE).unwrap().to_str().unwrap();
    assert!(cookie.starts_with(&format!("XSRF-TOKEN={}", token)));
    assert!(cookie.contains("SameSite=Strict"));
    assert!(cookie.contains("Path=/"));
    assert!(cookie.contains("Max-Age=60"));
    // Scripts must read it, and dev runs over plain HTTP.
    assert!(!cookie.contains("HttpOnly"));
    assert!(!cookie.contains("Secure"));
}

#[tokio::test]
async fn csrf_endpoint_requires_authentication() {
    let app = TestApp::new();

    let res = app
        .send(
            Request::builder()
                .uri("/token/csrf")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_requires_csrf_token() {
    let app = TestApp::new();
    let tokens = app.login().await;
    let access = token_of(&tokens, "access_token");

    let res = app.send(logout_request("/auth/logout", access, None, None)).await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);

    let (csrf, cookie) = app.csrf(access).await;
    let res = app
        .send(logout_request("/auth/logout", access, Some(&csrf), Some(&cookie)))
        .await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    assert_eq!(res.body["revoked_sessions"], 1);

    // The session is gone: neither the access nor the refresh token works.
    let res = app.send(bearer_request(Method::GET, "/users/me", access)).await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    let res = app
        .send(json_request(
            Method::POST,
            "/auth/refresh",
            json!({ "refresh_token": token_of(&tokens, "refresh_token") }),
        ))
        .await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn csrf_token_of_another_principal_is_rejected() {
    let app = TestApp::new();
    TestApp::seed_user(
        &app.users,
        "grace",
        "grace@example.com",
        Some(Membership {
            tenant_id: Some(app.tenant_id),
            user_tenant_id: None,
            role: role("member", &[]),
        }),
    );
    let ada = app.login().await;
    let grace = app.login_as("grace").await;

    let (grace_csrf, _) = app.csrf(token_of(&grace, "access_token")).await;

    let res = app
        .send(logout_request(
            "/auth/logout",
            token_of(&ada, "access_token"),
            Some(&grace_csrf),
            None,
        ))
        .await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn cookie_and_header_must_match() {
    let app = TestApp::new();
    let tokens = app.login().await;
    let access = token_of(&tokens, "access_token");
    let (csrf, _) = app.csrf(access).await;

    let res = app
        .send(logout_request(
            "/auth/logout",
            access,
            Some(&csrf),
            Some("XSRF-TOKEN=something-else"),
        ))
        .await;

    assert_eq!(res.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn expired_csrf_token_is_rejected() {
    let app = TestApp::new();
    let tokens = app.login().await;
    let access = token_of(&tokens, "access_token");
    let (csrf, _) = app.csrf(access).await;

    app.clock.advance(chrono::Duration::seconds(60));

    let res = app
        .send(logout_request("/auth/logout", access, Some(&csrf), None))
        .await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn logout_all_ends_every_session_of_the_user() {
    let app = TestApp::new();
    let first = app.login().await;
    let second = app.login().await;
    let access = token_of(&first, "access_token");
    let (csrf, _) = app.csrf(access).await;

    let res = app
        .send(logout_request("/auth/logout-all", access, Some(&csrf), None))
        .await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    assert_eq!(res.body["revoked_sessions"], 2);

    let res = app
        .send(bearer_request(Method::GET, "/users/me", token_of(&second, "access_token")))
        .await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
}
