mod common;

use axum::http::{Method, StatusCode};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Duration;
use common::{bearer_request, json_request, token_of, TestApp, ISSUER, SECRET};
use identity_service::{clock::Clock, config::JwtConfig, services::TokenCodec};
use serde_json::{json, Value};
use std::sync::Arc;

fn segments(token: &str) -> (String, String, String) {
    let mut parts = token.split('.').map(str::to_string);
    (
        parts.next().unwrap(),
        parts.next().unwrap(),
        parts.next().unwrap(),
    )
}

fn encode_json(value: &Value) -> String {
    URL_SAFE_NO_PAD.encode(value.to_string())
}

fn decode_json(segment: &str) -> Value {
    serde_json::from_slice(&URL_SAFE_NO_PAD.decode(segment).unwrap()).unwrap()
}

async fn me_status(app: &TestApp, token: &str) -> StatusCode {
    app.send(bearer_request(Method::GET, "/users/me", token))
        .await
        .status
}

#[tokio::test]
async fn access_token_is_accepted_until_the_second_it_expires() {
    let app = TestApp::new();
    let tokens = app.login().await;
    let access = token_of(&tokens, "access_token");

    let res = app.send(bearer_request(Method::GET, "/users/me", access)).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["principal"]["user_id"], app.user.user_id.to_string());
    assert_eq!(res.body["principal"]["tenant_id"], app.tenant_id.to_string());

    app.clock.advance(Duration::seconds(15 * 60 - 1));
    assert_eq!(me_status(&app, access).await, StatusCode::OK);

    app.clock.advance(Duration::seconds(1));
    assert_eq!(me_status(&app, access).await, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn missing_or_malformed_bearer_is_rejected() {
    let app = TestApp::new();

    let res = app
        .send(
            axum::http::Request::builder()
                .uri("/users/me")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);

    assert_eq!(me_status(&app, "not-a-token").await, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unsigned_and_foreign_algorithm_tokens_are_rejected() {
    let app = TestApp::new();
    let tokens = app.login().await;
    let (_, payload, signature) = segments(token_of(&tokens, "access_token"));

    let none = format!(
        "{}.{}.",
        encode_json(&json!({ "alg": "none", "typ": "JWT" })),
        payload
    );
    assert_eq!(me_status(&app, &none).await, StatusCode::UNAUTHORIZED);

    let rs256 = format!(
        "{}.{}.{}",
        encode_json(&json!({ "alg": "RS256", "typ": "JWT" })),
        payload,
        signature
    );
    assert_eq!(me_status(&app, &rs256).await, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn tampered_claims_break_the_signature() {
    let app = TestApp::new();
    let tokens = app.login().await;
    let (header, payload, signature) = segments(token_of(&tokens, "access_token"));

    let mut claims = decode_json(&payload);
    claims["tenant_id"] = json!(uuid::Uuid::new_v4().to_string());
    claims["permission_names"] = json!(["tenant:admin"]);
    let forged = format!("{}.{}.{}", header, encode_json(&claims), signature);

    assert_eq!(me_status(&app, &forged).await, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn tokens_from_another_key_or_issuer_are_rejected() {
    let app = TestApp::new();
    let tokens = app.login().await;
    let claims = app
        .state
        .tokens
        .verify_access_token(token_of(&tokens, "access_token"))
        .unwrap();
    let clock: Arc<dyn Clock> = app.clock.clone();

    let other_key = TokenCodec::new(
        &JwtConfig::new("fedcba9876543210fedcba9876543210", ISSUER),
        clock.clone(),
    )
    .unwrap();
    let token = other_key.sign(&claims).unwrap();
    assert_eq!(me_status(&app, &token).await, StatusCode::UNAUTHORIZED);

    let same_key = TokenCodec::new(&JwtConfig::new(SECRET, ISSUER), clock).unwrap();
    let mut wrong_issuer = claims.clone();
    wrong_issuer.registered.iss = "someone-else".to_string();
    let token = same_key.sign(&wrong_issuer).unwrap();
    assert_eq!(me_status(&app, &token).await, StatusCode::UNAUTHORIZED);

    // Control: the same claims re-signed with the service key still pass.
    let token = same_key.sign(&claims).unwrap();
    assert_eq!(me_status(&app, &token).await, StatusCode::OK);
}

#[tokio::test]
async fn not_yet_valid_token_is_rejected() {
    let app = TestApp::new();
    let tokens = app.login().await;
    let mut claims = app
        .state
        .tokens
        .verify_access_token(token_of(&tokens, "access_token"))
        .unwrap();
    claims.registered.nbf = app.clock.timestamp() + 60;

    let codec = TokenCodec::new(&JwtConfig::new(SECRET, ISSUER), app.clock.clone()).unwrap();
    let token = codec.sign(&claims).unwrap();

    assert_eq!(me_status(&app, &token).await, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn token_kinds_are_not_interchangeable() {
    let app = TestApp::new();
    let tokens = app.login().await;

    assert_eq!(
        me_status(&app, token_of(&tokens, "refresh_token")).await,
        StatusCode::UNAUTHORIZED
    );

    let res = app
        .send(json_request(
            Method::POST,
            "/auth/refresh",
            json!({ "refresh_token": token_of(&tokens, "access_token") }),
        ))
        .await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
}
