//! Shared setup for router-level tests: memory-backed stores, a manual clock
//! and one seeded tenant user.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use identity_service::{
    build_router,
    clock::{Clock, ManualClock},
    config::{
        Environment, IdentityConfig, JwtConfig, RateLimitConfig, RedisConfig, RequestConfig,
        SecurityConfig,
    },
    db::InMemoryUserRepository,
    models::{Membership, Permission, Role, UserRecord},
    store::{MemoryCounterStore, MemorySessionStore},
    utils::{hash_password, Password},
    AppState,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::util::ServiceExt;
use uuid::Uuid;

pub const SECRET: &str = "0123456789abcdef0123456789abcdef";
pub const ISSUER: &str = "identity-test";
pub const PASSWORD: &str = "Tr0ub4dor&3x";
pub const START: i64 = 1_700_000_000;

pub fn test_config() -> IdentityConfig {
    IdentityConfig {
        common: service_core::config::Config::default(),
        environment: Environment::Dev,
        service_name: "identity-service".to_string(),
        service_version: "test".to_string(),
        log_level: "error".to_string(),
        redis: RedisConfig {
            url: "redis://127.0.0.1:6379".to_string(),
        },
        jwt: JwtConfig::new(SECRET, ISSUER),
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
        },
        rate_limit: RateLimitConfig::default(),
        request: RequestConfig::default(),
    }
}

pub fn role(name: &str, permissions: &[(&str, &str)]) -> Role {
    Role {
        role_id: Uuid::new_v4(),
        name: name.to_string(),
        permissions: permissions
            .iter()
            .map(|(resource, action)| Permission::new(resource, action))
            .collect(),
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub clock: Arc<ManualClock>,
    pub users: Arc<InMemoryUserRepository>,
    pub tenant_id: Uuid,
    pub user: UserRecord,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: IdentityConfig) -> Self {
        let clock = Arc::new(ManualClock::at_timestamp(START));
        let dyn_clock: Arc<dyn Clock> = clock.clone();

        let users = Arc::new(
            InMemoryUserRepository::new(dyn_clock.clone()).with_default_membership(Membership {
                tenant_id: None,
                user_tenant_id: None,
                role: role("member", &[]),
            }),
        );

        let tenant_id = Uuid::new_v4();
        let user = Self::seed_user(
            &users,
            "ada",
            "ada@example.com",
            Some(Membership {
                tenant_id: Some(tenant_id),
                user_tenant_id: Some(Uuid::new_v4()),
                role: role("tenant_admin", &[("tenant", "read"), ("invoice", "write")]),
            }),
        );

        let state = AppState::new(
            config,
            dyn_clock.clone(),
            Arc::new(MemorySessionStore::new(dyn_clock.clone())),
            Arc::new(MemoryCounterStore::new(dyn_clock)),
            users.clone(),
        )
        .expect("Failed to build app state");
        let router = build_router(state.clone()).expect("Failed to build router");

        Self {
            router,
            state,
            clock,
            users,
            tenant_id,
            user,
        }
    }

    pub fn seed_user(
        users: &InMemoryUserRepository,
        username: &str,
        email: &str,
        membership: Option<Membership>,
    ) -> UserRecord {
        let user = UserRecord {
            user_id: Uuid::new_v4(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            username: username.to_string(),
            email: email.to_string(),
            phone: None,
            password_hash: hash_password(&Password::new(PASSWORD.to_string()))
                .expect("Failed to hash password"),
            is_active: true,
            last_login_at: None,
            created_at: chrono::Utc::now(),
        };
        users
            .insert(user.clone(), membership)
            .expect("Failed to seed user");
        user
    }

    pub async fn send(&self, req: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        TestResponse {
            status,
            headers,
            body,
        }
    }

    /// Logs the seeded user in and returns the token response body.
    pub async fn login(&self) -> Value {
        self.login_as("ada@example.com").await
    }

    pub async fn login_as(&self, identifier: &str) -> Value {
        let res = self
            .send(json_request(
                Method::POST,
                "/auth/login",
                json!({ "identifier": identifier, "password": PASSWORD }),
            ))
            .await;
        assert_eq!(res.status, StatusCode::OK, "login failed: {}", res.body);
        res.body
    }

    /// Fetches a CSRF token for the bearer and returns `(token, cookie)`.
    pub async fn csrf(&self, access_token: &str) -> (String, String) {
        let res = self
            .send(bearer_request(Method::GET, "/token/csrf", access_token))
            .await;
        assert_eq!(res.status, StatusCode::OK, "csrf failed: {}", res.body);
        let cookie = res
            .headers
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .expect("CSRF cookie missing")
            .to_string();
        let token = res.body["csrf_token"].as_str().unwrap().to_string();
        (token, cookie)
    }
}

pub fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn bearer_request(method: Method, uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

pub fn token_of<'a>(body: &'a Value, field: &str) -> &'a str {
    body[field].as_str().expect("token field missing")
}
