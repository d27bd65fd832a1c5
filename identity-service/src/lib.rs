pub mod clock;
pub mod config;
pub mod db;
pub mod dtos;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod store;
pub mod utils;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post, MethodRouter},
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::tracing::{request_id_middleware, REQUEST_ID_HEADER};
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

use crate::clock::Clock;
use crate::config::IdentityConfig;
use crate::db::UserRepository;
use crate::middleware::{
    pipeline_middleware, AuthStage, CsrfStage, DeadlineStage, Pipeline, RateLimitStage,
    TenantScope,
};
use crate::models::PLATFORM_HEADER;
use crate::services::{
    AuthService, CsrfService, RateLimitPolicies, RateLimitPolicy, RateLimiter, RouteClass,
    TokenCodec, TokenService,
};
use crate::store::{CounterStore, SessionStore};

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health_check,
        handlers::auth::login,
        handlers::auth::register,
        handlers::auth::refresh,
        handlers::auth::logout,
        handlers::auth::logout_all,
        handlers::token::csrf_token,
        handlers::user::get_me,
        handlers::tenant::tenant_context,
    ),
    components(
        schemas(
            dtos::ErrorResponse,
            dtos::auth::LoginRequest,
            dtos::auth::LoginResponse,
            dtos::auth::RegisterRequest,
            dtos::auth::RegisterResponse,
            dtos::auth::RefreshRequest,
            dtos::auth::LogoutResponse,
            dtos::auth::MeResponse,
            dtos::auth::TenantContextResponse,
            dtos::auth::HealthResponse,
            services::TokenPair,
            services::CsrfToken,
            models::Principal,
            models::PrincipalClaims,
            models::PublicUser,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Authentication", description = "Login, registration, token rotation and CSRF"),
        (name = "User", description = "The authenticated principal"),
        (name = "Tenant", description = "Tenant-scoped authorization"),
        (name = "Observability", description = "Service health"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: IdentityConfig,
    pub auth_service: Arc<AuthService>,
    pub tokens: Arc<TokenService>,
    pub csrf: Arc<CsrfService>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    /// Wires the services over the given stores. Fails if the signing
    /// configuration is unusable.
    pub fn new(
        config: IdentityConfig,
        clock: Arc<dyn Clock>,
        sessions: Arc<dyn SessionStore>,
        counters: Arc<dyn CounterStore>,
        users: Arc<dyn UserRepository>,
    ) -> Result<Self, AppError> {
        let store_timeout = config.request.store_timeout();

        let codec = Arc::new(TokenCodec::new(&config.jwt, clock)?);
        let tokens = Arc::new(TokenService::new(
            codec.clone(),
            config.jwt.clone(),
            sessions,
            store_timeout,
        ));
        let csrf = Arc::new(CsrfService::new(codec, config.jwt.csrf_ttl()));

        let rate_limiter = Arc::new(
            RateLimiter::new(
                counters.clone(),
                RateLimitPolicies::from_config(&config.rate_limit),
                config.rate_limit.fail_open,
                store_timeout,
            )
            .with_trusted_proxies(config.rate_limit.trusted_proxies.clone()),
        );

        let failure_policy = RateLimitPolicy::new(
            config.rate_limit.login_failure_max_attempts,
            config.rate_limit.login_failure_window_seconds,
        );
        let auth_service = Arc::new(AuthService::new(
            users,
            tokens.clone(),
            counters,
            failure_policy,
            store_timeout,
        ));

        Ok(Self {
            config,
            auth_service,
            tokens,
            csrf,
            rate_limiter,
        })
    }
}

/// Stage sets shared by the routes.
struct Pipelines<'a> {
    state: &'a AppState,
}

impl Pipelines<'_> {
    fn deadline(&self) -> Pipeline {
        Pipeline::new().stage(DeadlineStage::new(self.state.config.request.timeout()))
    }

    fn public(&self, class: RouteClass) -> Pipeline {
        self.deadline()
            .stage(RateLimitStage::new(self.state.rate_limiter.clone(), class))
    }

    fn authenticated(&self, scope: TenantScope) -> Pipeline {
        self.public(RouteClass::Api)
            .stage(AuthStage::new(self.state.tokens.clone(), scope))
    }

    fn mutating(&self) -> Pipeline {
        self.authenticated(TenantScope::None)
            .stage(CsrfStage::new(self.state.csrf.clone()))
    }
}

fn guarded(
    path: &str,
    method_router: MethodRouter<AppState>,
    pipeline: Pipeline,
) -> Router<AppState> {
    Router::new()
        .route(path, method_router)
        .route_layer(from_fn_with_state(Arc::new(pipeline), pipeline_middleware))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(middleware::CSRF_HEADER),
            HeaderName::from_static(middleware::guard::TENANT_HEADER),
            HeaderName::from_static(PLATFORM_HEADER),
            HeaderName::from_static(REQUEST_ID_HEADER),
        ]);

    // Credentialed CORS cannot be combined with a wildcard origin.
    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(AllowOrigin::any());
    }

    layer
        .allow_origin(
            origins
                .iter()
                .filter_map(|o| match o.parse::<HeaderValue>() {
                    Ok(value) => Some(value),
                    Err(e) => {
                        tracing::error!("Invalid CORS origin '{}': {}. Skipping.", o, e);
                        None
                    }
                })
                .collect::<Vec<HeaderValue>>(),
        )
        .allow_credentials(true)
}

pub fn build_router(state: AppState) -> Result<Router, AppError> {
    let pipelines = Pipelines { state: &state };

    let app = Router::new()
        .merge(guarded(
            "/auth/login",
            post(handlers::auth::login),
            pipelines.public(RouteClass::Login),
        ))
        .merge(guarded(
            "/auth/register",
            post(handlers::auth::register),
            pipelines.public(RouteClass::Register),
        ))
        .merge(guarded(
            "/auth/refresh",
            post(handlers::auth::refresh),
            pipelines.public(RouteClass::Refresh),
        ))
        .merge(guarded(
            "/auth/logout",
            post(handlers::auth::logout),
            pipelines.mutating(),
        ))
        .merge(guarded(
            "/auth/logout-all",
            post(handlers::auth::logout_all),
            pipelines.mutating(),
        ))
        .merge(guarded(
            "/token/csrf",
            get(handlers::token::csrf_token),
            pipelines.authenticated(TenantScope::None),
        ))
        .merge(guarded(
            "/users/me",
            get(handlers::user::get_me),
            pipelines.authenticated(TenantScope::None),
        ))
        .merge(guarded(
            "/tenants/:tenant_id/context",
            get(handlers::tenant::tenant_context),
            pipelines.authenticated(TenantScope::Required),
        ))
        .merge(guarded(
            "/health",
            get(handlers::health::health_check),
            pipelines.deadline(),
        ))
        .route(
            "/.well-known/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        .with_state(state.clone())
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                    user_id = tracing::field::Empty,
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(cors_layer(&state.config.security.allowed_origins));

    Ok(app)
}
