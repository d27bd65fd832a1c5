use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;

use crate::{
    dtos::auth::{LoginRequest, LogoutResponse, RefreshRequest, RegisterRequest, RegisterResponse},
    middleware::{AuthPrincipal, RequestScope},
    models::{ClientPlatform, PLATFORM_HEADER},
    services::CallerIdentity,
    utils::ValidatedJson,
    AppState,
};

fn platform(headers: &HeaderMap) -> ClientPlatform {
    ClientPlatform::from_header(headers.get(PLATFORM_HEADER).and_then(|v| v.to_str().ok()))
}

/// Login with e-mail or username and password
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    params(("X-Platform" = Option<String>, Header, description = "`mobile` selects the mobile token lifetimes")),
    responses(
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 401, description = "Invalid credentials or inactive account", body = ErrorResponse),
        (status = 429, description = "Too many attempts", body = ErrorResponse),
        (status = 503, description = "Backing store unavailable", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn login(
    State(state): State<AppState>,
    RequestScope(ctx): RequestScope,
    caller: CallerIdentity,
    headers: HeaderMap,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let res = state
        .auth_service
        .login(&ctx, req, &caller, platform(&headers))
        .await?;
    Ok((StatusCode::OK, Json(res)))
}

/// Register a new account
#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = RegisterResponse),
        (status = 400, description = "Validation error or weak password", body = ErrorResponse),
        (status = 409, description = "E-mail, username or phone already registered", body = ErrorResponse),
        (status = 429, description = "Too many attempts", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn register(
    State(state): State<AppState>,
    RequestScope(ctx): RequestScope,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = state.auth_service.register(&ctx, req).await?;
    Ok((StatusCode::CREATED, Json(RegisterResponse { user })))
}

/// Exchange a refresh token for a new token pair
#[utoipa::path(
    post,
    path = "/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Token pair rotated", body = TokenPair),
        (status = 401, description = "Invalid, expired, reused or revoked token", body = ErrorResponse),
        (status = 429, description = "Too many attempts", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn refresh(
    State(state): State<AppState>,
    RequestScope(ctx): RequestScope,
    ValidatedJson(req): ValidatedJson<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
    let pair = state
        .tokens
        .refresh_token_pair(&ctx, &req.refresh_token)
        .await?;
    Ok((StatusCode::OK, Json(pair)))
}

/// End the current session
#[utoipa::path(
    post,
    path = "/auth/logout",
    params(("X-XSRF-TOKEN" = String, Header, description = "CSRF token from /token/csrf")),
    responses(
        (status = 200, description = "Session revoked", body = LogoutResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorResponse),
        (status = 403, description = "Missing or invalid CSRF token", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(("bearer_auth" = []))
)]
pub async fn logout(
    State(state): State<AppState>,
    RequestScope(ctx): RequestScope,
    AuthPrincipal(principal): AuthPrincipal,
) -> Result<impl IntoResponse, AppError> {
    let revoked_sessions = state.auth_service.logout(&ctx, &principal).await?;
    Ok((StatusCode::OK, Json(LogoutResponse { revoked_sessions })))
}

/// End every session of the current user
#[utoipa::path(
    post,
    path = "/auth/logout-all",
    params(("X-XSRF-TOKEN" = String, Header, description = "CSRF token from /token/csrf")),
    responses(
        (status = 200, description = "Sessions revoked", body = LogoutResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorResponse),
        (status = 403, description = "Missing or invalid CSRF token", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(("bearer_auth" = []))
)]
pub async fn logout_all(
    State(state): State<AppState>,
    RequestScope(ctx): RequestScope,
    AuthPrincipal(principal): AuthPrincipal,
) -> Result<impl IntoResponse, AppError> {
    let revoked_sessions = state.auth_service.logout_all(&ctx, &principal).await?;
    Ok((StatusCode::OK, Json(LogoutResponse { revoked_sessions })))
}
