use axum::{extract::State, response::IntoResponse, Json};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use service_core::error::AppError;

use crate::{
    config::Environment,
    middleware::{AuthPrincipal, CSRF_COOKIE},
    AppState,
};

/// Issue a CSRF token for the authenticated principal
///
/// The token is returned in the body and mirrored in the `XSRF-TOKEN` cookie;
/// state-changing requests echo it in the `X-XSRF-TOKEN` header.
#[utoipa::path(
    get,
    path = "/token/csrf",
    responses(
        (status = 200, description = "CSRF token issued", body = CsrfToken),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(("bearer_auth" = []))
)]
pub async fn csrf_token(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    let token = state
        .csrf
        .issue_csrf_token(principal.user_id(), &principal.claims.email)?;

    // Readable by scripts so the client can echo it in the header.
    let cookie = Cookie::build((CSRF_COOKIE, token.csrf_token.clone()))
        .path("/")
        .same_site(SameSite::Strict)
        .secure(state.config.environment == Environment::Prod)
        .max_age(time::Duration::seconds(token.expires_in))
        .build();

    Ok((jar.add(cookie), Json(token)))
}
