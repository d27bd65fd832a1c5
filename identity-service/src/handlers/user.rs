use axum::Json;

use crate::{dtos::auth::MeResponse, middleware::AuthPrincipal};

/// The authenticated principal as carried by the access token
#[utoipa::path(
    get,
    path = "/users/me",
    responses(
        (status = 200, description = "Current principal", body = MeResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorResponse)
    ),
    tag = "User",
    security(("bearer_auth" = []))
)]
pub async fn get_me(AuthPrincipal(principal): AuthPrincipal) -> Json<MeResponse> {
    Json(MeResponse { principal })
}
