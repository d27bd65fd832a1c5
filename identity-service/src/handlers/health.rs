use axum::{extract::State, Json};
use service_core::error::AppError;

use crate::{dtos::auth::HealthResponse, middleware::RequestScope, AppState};

/// Service and backing store health
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Backing store unavailable", body = ErrorResponse)
    ),
    tag = "Observability"
)]
pub async fn health_check(
    State(state): State<AppState>,
    RequestScope(ctx): RequestScope,
) -> Result<Json<HealthResponse>, AppError> {
    state.tokens.health_check(&ctx).await.map_err(|e| {
        tracing::error!(error = %e, "Health check failed");
        e
    })?;

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        service: state.config.service_name.clone(),
        version: state.config.service_version.clone(),
        store: "up".to_string(),
    }))
}
