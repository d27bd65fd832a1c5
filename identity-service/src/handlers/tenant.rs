use axum::Json;
use service_core::error::AppError;

use crate::{
    dtos::auth::TenantContextResponse,
    middleware::{AuthPrincipal, TenantGuardContext},
};

/// Tenant context of the caller for the addressed tenant
#[utoipa::path(
    get,
    path = "/tenants/{tenant_id}/context",
    params(("tenant_id" = Uuid, Path, description = "Addressed tenant")),
    responses(
        (status = 200, description = "Caller is authorized for the tenant", body = TenantContextResponse),
        (status = 400, description = "Tenant id missing or malformed", body = ErrorResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorResponse),
        (status = 403, description = "Token belongs to another tenant or lacks tenant:read", body = ErrorResponse)
    ),
    tag = "Tenant",
    security(("bearer_auth" = []))
)]
pub async fn tenant_context(
    AuthPrincipal(principal): AuthPrincipal,
    tenant: TenantGuardContext,
) -> Result<Json<TenantContextResponse>, AppError> {
    principal.require("tenant", "read")?;

    Ok(Json(TenantContextResponse {
        tenant_id: tenant.tenant_id,
        user_id: tenant.user_id,
        user_tenant_id: tenant.user_tenant_id,
        role_names: principal.claims.role_names,
        permissions: principal.claims.permission_names,
    }))
}
