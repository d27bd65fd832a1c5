use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::models::{Principal, PublicUser};
use crate::services::TokenPair;
use crate::utils::validation::validate_e164;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    /// E-mail address or username.
    #[validate(length(min = 1, message = "Identifier is required"))]
    #[schema(example = "user@example.com")]
    pub identifier: String,

    #[validate(length(min = 1, message = "Password is required"))]
    #[schema(example = "Tr0ub4dor&3")]
    pub password: String,

    #[serde(default)]
    pub remember_me: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoginResponse {
    #[serde(flatten)]
    pub tokens: TokenPair,
    pub user: PublicUser,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RegisterRequest {
    #[validate(length(min = 2, message = "First name must be at least 2 characters"))]
    #[schema(example = "Ada")]
    pub first_name: String,

    #[validate(length(min = 2, message = "Last name must be at least 2 characters"))]
    #[schema(example = "Lovelace")]
    pub last_name: String,

    #[validate(length(min = 2, message = "Username must be at least 2 characters"))]
    #[schema(example = "ada")]
    pub username: String,

    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "ada@example.com")]
    pub email: String,

    #[validate(custom(function = "validate_e164"))]
    #[schema(example = "+14155550100")]
    pub phone: Option<String>,

    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    #[schema(example = "Tr0ub4dor&3", min_length = 8)]
    pub password: String,

    #[validate(must_match(other = "password", message = "Passwords do not match"))]
    pub confirm_password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RegisterResponse {
    pub user: PublicUser,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RefreshRequest {
    #[validate(length(min = 1, message = "Refresh token is required"))]
    pub refresh_token: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LogoutResponse {
    #[schema(example = 1)]
    pub revoked_sessions: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MeResponse {
    pub principal: Principal,
}

/// Result of the tenant guard for the addressed tenant.
#[derive(Debug, Serialize, ToSchema)]
pub struct TenantContextResponse {
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_tenant_id: Option<Uuid>,
    pub role_names: Vec<String>,
    pub permissions: Vec<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    #[schema(example = "ok")]
    pub status: String,
    pub service: String,
    pub version: String,
    #[schema(example = "ok")]
    pub store: String,
}
