//! Per-request authentication and tenant scoping.
//!
//! The guard walks `Unauthenticated → TokenParsed → ClaimsVerified →
//! TenantChecked → Authorized`; a failure at any step rejects the request
//! and reports the state it was in.

use http::{header, HeaderMap};
use serde::Serialize;
use service_core::context::RequestContext;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::AuthError;
use crate::models::Principal;
use crate::services::TokenService;

pub const TENANT_HEADER: &str = "x-tenant-id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    Unauthenticated,
    TokenParsed,
    ClaimsVerified,
    TenantChecked,
    Authorized,
}

/// Whether a route addresses a single tenant's resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenantScope {
    None,
    Required,
}

/// The tenant a request was authorized for. Lives only as long as the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct TenantGuardContext {
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub user_tenant_id: Option<Uuid>,
}

#[derive(Debug)]
pub struct GuardRejection {
    pub state: GuardState,
    pub error: AuthError,
}

#[derive(Debug)]
pub struct GuardOutcome {
    pub principal: Principal,
    pub tenant: Option<TenantGuardContext>,
}

pub struct AuthGuard<'a> {
    tokens: &'a TokenService,
    scope: TenantScope,
}

fn advance(state: &mut GuardState, next: GuardState) {
    tracing::debug!(from = ?*state, to = ?next, "Auth guard transition");
    *state = next;
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Path parameter wins over the header. Absent or malformed is `TenantRequired`.
pub fn addressed_tenant(path_tenant: Option<&str>, headers: &HeaderMap) -> Result<Uuid, AuthError> {
    let raw = path_tenant.or_else(|| {
        headers
            .get(TENANT_HEADER)
            .and_then(|value| value.to_str().ok())
    });

    raw.and_then(|value| Uuid::parse_str(value.trim()).ok())
        .ok_or(AuthError::TenantRequired)
}

impl<'a> AuthGuard<'a> {
    pub fn new(tokens: &'a TokenService, scope: TenantScope) -> Self {
        Self { tokens, scope }
    }

    pub async fn check(
        &self,
        ctx: &RequestContext,
        headers: &HeaderMap,
        path_tenant: Option<&str>,
    ) -> Result<GuardOutcome, GuardRejection> {
        let mut state = GuardState::Unauthenticated;
        let reject = |state: GuardState, error: AuthError| GuardRejection { state, error };

        let token = bearer_token(headers).ok_or_else(|| reject(state, AuthError::Unauthorized))?;
        advance(&mut state, GuardState::TokenParsed);

        let principal = self.tokens.authenticate(ctx, token).await.map_err(|e| {
            if e.is_credential_failure() {
                tracing::debug!(error = %e, "Access token rejected");
                reject(state, AuthError::Unauthorized)
            } else {
                reject(state, e)
            }
        })?;
        advance(&mut state, GuardState::ClaimsVerified);

        let tenant = match self.scope {
            TenantScope::None => None,
            TenantScope::Required => {
                let addressed = addressed_tenant(path_tenant, headers).map_err(|e| reject(state, e))?;
                if principal.tenant_id() != Some(addressed) {
                    tracing::warn!(
                        user_id = %principal.user_id(),
                        token_tenant = ?principal.tenant_id(),
                        addressed_tenant = %addressed,
                        "Tenant mismatch"
                    );
                    return Err(reject(state, AuthError::TenantMismatch));
                }
                Some(TenantGuardContext {
                    tenant_id: addressed,
                    user_id: principal.user_id(),
                    user_tenant_id: principal.claims.user_tenant_id,
                })
            }
        };
        advance(&mut state, GuardState::TenantChecked);

        advance(&mut state, GuardState::Authorized);
        Ok(GuardOutcome { principal, tenant })
    }
}
