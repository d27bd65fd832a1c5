use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::AuthError;
use crate::models::claims::{PrincipalClaims, TokenClaims};

/// An authenticated caller, as attached to the request by the auth guard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Principal {
    #[serde(flatten)]
    pub claims: PrincipalClaims,
    pub session_id: Uuid,
    pub token_id: Uuid,
    pub expires_at: i64,
}

impl Principal {
    pub fn from_token(claims: TokenClaims) -> Self {
        Self {
            session_id: claims.sid,
            token_id: claims.registered.jti,
            expires_at: claims.registered.exp,
            claims: claims.principal,
        }
    }

    pub fn user_id(&self) -> Uuid {
        self.claims.user_id
    }

    pub fn tenant_id(&self) -> Option<Uuid> {
        self.claims.tenant_id
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.claims.role_names.iter().any(|r| r == role)
    }

    pub fn has_permission(&self, name: &str) -> bool {
        self.claims.permission_names.iter().any(|p| p == name)
    }

    /// Whether any granted permission pairs `resource` with `action`.
    pub fn can(&self, resource: &str, action: &str) -> bool {
        self.claims
            .permission_resources
            .iter()
            .zip(self.claims.permission_actions.iter())
            .any(|(r, a)| r == resource && a == action)
    }

    pub fn require(&self, resource: &str, action: &str) -> Result<(), AuthError> {
        if self.can(resource, action) {
            Ok(())
        } else {
            tracing::warn!(
                user_id = %self.user_id(),
                resource,
                action,
                "Permission denied"
            );
            Err(AuthError::PermissionDenied)
        }
    }
}
