//! Payloads carried inside signed tokens.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Purpose a token was minted for. A token is only accepted where its own
/// kind is expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TokenUse {
    Access,
    Refresh,
    Csrf,
}

/// Registered claims shared by every token kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredClaims {
    pub iss: String,
    pub sub: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    pub jti: Uuid,
    pub token_use: TokenUse,
}

/// Who the token speaks for.
///
/// `permission_names`, `permission_resources` and `permission_actions` are
/// index-aligned: entry `i` of each describes the same permission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PrincipalClaims {
    pub user_id: Uuid,
    pub email: String,
    /// Absent for platform-level principals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_tenant_id: Option<Uuid>,
    pub role_id: Uuid,
    #[serde(default)]
    pub role_names: Vec<String>,
    #[serde(default)]
    pub permission_names: Vec<String>,
    #[serde(default)]
    pub permission_resources: Vec<String>,
    #[serde(default)]
    pub permission_actions: Vec<String>,
}

/// Claim set of access and refresh tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    #[serde(flatten)]
    pub registered: RegisteredClaims,
    /// Session the token lineage belongs to.
    pub sid: Uuid,
    #[serde(flatten)]
    pub principal: PrincipalClaims,
}

/// Minimal claim set of an anti-forgery token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsrfClaims {
    #[serde(flatten)]
    pub registered: RegisteredClaims,
    pub user_id: Uuid,
    pub email: String,
}

/// Access to the registered part of a claim set, used by the verifier.
pub trait Registered {
    fn registered(&self) -> &RegisteredClaims;
}

impl Registered for TokenClaims {
    fn registered(&self) -> &RegisteredClaims {
        &self.registered
    }
}

impl Registered for CsrfClaims {
    fn registered(&self) -> &RegisteredClaims {
        &self.registered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_principal_omits_tenant_fields() {
        let claims = PrincipalClaims {
            user_id: Uuid::new_v4(),
            email: "ops@example.com".to_string(),
            tenant_id: None,
            user_tenant_id: None,
            role_id: Uuid::new_v4(),
            role_names: vec!["platform_admin".to_string()],
            permission_names: vec![],
            permission_resources: vec![],
            permission_actions: vec![],
        };

        let value = serde_json::to_value(&claims).unwrap();
        assert!(value.get("tenant_id").is_none());
        assert!(value.get("user_tenant_id").is_none());

        let back: PrincipalClaims = serde_json::from_value(value).unwrap();
        assert_eq!(back, claims);
    }

    #[test]
    fn token_claims_payload_is_flat() {
        let user_id = Uuid::new_v4();
        let claims = TokenClaims {
            registered: RegisteredClaims {
                iss: "identity".to_string(),
                sub: user_id.to_string(),
                iat: 100,
                nbf: 100,
                exp: 200,
                jti: Uuid::new_v4(),
                token_use: TokenUse::Access,
            },
            sid: Uuid::new_v4(),
            principal: PrincipalClaims {
                user_id,
                email: "a@example.com".to_string(),
                tenant_id: Some(Uuid::new_v4()),
                user_tenant_id: None,
                role_id: Uuid::new_v4(),
                role_names: vec!["member".to_string()],
                permission_names: vec!["tenant:read".to_string()],
                permission_resources: vec!["tenant".to_string()],
                permission_actions: vec!["read".to_string()],
            },
        };

        let value = serde_json::to_value(&claims).unwrap();
        assert_eq!(value["token_use"], "access");
        assert_eq!(value["exp"], 200);
        assert_eq!(value["email"], "a@example.com");

        let back: TokenClaims = serde_json::from_value(value).unwrap();
        assert_eq!(back, claims);
    }
}
