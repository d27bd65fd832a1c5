//! Account records as returned by the user repository.

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::claims::PrincipalClaims;
use crate::utils::password::PasswordHashString;

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub user_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub email: String,
    pub phone: Option<String>,
    pub password_hash: PasswordHashString,
    pub is_active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Fields needed to create an account; the password is already hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub email: String,
    pub phone: Option<String>,
    pub password_hash: PasswordHashString,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permission {
    pub name: String,
    pub resource: String,
    pub action: String,
}

impl Permission {
    pub fn new(resource: &str, action: &str) -> Self {
        Self {
            name: format!("{}:{}", resource, action),
            resource: resource.to_string(),
            action: action.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Role {
    pub role_id: Uuid,
    pub name: String,
    pub permissions: Vec<Permission>,
}

/// A user's placement: the tenant they act in (none for platform staff) and
/// the role granted there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    pub tenant_id: Option<Uuid>,
    pub user_tenant_id: Option<Uuid>,
    pub role: Role,
}

impl Membership {
    pub fn principal_claims(&self, user: &UserRecord) -> PrincipalClaims {
        let perms = &self.role.permissions;
        PrincipalClaims {
            user_id: user.user_id,
            email: user.email.clone(),
            tenant_id: self.tenant_id,
            user_tenant_id: self.user_tenant_id,
            role_id: self.role.role_id,
            role_names: vec![self.role.name.clone()],
            permission_names: perms.iter().map(|p| p.name.clone()).collect(),
            permission_resources: perms.iter().map(|p| p.resource.clone()).collect(),
            permission_actions: perms.iter().map(|p| p.action.clone()).collect(),
        }
    }
}

/// What clients get to see of an account.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PublicUser {
    pub user_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&UserRecord> for PublicUser {
    fn from(u: &UserRecord) -> Self {
        Self {
            user_id: u.user_id,
            first_name: u.first_name.clone(),
            last_name: u.last_name.clone(),
            username: u.username.clone(),
            email: u.email.clone(),
            phone: u.phone.clone(),
            is_active: u.is_active,
            last_login_at: u.last_login_at,
            created_at: u.created_at,
        }
    }
}
