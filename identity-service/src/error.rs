use service_core::context::ContextError;
use service_core::error::AppError;
use thiserror::Error;

use crate::db::RepositoryError;
use crate::store::StoreError;
use crate::utils::password::WeakPasswordReason;

/// Identifier field that collided with an existing account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierField {
    Email,
    Username,
    Phone,
}

impl IdentifierField {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentifierField::Email => "email",
            IdentifierField::Username => "username",
            IdentifierField::Phone => "phone",
        }
    }
}

impl std::fmt::Display for IdentifierField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("User not found")]
    UserNotFound,

    #[error("User account is inactive")]
    UserInactive,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    TokenExpired,

    #[error("Refresh token reuse detected")]
    TokenReuseDetected,

    #[error("Session revoked")]
    SessionRevoked,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Tenant mismatch")]
    TenantMismatch,

    #[error("Tenant required")]
    TenantRequired,

    #[error("CSRF token missing")]
    CsrfMissing,

    #[error("CSRF token mismatch")]
    CsrfMismatch,

    #[error("Rate limited, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },

    #[error("Weak password: {0}")]
    WeakPassword(WeakPasswordReason),

    #[error("Duplicate {0}")]
    DuplicateIdentifier(IdentifierField),

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Repository unavailable: {0}")]
    Repository(anyhow::Error),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    /// Failures caused by the presented credential itself rather than by the
    /// infrastructure. The guard collapses all of these to `Unauthorized`.
    pub fn is_credential_failure(&self) -> bool {
        matches!(
            self,
            AuthError::InvalidToken
                | AuthError::TokenExpired
                | AuthError::TokenReuseDetected
                | AuthError::SessionRevoked
                | AuthError::Unauthorized
        )
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Context(e) => AuthError::Context(e),
            other => AuthError::Store(other),
        }
    }
}

impl From<RepositoryError> for AuthError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Conflict(field) => AuthError::DuplicateIdentifier(field),
            RepositoryError::Unavailable(e) => AuthError::Repository(e),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidToken
            | AuthError::TokenExpired
            | AuthError::TokenReuseDetected
            | AuthError::SessionRevoked
            | AuthError::Unauthorized => AppError::Unauthorized(anyhow::anyhow!("Unauthorized")),
            AuthError::InvalidCredentials | AuthError::UserNotFound => {
                AppError::Unauthorized(anyhow::anyhow!("Invalid credentials"))
            }
            AuthError::UserInactive => {
                AppError::Unauthorized(anyhow::anyhow!("Account is inactive"))
            }
            AuthError::PermissionDenied => AppError::Forbidden(anyhow::anyhow!("Permission denied")),
            AuthError::TenantMismatch => AppError::Forbidden(anyhow::anyhow!("Tenant mismatch")),
            AuthError::CsrfMissing => AppError::Forbidden(anyhow::anyhow!("CSRF token missing")),
            AuthError::CsrfMismatch => AppError::Forbidden(anyhow::anyhow!("CSRF token invalid")),
            AuthError::TenantRequired => AppError::BadRequest(anyhow::anyhow!("Tenant required")),
            AuthError::RateLimited { retry_after } => {
                AppError::TooManyRequests("Too many requests".to_string(), Some(retry_after))
            }
            AuthError::WeakPassword(reason) => {
                AppError::BadRequest(anyhow::anyhow!("Password is too weak: {}", reason))
            }
            AuthError::DuplicateIdentifier(field) => {
                AppError::Conflict(anyhow::anyhow!("{} already registered", field))
            }
            AuthError::Store(e) => {
                tracing::error!(error = %e, "Session or counter store failure");
                AppError::ServiceUnavailable("Backing store unavailable".to_string())
            }
            AuthError::Repository(e) => {
                tracing::error!(error = %e, "User repository failure");
                AppError::ServiceUnavailable("User repository unavailable".to_string())
            }
            AuthError::Context(ContextError::DeadlineExceeded) => AppError::GatewayTimeout,
            AuthError::Context(ContextError::Cancelled) => {
                AppError::ServiceUnavailable("Request cancelled".to_string())
            }
            AuthError::Internal(e) => AppError::InternalError(e),
        }
    }
}
