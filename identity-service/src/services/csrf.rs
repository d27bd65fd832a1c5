use chrono::Duration;
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use super::TokenCodec;
use crate::error::AuthError;
use crate::models::{CsrfClaims, TokenUse};

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CsrfToken {
    pub csrf_token: String,
    /// Lifetime in seconds.
    #[schema(example = 60)]
    pub expires_in: i64,
}

/// Short-lived anti-forgery tokens bound to a single principal.
pub struct CsrfService {
    codec: Arc<TokenCodec>,
    ttl: Duration,
}

impl CsrfService {
    pub fn new(codec: Arc<TokenCodec>, ttl: Duration) -> Self {
        Self { codec, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue_csrf_token(&self, user_id: Uuid, email: &str) -> Result<CsrfToken, AuthError> {
        let claims = CsrfClaims {
            registered: self
                .codec
                .registered(user_id.to_string(), TokenUse::Csrf, self.ttl),
            user_id,
            email: email.to_string(),
        };

        Ok(CsrfToken {
            csrf_token: self.codec.sign(&claims)?,
            expires_in: self.ttl.num_seconds(),
        })
    }

    /// Fails with `CsrfMismatch` when a sound token was issued to someone
    /// other than `expected_user_id`.
    pub fn verify_csrf_token(
        &self,
        token: &str,
        expected_user_id: Uuid,
    ) -> Result<CsrfClaims, AuthError> {
        let claims: CsrfClaims = self.codec.verify(token, TokenUse::Csrf)?;

        if claims.user_id != expected_user_id
            || claims.registered.sub != expected_user_id.to_string()
        {
            tracing::warn!(
                expected = %expected_user_id,
                presented = %claims.user_id,
                "CSRF token bound to another principal"
            );
            return Err(AuthError::CsrfMismatch);
        }

        Ok(claims)
    }
}
