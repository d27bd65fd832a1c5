//! Access/refresh token issuance, verification and session rotation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use service_core::context::RequestContext;
use std::sync::Arc;
use std::time::Duration;
use utoipa::ToSchema;
use uuid::Uuid;

use super::{bounded, TokenCodec};
use crate::config::{JwtConfig, TokenTtls};
use crate::error::AuthError;
use crate::models::{ClientPlatform, Principal, PrincipalClaims, Session, TokenClaims, TokenUse};
use crate::store::{RotationOutcome, SessionStore};

/// Token pair returned to the client after login or refresh.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    #[schema(example = "Bearer")]
    pub token_type: String,
    /// Access token lifetime in seconds.
    #[schema(example = 900)]
    pub expires_in: i64,
    /// Refresh token lifetime in seconds.
    pub refresh_expires_in: i64,
    #[serde(skip)]
    pub session_id: Uuid,
}

pub struct TokenService {
    codec: Arc<TokenCodec>,
    jwt: JwtConfig,
    sessions: Arc<dyn SessionStore>,
    store_timeout: Duration,
}

impl TokenService {
    pub fn new(
        codec: Arc<TokenCodec>,
        jwt: JwtConfig,
        sessions: Arc<dyn SessionStore>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            codec,
            jwt,
            sessions,
            store_timeout,
        }
    }

    pub fn ttls(&self, platform: ClientPlatform, remember_me: bool) -> TokenTtls {
        self.jwt.ttls(platform, remember_me)
    }

    /// Opens a new session and returns its first token pair.
    pub async fn issue_token_pair(
        &self,
        ctx: &RequestContext,
        principal: &PrincipalClaims,
        remember_me: bool,
        platform: ClientPlatform,
    ) -> Result<TokenPair, AuthError> {
        let ttls = self.ttls(platform, remember_me);
        let now = self.codec.clock().now();
        let session = Session {
            session_id: Uuid::new_v4(),
            user_id: principal.user_id,
            issued_at: now,
            expires_at: now + ttls.refresh,
            revoked: false,
            current_jti: Uuid::new_v4(),
            platform,
            remember_me,
        };

        let pair = self.mint_pair(principal, &session, ttls)?;
        bounded(ctx, self.store_timeout, self.sessions.create(&session)).await?;

        tracing::info!(
            user_id = %principal.user_id,
            session_id = %session.session_id,
            platform = platform.as_str(),
            "Session opened"
        );
        Ok(pair)
    }

    /// Pure verification of an access token; no store round-trip.
    pub fn verify_access_token(&self, token: &str) -> Result<TokenClaims, AuthError> {
        self.verify(token, TokenUse::Access)
    }

    pub fn verify_refresh_token(&self, token: &str) -> Result<TokenClaims, AuthError> {
        self.verify(token, TokenUse::Refresh)
    }

    /// Verifies an access token and checks that its session is still live.
    pub async fn authenticate(
        &self,
        ctx: &RequestContext,
        token: &str,
    ) -> Result<Principal, AuthError> {
        let claims = self.verify_access_token(token)?;
        let session = bounded(ctx, self.store_timeout, self.sessions.get(claims.sid)).await?;

        match session {
            Some(s) if !s.revoked && s.user_id == claims.principal.user_id => {
                Ok(Principal::from_token(claims))
            }
            Some(s) if s.user_id != claims.principal.user_id => Err(AuthError::InvalidToken),
            _ => Err(AuthError::SessionRevoked),
        }
    }

    /// Rotates the session's refresh token. Presenting a rotated-out refresh
    /// token revokes the whole session.
    pub async fn refresh_token_pair(
        &self,
        ctx: &RequestContext,
        refresh_token: &str,
    ) -> Result<TokenPair, AuthError> {
        let claims = self.verify_refresh_token(refresh_token)?;
        let session_id = claims.sid;

        let session = bounded(ctx, self.store_timeout, self.sessions.get(session_id))
            .await?
            .ok_or(AuthError::SessionRevoked)?;
        if session.user_id != claims.principal.user_id {
            return Err(AuthError::InvalidToken);
        }
        if session.revoked {
            return Err(AuthError::SessionRevoked);
        }

        let ttls = self.ttls(session.platform, session.remember_me);
        let next_jti = Uuid::new_v4();
        let next_expiry: DateTime<Utc> = self.codec.clock().now() + ttls.refresh;

        let outcome = bounded(
            ctx,
            self.store_timeout,
            self.sessions
                .rotate(session_id, session.user_id, claims.registered.jti, next_jti, next_expiry),
        )
        .await?;

        match outcome {
            RotationOutcome::Rotated(rotated) => {
                tracing::debug!(session_id = %session_id, "Refresh token rotated");
                self.mint_pair(&claims.principal, &rotated, ttls)
            }
            RotationOutcome::ReuseDetected => {
                tracing::warn!(
                    session_id = %session_id,
                    user_id = %claims.principal.user_id,
                    "Refresh token reuse detected, session revoked"
                );
                Err(AuthError::TokenReuseDetected)
            }
            RotationOutcome::Revoked | RotationOutcome::NotFound => Err(AuthError::SessionRevoked),
        }
    }

    pub async fn revoke_session(
        &self,
        ctx: &RequestContext,
        session_id: Uuid,
    ) -> Result<bool, AuthError> {
        let revoked = bounded(ctx, self.store_timeout, self.sessions.revoke(session_id)).await?;
        tracing::info!(session_id = %session_id, revoked, "Session revoke requested");
        Ok(revoked)
    }

    pub async fn revoke_all_sessions(
        &self,
        ctx: &RequestContext,
        user_id: Uuid,
    ) -> Result<usize, AuthError> {
        let count = bounded(
            ctx,
            self.store_timeout,
            self.sessions.revoke_all_for_user(user_id),
        )
        .await?;
        tracing::info!(user_id = %user_id, count, "All sessions revoked");
        Ok(count)
    }

    pub async fn health_check(&self, ctx: &RequestContext) -> Result<(), AuthError> {
        bounded(ctx, self.store_timeout, self.sessions.health_check()).await
    }

    fn verify(&self, token: &str, kind: TokenUse) -> Result<TokenClaims, AuthError> {
        let claims: TokenClaims = self.codec.verify(token, kind)?;
        if claims.registered.sub != claims.principal.user_id.to_string() {
            return Err(AuthError::InvalidToken);
        }
        Ok(claims)
    }

    /// Signs an access token and the refresh token currently honoured by `session`.
    fn mint_pair(
        &self,
        principal: &PrincipalClaims,
        session: &Session,
        ttls: TokenTtls,
    ) -> Result<TokenPair, AuthError> {
        let subject = principal.user_id.to_string();

        let access = TokenClaims {
            registered: self
                .codec
                .registered(subject.clone(), TokenUse::Access, ttls.access),
            sid: session.session_id,
            principal: principal.clone(),
        };

        let mut refresh_registered = self
            .codec
            .registered(subject, TokenUse::Refresh, ttls.refresh);
        refresh_registered.jti = session.current_jti;
        refresh_registered.exp = session.expires_at.timestamp();
        let refresh = TokenClaims {
            registered: refresh_registered,
            sid: session.session_id,
            principal: principal.clone(),
        };

        Ok(TokenPair {
            access_token: self.codec.sign(&access)?,
            refresh_token: self.codec.sign(&refresh)?,
            token_type: "Bearer".to_string(),
            expires_in: ttls.access.num_seconds(),
            refresh_expires_in: refresh.registered.exp - refresh.registered.iat,
            session_id: session.session_id,
        })
    }
}
