use service_core::context::RequestContext;
use std::sync::Arc;
use std::time::Duration;

use super::rate_limit::{retry_after_secs, CallerIdentity, RateLimitPolicy};
use super::{bounded, TokenService};
use crate::db::UserRepository;
use crate::dtos::auth::{LoginRequest, LoginResponse, RegisterRequest};
use crate::error::{AuthError, IdentifierField};
use crate::models::{ClientPlatform, NewUser, Principal, PublicUser};
use crate::store::CounterStore;
use crate::utils::password::{password_strength, verify_dummy};
use crate::utils::{hash_password, verify_password, Password};

/// Login, registration and logout on top of the token service.
pub struct AuthService {
    users: Arc<dyn UserRepository>,
    tokens: Arc<TokenService>,
    counters: Arc<dyn CounterStore>,
    failure_policy: RateLimitPolicy,
    store_timeout: Duration,
}

fn failure_key(caller: &CallerIdentity) -> String {
    format!("login_failures:{}", caller)
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        tokens: Arc<TokenService>,
        counters: Arc<dyn CounterStore>,
        failure_policy: RateLimitPolicy,
        store_timeout: Duration,
    ) -> Self {
        Self {
            users,
            tokens,
            counters,
            failure_policy,
            store_timeout,
        }
    }

    pub fn tokens(&self) -> &Arc<TokenService> {
        &self.tokens
    }

    pub async fn login(
        &self,
        ctx: &RequestContext,
        req: LoginRequest,
        caller: &CallerIdentity,
        platform: ClientPlatform,
    ) -> Result<LoginResponse, AuthError> {
        // Every attempt takes a slot before the password is checked, so
        // concurrent guesses cannot all slip under the limit. A successful
        // login clears the counter.
        let key = failure_key(caller);
        let attempt = bounded(
            ctx,
            self.store_timeout,
            self.counters.increment(&key, self.failure_policy.window),
        )
        .await?;
        if attempt.count > u64::from(self.failure_policy.limit) {
            tracing::warn!(caller = %caller, attempts = attempt.count, "Login blocked after repeated failures");
            return Err(AuthError::RateLimited {
                retry_after: retry_after_secs(attempt.ttl),
            });
        }

        let password = Password::new(req.password);
        let user = bounded(
            ctx,
            self.store_timeout,
            self.users.find_by_identifier(req.identifier.trim()),
        )
        .await?;

        let user = match user {
            Some(user) if verify_password(&password, &user.password_hash).is_ok() => user,
            Some(_) => {
                tracing::warn!(caller = %caller, failures = attempt.count, "Failed login attempt");
                return Err(AuthError::InvalidCredentials);
            }
            None => {
                verify_dummy(&password);
                tracing::warn!(caller = %caller, failures = attempt.count, "Failed login attempt");
                return Err(AuthError::InvalidCredentials);
            }
        };

        if !user.is_active {
            tracing::warn!(user_id = %user.user_id, "Login attempt on inactive account");
            return Err(AuthError::UserInactive);
        }

        let membership = bounded(
            ctx,
            self.store_timeout,
            self.users.find_membership(user.user_id),
        )
        .await?
        .ok_or_else(|| {
            tracing::warn!(user_id = %user.user_id, "User has no role membership");
            AuthError::PermissionDenied
        })?;

        let claims = membership.principal_claims(&user);
        let tokens = self
            .tokens
            .issue_token_pair(ctx, &claims, req.remember_me, platform)
            .await?;

        if let Err(e) = bounded(ctx, self.store_timeout, self.counters.reset(&key)).await {
            tracing::warn!(caller = %caller, error = %e, "Failed to clear login failure counter");
        }
        if let Err(e) = bounded(ctx, self.store_timeout, self.users.record_login(user.user_id)).await {
            tracing::warn!(user_id = %user.user_id, error = %e, "Failed to record last login");
        }

        tracing::info!(user_id = %user.user_id, "User logged in");
        Ok(LoginResponse {
            tokens,
            user: PublicUser::from(&user),
        })
    }

    pub async fn register(
        &self,
        ctx: &RequestContext,
        req: RegisterRequest,
    ) -> Result<PublicUser, AuthError> {
        let email = req.email.trim().to_lowercase();
        let username = req.username.trim().to_string();
        let phone = req
            .phone
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string);

        if bounded(ctx, self.store_timeout, self.users.exists_by_email(&email)).await? {
            return Err(AuthError::DuplicateIdentifier(IdentifierField::Email));
        }
        if bounded(ctx, self.store_timeout, self.users.exists_by_username(&username)).await? {
            return Err(AuthError::DuplicateIdentifier(IdentifierField::Username));
        }
        if let Some(phone) = &phone {
            if bounded(ctx, self.store_timeout, self.users.exists_by_phone(phone)).await? {
                return Err(AuthError::DuplicateIdentifier(IdentifierField::Phone));
            }
        }

        let password = Password::new(req.password);
        password_strength(&password).map_err(AuthError::WeakPassword)?;
        let password_hash = hash_password(&password)?;

        let user = bounded(
            ctx,
            self.store_timeout,
            self.users.create_user(NewUser {
                first_name: req.first_name.trim().to_string(),
                last_name: req.last_name.trim().to_string(),
                username,
                email,
                phone,
                password_hash,
            }),
        )
        .await?;

        tracing::info!(user_id = %user.user_id, "User registered");
        Ok(PublicUser::from(&user))
    }

    /// Ends the session the principal's access token belongs to.
    pub async fn logout(&self, ctx: &RequestContext, principal: &Principal) -> Result<usize, AuthError> {
        let revoked = self.tokens.revoke_session(ctx, principal.session_id).await?;
        Ok(usize::from(revoked))
    }

    pub async fn logout_all(&self, ctx: &RequestContext, principal: &Principal) -> Result<usize, AuthError> {
        self.tokens.revoke_all_sessions(ctx, principal.user_id()).await
    }
}
