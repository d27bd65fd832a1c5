pub mod auth;
pub mod codec;
pub mod csrf;
pub mod rate_limit;
pub mod tokens;

use service_core::context::{ContextError, RequestContext};
use std::future::Future;
use std::time::Duration;

use crate::error::AuthError;
use crate::store::StoreError;

pub use auth::AuthService;
pub use codec::TokenCodec;
pub use csrf::{CsrfService, CsrfToken};
pub use rate_limit::{
    CallerIdentity, RateLimitDecision, RateLimitPolicies, RateLimitPolicy, RateLimiter, RouteClass,
    TrustedProxies,
};
pub use tokens::{TokenPair, TokenService};

/// Runs a backing-store call under the request context, capped at `limit`.
/// Hitting the cap while the request still has budget is reported as an
/// unavailable store; the request's own deadline surfaces as a context error.
pub(crate) async fn bounded<T, E, F>(
    ctx: &RequestContext,
    limit: Duration,
    fut: F,
) -> Result<T, AuthError>
where
    F: Future<Output = Result<T, E>>,
    AuthError: From<E>,
{
    match ctx.child(limit).run(fut).await {
        Ok(res) => res.map_err(AuthError::from),
        Err(ContextError::DeadlineExceeded) if !ctx.is_expired() => {
            Err(AuthError::Store(StoreError::Unavailable(anyhow::anyhow!(
                "backing call exceeded {}ms",
                limit.as_millis()
            ))))
        }
        Err(e) => Err(e.into()),
    }
}
