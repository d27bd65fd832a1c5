use async_trait::async_trait;
use axum_extra::extract::cookie::CookieJar;
use http::Method;
use service_core::context::{timeout_from_header, ContextError, RequestContext, REQUEST_TIMEOUT_HEADER};
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;

use super::guard::{AuthGuard, TenantScope};
use super::pipeline::{InboundRequest, PipelineContext, Rejection, Stage, StageResult};
use crate::error::AuthError;
use crate::services::{CsrfService, RateLimiter, RouteClass, TokenService};

pub const CSRF_HEADER: &str = "x-xsrf-token";
pub const CSRF_COOKIE: &str = "XSRF-TOKEN";

/// Attaches a bounded deadline unless the request already carries one. An
/// upstream budget in `x-request-timeout-ms` may shorten it, never extend it.
pub struct DeadlineStage {
    timeout: Duration,
}

impl DeadlineStage {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Stage for DeadlineStage {
    fn name(&self) -> &'static str {
        "deadline"
    }

    async fn apply(&self, req: InboundRequest, mut cx: PipelineContext) -> StageResult {
        let timeout = timeout_from_header(
            req.headers
                .get(REQUEST_TIMEOUT_HEADER)
                .and_then(|v| v.to_str().ok()),
            self.timeout,
        )
        .unwrap_or(self.timeout);

        let ctx = RequestContext::with_timeout_if_none(cx.request.as_ref(), timeout);
        if ctx.is_cancelled() {
            return Err(Rejection::new(self.name(), ContextError::Cancelled.into()));
        }
        if ctx.is_expired() {
            return Err(Rejection::new(self.name(), ContextError::DeadlineExceeded.into()));
        }

        cx.request = Some(ctx);
        Ok((req, cx))
    }
}

fn request_context(cx: &PipelineContext) -> RequestContext {
    RequestContext::with_timeout_if_none(
        cx.request.as_ref(),
        service_core::context::DEFAULT_REQUEST_TIMEOUT,
    )
}

pub struct RateLimitStage {
    limiter: Arc<RateLimiter>,
    class: RouteClass,
}

impl RateLimitStage {
    pub fn new(limiter: Arc<RateLimiter>, class: RouteClass) -> Self {
        Self { limiter, class }
    }
}

#[async_trait]
impl Stage for RateLimitStage {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn apply(&self, req: InboundRequest, mut cx: PipelineContext) -> StageResult {
        let caller = self
            .limiter
            .caller(cx.principal.as_ref(), &req.headers, req.peer_addr);
        let ctx = request_context(&cx);

        let decision = self
            .limiter
            .check(&ctx, self.class, &caller)
            .await
            .map_err(|e| Rejection::new(self.name(), e))?;

        cx.caller = Some(caller);
        cx.rate_limit = Some(decision);
        cx.request = Some(ctx);
        Ok((req, cx))
    }
}

pub struct AuthStage {
    tokens: Arc<TokenService>,
    scope: TenantScope,
}

impl AuthStage {
    pub fn new(tokens: Arc<TokenService>, scope: TenantScope) -> Self {
        Self { tokens, scope }
    }
}

#[async_trait]
impl Stage for AuthStage {
    fn name(&self) -> &'static str {
        "auth"
    }

    async fn apply(&self, req: InboundRequest, mut cx: PipelineContext) -> StageResult {
        let ctx = request_context(&cx);
        let outcome = AuthGuard::new(&self.tokens, self.scope)
            .check(&ctx, &req.headers, req.path_tenant.as_deref())
            .await
            .map_err(|r| Rejection {
                stage: "auth",
                guard_state: Some(r.state),
                error: r.error,
            })?;

        tracing::Span::current().record("user_id", tracing::field::display(outcome.principal.user_id()));
        cx.principal = Some(outcome.principal);
        cx.tenant = outcome.tenant;
        cx.request = Some(ctx);
        Ok((req, cx))
    }
}

/// Double-submit check for state-changing requests. Must run after
/// [`AuthStage`].
pub struct CsrfStage {
    csrf: Arc<CsrfService>,
}

impl CsrfStage {
    pub fn new(csrf: Arc<CsrfService>) -> Self {
        Self { csrf }
    }
}

fn is_safe_method(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

#[async_trait]
impl Stage for CsrfStage {
    fn name(&self) -> &'static str {
        "csrf"
    }

    async fn apply(&self, req: InboundRequest, cx: PipelineContext) -> StageResult {
        if is_safe_method(&req.method) {
            return Ok((req, cx));
        }

        let principal = cx
            .principal
            .as_ref()
            .ok_or_else(|| Rejection::new(self.name(), AuthError::Unauthorized))?;

        let header_token = req
            .headers
            .get(CSRF_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Rejection::new(self.name(), AuthError::CsrfMissing))?;

        let jar = CookieJar::from_headers(&req.headers);
        if let Some(cookie) = jar.get(CSRF_COOKIE) {
            let matches: bool = cookie.value().as_bytes().ct_eq(header_token.as_bytes()).into();
            if !matches {
                tracing::warn!(user_id = %principal.user_id(), "CSRF cookie and header differ");
                return Err(Rejection::new(self.name(), AuthError::CsrfMismatch));
            }
        }

        if let Err(e) = self.csrf.verify_csrf_token(header_token, principal.user_id()) {
            tracing::debug!(error = %e, "CSRF token rejected");
            return Err(Rejection::new(self.name(), AuthError::CsrfMismatch));
        }

        Ok((req, cx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::JwtConfig;
    use crate::models::{Principal, PrincipalClaims};
    use crate::services::TokenCodec;
    use http::HeaderValue;
    use uuid::Uuid;

    fn principal(user_id: Uuid) -> Principal {
        Principal {
            claims: PrincipalClaims {
                user_id,
                email: "a@example.com".to_string(),
                tenant_id: None,
                user_tenant_id: None,
                role_id: Uuid::new_v4(),
                role_names: vec![],
                permission_names: vec![],
                permission_resources: vec![],
                permission_actions: vec![],
            },
            session_id: Uuid::new_v4(),
            token_id: Uuid::new_v4(),
            expires_at: 0,
        }
    }

    fn csrf_stage() -> (CsrfStage, Arc<CsrfService>) {
        let clock = Arc::new(ManualClock::at_timestamp(1_700_000_000));
        let jwt = JwtConfig::new("0123456789abcdef0123456789abcdef", "identity-test");
        let codec = Arc::new(TokenCodec::new(&jwt, clock).unwrap());
        let csrf = Arc::new(CsrfService::new(codec, jwt.csrf_ttl()));
        (CsrfStage::new(csrf.clone()), csrf)
    }

    fn authed(user_id: Uuid) -> PipelineContext {
        PipelineContext {
            principal: Some(principal(user_id)),
            ..PipelineContext::default()
        }
    }

    #[tokio::test]
    async fn safe_methods_skip_csrf() {
        let (stage, _) = csrf_stage();
        let req = InboundRequest::new(Method::GET, "/users/me");
        assert!(stage.apply(req, PipelineContext::default()).await.is_ok());
    }

    #[tokio::test]
    async fn missing_header_is_rejected() {
        let (stage, _) = csrf_stage();
        let req = InboundRequest::new(Method::POST, "/auth/logout");
        let err = stage.apply(req, authed(Uuid::new_v4())).await.unwrap_err();
        assert!(matches!(err.error, AuthError::CsrfMissing));
    }

    #[tokio::test]
    async fn cookie_must_match_header() {
        let (stage, csrf) = csrf_stage();
        let user = Uuid::new_v4();
        let token = csrf.issue_csrf_token(user, "a@example.com").unwrap().csrf_token;

        let mut req = InboundRequest::new(Method::POST, "/auth/logout");
        req.headers.insert(CSRF_HEADER, HeaderValue::from_str(&token).unwrap());
        assert!(stage.apply(req.clone(), authed(user)).await.is_ok());

        req.headers.insert(
            http::header::COOKIE,
            HeaderValue::from_static("XSRF-TOKEN=something-else"),
        );
        let err = stage.apply(req, authed(user)).await.unwrap_err();
        assert!(matches!(err.error, AuthError::CsrfMismatch));
    }

    #[tokio::test]
    async fn token_of_another_principal_is_rejected() {
        let (stage, csrf) = csrf_stage();
        let token = csrf
            .issue_csrf_token(Uuid::new_v4(), "a@example.com")
            .unwrap()
            .csrf_token;

        let mut req = InboundRequest::new(Method::DELETE, "/things/1");
        req.headers.insert(CSRF_HEADER, HeaderValue::from_str(&token).unwrap());
        let err = stage.apply(req, authed(Uuid::new_v4())).await.unwrap_err();
        assert!(matches!(err.error, AuthError::CsrfMismatch));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_stage_respects_shorter_upstream_budget() {
        let stage = DeadlineStage::new(Duration::from_secs(60));
        let mut req = InboundRequest::new(Method::GET, "/");
        req.headers.insert(REQUEST_TIMEOUT_HEADER, HeaderValue::from_static("1500"));

        let (_, cx) = stage.apply(req, PipelineContext::default()).await.unwrap();
        let remaining = cx.request.unwrap().remaining();
        assert!(remaining <= Duration::from_millis(1500));
        assert!(remaining > Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_stage_keeps_existing_context() {
        let stage = DeadlineStage::new(Duration::from_secs(60));
        let existing = RequestContext::with_timeout(Duration::from_secs(5));
        let cx = PipelineContext {
            request: Some(existing.clone()),
            ..PipelineContext::default()
        };

        let (_, cx) = stage
            .apply(InboundRequest::new(Method::GET, "/"), cx)
            .await
            .unwrap();
        assert_eq!(cx.request.unwrap().deadline(), existing.deadline());
    }
}
