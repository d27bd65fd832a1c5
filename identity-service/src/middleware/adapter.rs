//! Runs a [`Pipeline`] as axum middleware.

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts, RawPathParams, Request, State},
    http::{request::Parts, HeaderValue},
    middleware::Next,
    response::Response,
};
use service_core::context::{RequestContext, DEFAULT_REQUEST_TIMEOUT};
use service_core::error::AppError;
use std::net::SocketAddr;
use std::sync::Arc;

use super::guard::TenantGuardContext;
use super::pipeline::{InboundRequest, Pipeline, PipelineContext};
use crate::error::AuthError;
use crate::models::Principal;
use crate::services::{CallerIdentity, TrustedProxies};

pub const TENANT_PATH_PARAM: &str = "tenant_id";

/// Builds the pipeline input from the request, runs the pipeline, publishes
/// what it established as request extensions, and runs the handler under the
/// request's deadline. Dropping the request future cancels its context.
pub async fn pipeline_middleware(
    State(pipeline): State<Arc<Pipeline>>,
    params: Option<RawPathParams>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let path_tenant = params.and_then(|params| {
        params
            .iter()
            .find(|(name, _)| *name == TENANT_PATH_PARAM)
            .map(|(_, value)| value.to_string())
    });

    let peer_addr = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    let inbound = InboundRequest {
        method: req.method().clone(),
        path: req.uri().path().to_string(),
        headers: req.headers().clone(),
        peer_addr,
        path_tenant,
    };
    let cx = PipelineContext {
        request: req.extensions().get::<RequestContext>().cloned(),
        ..PipelineContext::default()
    };

    let (inbound, cx) = pipeline.run(inbound, cx).await?;

    let ctx = cx
        .request
        .unwrap_or_else(|| RequestContext::with_timeout(DEFAULT_REQUEST_TIMEOUT));
    // Without a rate-limit stage no proxy is trusted.
    let caller = cx.caller.unwrap_or_else(|| {
        CallerIdentity::resolve(
            cx.principal.as_ref(),
            &inbound.headers,
            inbound.peer_addr,
            &TrustedProxies::default(),
        )
    });

    let extensions = req.extensions_mut();
    extensions.insert(ctx.clone());
    extensions.insert(caller);
    if let Some(principal) = cx.principal {
        extensions.insert(principal);
    }
    if let Some(tenant) = cx.tenant {
        extensions.insert(tenant);
    }

    let _cancel_on_drop = ctx.drop_guard();
    let mut response = ctx
        .run(next.run(req))
        .await
        .map_err(|e| AppError::from(AuthError::Context(e)))?;

    if let Some(decision) = cx.rate_limit {
        let headers = response.headers_mut();
        headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
        headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    }

    Ok(response)
}

/// The authenticated principal. Rejects with 401 on routes whose pipeline
/// has no auth stage.
#[derive(Debug, Clone)]
pub struct AuthPrincipal(pub Principal);

#[async_trait]
impl<S> FromRequestParts<S> for AuthPrincipal
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .map(AuthPrincipal)
            .ok_or_else(|| AuthError::Unauthorized.into())
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for TenantGuardContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<TenantGuardContext>()
            .cloned()
            .ok_or_else(|| AuthError::TenantRequired.into())
    }
}

/// The request's deadline/cancellation context, or a fresh default one when
/// the route has no pipeline.
#[derive(Debug, Clone)]
pub struct RequestScope(pub RequestContext);

#[async_trait]
impl<S> FromRequestParts<S> for RequestScope
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(RequestScope(
            parts
                .extensions
                .get::<RequestContext>()
                .cloned()
                .unwrap_or_else(|| RequestContext::with_timeout(DEFAULT_REQUEST_TIMEOUT)),
        ))
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CallerIdentity
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(caller) = parts.extensions.get::<CallerIdentity>() {
            return Ok(*caller);
        }
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        Ok(CallerIdentity::resolve(
            parts.extensions.get::<Principal>(),
            &parts.headers,
            peer,
            &TrustedProxies::default(),
        ))
    }
}
