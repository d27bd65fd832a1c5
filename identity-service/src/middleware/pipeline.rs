//! Transport-independent request pipeline.
//!
//! A [`Pipeline`] is an ordered list of [`Stage`]s. Each stage takes the
//! request and the context built so far and either hands both on or rejects
//! the request; the first rejection stops the run.

use async_trait::async_trait;
use http::{HeaderMap, Method};
use service_core::context::RequestContext;
use service_core::error::AppError;
use std::net::IpAddr;
use std::sync::Arc;

use super::guard::{GuardState, TenantGuardContext};
use crate::error::AuthError;
use crate::models::Principal;
use crate::services::{CallerIdentity, RateLimitDecision};

/// The parts of a request the stages look at.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub peer_addr: Option<IpAddr>,
    /// `tenant_id` path parameter of the matched route, if any.
    pub path_tenant: Option<String>,
}

impl InboundRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            peer_addr: None,
            path_tenant: None,
        }
    }
}

/// What the stages have established about the request so far.
#[derive(Debug, Clone, Default)]
pub struct PipelineContext {
    pub request: Option<RequestContext>,
    pub caller: Option<CallerIdentity>,
    pub rate_limit: Option<RateLimitDecision>,
    pub principal: Option<Principal>,
    pub tenant: Option<TenantGuardContext>,
}

#[derive(Debug)]
pub struct Rejection {
    pub stage: &'static str,
    /// Set when the auth guard rejected; the state it had reached.
    pub guard_state: Option<GuardState>,
    pub error: AuthError,
}

impl Rejection {
    pub fn new(stage: &'static str, error: AuthError) -> Self {
        Self {
            stage,
            guard_state: None,
            error,
        }
    }
}

impl From<Rejection> for AppError {
    fn from(rejection: Rejection) -> Self {
        tracing::debug!(
            stage = rejection.stage,
            guard_state = ?rejection.guard_state,
            error = %rejection.error,
            "Request rejected"
        );
        rejection.error.into()
    }
}

pub type StageResult = Result<(InboundRequest, PipelineContext), Rejection>;

#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn apply(&self, req: InboundRequest, cx: PipelineContext) -> StageResult;
}

#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage<S: Stage + 'static>(mut self, stage: S) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub async fn run(&self, mut req: InboundRequest, mut cx: PipelineContext) -> StageResult {
        for stage in &self.stages {
            (req, cx) = stage.apply(req, cx).await?;
        }
        Ok((req, cx))
    }
}
