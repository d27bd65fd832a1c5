pub mod adapter;
pub mod guard;
pub mod pipeline;
pub mod stages;

pub use adapter::{pipeline_middleware, AuthPrincipal, RequestScope};
pub use guard::{AuthGuard, GuardState, TenantGuardContext, TenantScope};
pub use pipeline::{InboundRequest, Pipeline, PipelineContext, Rejection, Stage};
pub use stages::{AuthStage, CsrfStage, DeadlineStage, RateLimitStage, CSRF_COOKIE, CSRF_HEADER};
