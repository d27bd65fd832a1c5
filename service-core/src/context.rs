//! Request-scoped deadline and cancellation.
//!
//! Every blocking call in the request path (store round-trips, repository
//! lookups, the handler itself) runs through [`RequestContext::run`], which
//! returns as soon as either the deadline passes or the context is cancelled.
//! Cancelling a context cancels every context derived from it with
//! [`RequestContext::child`].

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Budget applied to a request that arrives without one.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Header an upstream hop uses to hand down its remaining budget, in milliseconds.
pub const REQUEST_TIMEOUT_HEADER: &str = "x-request-timeout-ms";

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("request cancelled")]
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct RequestContext {
    deadline: Instant,
    cancel: CancellationToken,
}

impl RequestContext {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline,
            cancel: CancellationToken::new(),
        }
    }

    /// Reuses `existing` when the caller already carries a context, otherwise
    /// starts a new one bounded by `timeout`.
    pub fn with_timeout_if_none(existing: Option<&RequestContext>, timeout: Duration) -> Self {
        match existing {
            Some(ctx) => ctx.clone(),
            None => Self::with_timeout(timeout),
        }
    }

    /// Derives a context that expires no later than `timeout` from now and is
    /// cancelled together with `self`.
    pub fn child(&self, timeout: Duration) -> Self {
        let deadline = (Instant::now() + timeout).min(self.deadline);
        Self {
            deadline,
            cancel: self.cancel.child_token(),
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancels the context when the returned guard is dropped. Held by the
    /// request adapter so that a dropped request future (client disconnect,
    /// shutdown) stops work still running under this context.
    pub fn drop_guard(&self) -> DropGuard {
        self.cancel.clone().drop_guard()
    }

    /// Drives `fut` to completion unless the deadline passes or the context is
    /// cancelled first; in both cases `fut` is dropped.
    pub async fn run<F>(&self, fut: F) -> Result<F::Output, ContextError>
    where
        F: Future,
    {
        if self.cancel.is_cancelled() {
            return Err(ContextError::Cancelled);
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ContextError::Cancelled),
            res = tokio::time::timeout_at(self.deadline, fut) => {
                res.map_err(|_| ContextError::DeadlineExceeded)
            }
        }
    }
}

/// Parses an upstream budget header, capping it at `max`. Zero, negative or
/// malformed values are ignored.
pub fn timeout_from_header(value: Option<&str>, max: Duration) -> Option<Duration> {
    let millis: u64 = value?.trim().parse().ok()?;
    if millis == 0 {
        return None;
    }
    Some(Duration::from_millis(millis).min(max))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn run_returns_output_within_deadline() {
        let ctx = RequestContext::with_timeout(Duration::from_secs(1));
        let out = ctx
            .run(async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                7
            })
            .await;
        assert_eq!(out, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_at_deadline() {
        let ctx = RequestContext::with_timeout(Duration::from_millis(50));
        let out = ctx.run(std::future::pending::<()>()).await;
        assert_eq!(out, Err(ContextError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn cancellation_reaches_children() {
        let parent = RequestContext::with_timeout(Duration::from_secs(30));
        let child = parent.child(Duration::from_secs(5));

        let waiter = tokio::spawn(async move { child.run(std::future::pending::<()>()).await });
        parent.cancel();

        assert_eq!(waiter.await.unwrap(), Err(ContextError::Cancelled));
    }

    #[tokio::test]
    async fn drop_guard_cancels_on_drop() {
        let ctx = RequestContext::with_timeout(Duration::from_secs(30));
        let guard = ctx.drop_guard();
        assert!(!ctx.is_cancelled());
        drop(guard);
        assert!(ctx.is_cancelled());
        assert_eq!(ctx.run(async { 1 }).await, Err(ContextError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn child_never_outlives_parent() {
        let parent = RequestContext::with_timeout(Duration::from_secs(1));
        let child = parent.child(Duration::from_secs(10));
        assert_eq!(child.deadline(), parent.deadline());

        let shorter = parent.child(Duration::from_millis(10));
        assert!(shorter.deadline() < parent.deadline());
    }

    #[test]
    fn existing_context_is_reused() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        rt.block_on(async {
            let outer = RequestContext::with_timeout(Duration::from_secs(2));
            let reused = RequestContext::with_timeout_if_none(Some(&outer), Duration::from_secs(60));
            assert_eq!(reused.deadline(), outer.deadline());
        });
    }

    #[test]
    fn header_budget_is_capped() {
        let max = Duration::from_secs(60);
        assert_eq!(
            timeout_from_header(Some("1500"), max),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(timeout_from_header(Some("600000"), max), Some(max));
        assert_eq!(timeout_from_header(Some("0"), max), None);
        assert_eq!(timeout_from_header(Some("soon"), max), None);
        assert_eq!(timeout_from_header(None, max), None);
    }
}
