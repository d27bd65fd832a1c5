//! Fixed-window request quotas per route class and caller, counted in the
//! shared counter store.

use http::HeaderMap;
use ipnet::IpNet;
use serde::Deserialize;
use service_core::context::RequestContext;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::bounded;
use crate::config::RateLimitConfig;
use crate::error::AuthError;
use crate::models::Principal;
use crate::store::CounterStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteClass {
    Login,
    Register,
    Refresh,
    Api,
}

impl RouteClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteClass::Login => "login",
            RouteClass::Register => "register",
            RouteClass::Refresh => "refresh",
            RouteClass::Api => "api",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub limit: u32,
    pub window: Duration,
}

impl RateLimitPolicy {
    pub fn new(limit: u32, window_seconds: u64) -> Self {
        Self {
            limit,
            window: Duration::from_secs(window_seconds),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicies {
    pub login: RateLimitPolicy,
    pub register: RateLimitPolicy,
    pub refresh: RateLimitPolicy,
    pub api: RateLimitPolicy,
}

impl RateLimitPolicies {
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self {
            login: RateLimitPolicy::new(config.login_attempts, config.login_window_seconds),
            register: RateLimitPolicy::new(config.register_attempts, config.register_window_seconds),
            refresh: RateLimitPolicy::new(config.refresh_attempts, config.refresh_window_seconds),
            api: RateLimitPolicy::new(config.api_limit, config.api_window_seconds),
        }
    }

    pub fn policy(&self, class: RouteClass) -> RateLimitPolicy {
        match class {
            RouteClass::Login => self.login,
            RouteClass::Register => self.register,
            RouteClass::Refresh => self.refresh,
            RouteClass::Api => self.api,
        }
    }
}

impl Default for RateLimitPolicies {
    fn default() -> Self {
        Self::from_config(&RateLimitConfig::default())
    }
}

/// Proxy networks whose forwarding headers are believed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct TrustedProxies(Vec<IpNet>);

impl TrustedProxies {
    pub fn new(networks: Vec<IpNet>) -> Self {
        Self(networks)
    }

    /// Parses a comma-separated list of CIDR ranges or bare addresses.
    pub fn parse_list(value: &str) -> Result<Self, String> {
        value
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                part.parse::<IpNet>()
                    .or_else(|_| part.parse::<IpAddr>().map(IpNet::from))
                    .map_err(|_| format!("invalid proxy address or network: {}", part))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.0.iter().any(|net| net.contains(ip))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Who a request is counted against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallerIdentity {
    User(Uuid),
    Ip(IpAddr),
    Unknown,
}

impl CallerIdentity {
    /// Authenticated user first, otherwise the client address.
    ///
    /// `X-Forwarded-For` and `X-Real-IP` are read only when the socket peer
    /// is a trusted proxy. The forwarded chain is walked from the nearest
    /// hop and the first address outside the trusted networks wins.
    pub fn resolve(
        principal: Option<&Principal>,
        headers: &HeaderMap,
        peer: Option<IpAddr>,
        trusted: &TrustedProxies,
    ) -> Self {
        if let Some(p) = principal {
            return CallerIdentity::User(p.user_id());
        }

        let peer = match peer {
            Some(peer) => peer,
            None => return CallerIdentity::Unknown,
        };
        if !trusted.contains(&peer) {
            return CallerIdentity::Ip(peer);
        }

        let chain: Vec<IpAddr> = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .map(|s| {
                s.split(',')
                    .filter_map(|part| part.trim().parse::<IpAddr>().ok())
                    .collect()
            })
            .unwrap_or_default();
        let forwarded = chain
            .iter()
            .rev()
            .find(|ip| !trusted.contains(ip))
            .or_else(|| chain.first());
        if let Some(ip) = forwarded {
            return CallerIdentity::Ip(*ip);
        }

        let real_ip = headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<IpAddr>().ok());
        if let Some(ip) = real_ip {
            return CallerIdentity::Ip(ip);
        }

        CallerIdentity::Ip(peer)
    }
}

impl std::fmt::Display for CallerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallerIdentity::User(id) => write!(f, "user:{}", id),
            CallerIdentity::Ip(ip) => write!(f, "ip:{}", ip),
            CallerIdentity::Unknown => f.write_str("unknown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub limit: u32,
    pub remaining: u32,
    pub reset_after: Duration,
}

/// Whole seconds to wait, never zero.
pub fn retry_after_secs(ttl: Duration) -> u64 {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    secs.max(1)
}

pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    policies: RateLimitPolicies,
    trusted_proxies: TrustedProxies,
    fail_open: bool,
    store_timeout: Duration,
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn CounterStore>,
        policies: RateLimitPolicies,
        fail_open: bool,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            policies,
            trusted_proxies: TrustedProxies::default(),
            fail_open,
            store_timeout,
        }
    }

    pub fn with_trusted_proxies(mut self, trusted_proxies: TrustedProxies) -> Self {
        self.trusted_proxies = trusted_proxies;
        self
    }

    pub fn policies(&self) -> &RateLimitPolicies {
        &self.policies
    }

    pub fn caller(&self, principal: Option<&Principal>, headers: &HeaderMap, peer: Option<IpAddr>) -> CallerIdentity {
        CallerIdentity::resolve(principal, headers, peer, &self.trusted_proxies)
    }

    pub fn key(class: RouteClass, caller: &CallerIdentity) -> String {
        format!("rate:{}:{}", class.as_str(), caller)
    }

    /// Counts this request and rejects it once the window's quota is spent.
    /// The increment and the check are one atomic store operation.
    pub async fn check(
        &self,
        ctx: &RequestContext,
        class: RouteClass,
        caller: &CallerIdentity,
    ) -> Result<RateLimitDecision, AuthError> {
        let policy = self.policies.policy(class);
        let key = Self::key(class, caller);

        let state = match bounded(ctx, self.store_timeout, self.store.increment(&key, policy.window)).await {
            Ok(state) => state,
            Err(AuthError::Store(e)) if self.fail_open => {
                tracing::error!(error = %e, route_class = class.as_str(), "Rate limit store failed, allowing request");
                return Ok(RateLimitDecision {
                    limit: policy.limit,
                    remaining: policy.limit,
                    reset_after: policy.window,
                });
            }
            Err(e) => return Err(e),
        };

        if state.count > u64::from(policy.limit) {
            let retry_after = retry_after_secs(state.ttl);
            tracing::warn!(
                route_class = class.as_str(),
                caller = %caller,
                count = state.count,
                limit = policy.limit,
                retry_after,
                "Rate limit exceeded"
            );
            return Err(AuthError::RateLimited { retry_after });
        }

        let remaining = u64::from(policy.limit) - state.count;
        Ok(RateLimitDecision {
            limit: policy.limit,
            remaining: u32::try_from(remaining).unwrap_or(u32::MAX),
            reset_after: state.ttl,
        })
    }
}
