use chrono::Duration;
use jsonwebtoken::Algorithm;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

use crate::models::ClientPlatform;
use crate::services::TrustedProxies;

/// Minimum HMAC key length accepted for signing.
pub const MIN_SECRET_BYTES: usize = 32;

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub security: SecurityConfig,
    pub rate_limit: RateLimitConfig,
    pub request: RequestConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: SecretString,
    pub issuer: String,
    pub algorithm: Algorithm,
    pub access_token_expiry_minutes: i64,
    pub refresh_token_expiry_days: i64,
    pub remember_me_expiry_days: i64,
    pub mobile_access_token_expiry_hours: i64,
    pub mobile_refresh_token_expiry_hours: i64,
    pub csrf_token_expiry_seconds: i64,
}

impl JwtConfig {
    /// HS256 with the default lifetimes.
    pub fn new(secret: impl Into<String>, issuer: impl Into<String>) -> Self {
        Self {
            secret: SecretString::new(secret.into()),
            issuer: issuer.into(),
            algorithm: Algorithm::HS256,
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 7,
            remember_me_expiry_days: 30,
            mobile_access_token_expiry_hours: 168,
            mobile_refresh_token_expiry_hours: 336,
            csrf_token_expiry_seconds: 60,
        }
    }

    /// Access and refresh lifetimes for a login from `platform`.
    pub fn ttls(&self, platform: ClientPlatform, remember_me: bool) -> TokenTtls {
        match platform {
            ClientPlatform::Mobile => TokenTtls {
                access: Duration::hours(self.mobile_access_token_expiry_hours),
                refresh: Duration::hours(self.mobile_refresh_token_expiry_hours),
            },
            ClientPlatform::Browser => TokenTtls {
                access: Duration::minutes(self.access_token_expiry_minutes),
                refresh: if remember_me {
                    Duration::days(self.remember_me_expiry_days)
                } else {
                    Duration::days(self.refresh_token_expiry_days)
                },
            },
        }
    }

    pub fn csrf_ttl(&self) -> Duration {
        Duration::seconds(self.csrf_token_expiry_seconds)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenTtls {
    pub access: Duration,
    pub refresh: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub login_attempts: u32,
    pub login_window_seconds: u64,
    pub register_attempts: u32,
    pub register_window_seconds: u64,
    pub refresh_attempts: u32,
    pub refresh_window_seconds: u64,
    pub api_limit: u32,
    pub api_window_seconds: u64,
    /// Let requests through when the counter store cannot be reached.
    pub fail_open: bool,
    /// Peers allowed to set `X-Forwarded-For` / `X-Real-IP`.
    pub trusted_proxies: TrustedProxies,
    pub login_failure_max_attempts: u32,
    pub login_failure_window_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            login_attempts: 5,
            login_window_seconds: 900,
            register_attempts: 3,
            register_window_seconds: 3600,
            refresh_attempts: 30,
            refresh_window_seconds: 60,
            api_limit: 100,
            api_window_seconds: 60,
            fail_open: false,
            trusted_proxies: TrustedProxies::default(),
            login_failure_max_attempts: 5,
            login_failure_window_seconds: 1800,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestConfig {
    pub timeout_seconds: u64,
    pub store_timeout_millis: u64,
}

impl RequestConfig {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_seconds)
    }

    pub fn store_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.store_timeout_millis)
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 60,
            store_timeout_millis: 3000,
        }
    }
}

impl IdentityConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;
        let defaults = RateLimitConfig::default();
        let request_defaults = RequestConfig::default();

        let config = IdentityConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("identity-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            redis: RedisConfig {
                url: get_env("REDIS_URL", Some("redis://127.0.0.1:6379"), is_prod)?,
            },
            jwt: JwtConfig {
                secret: SecretString::new(get_env("JWT_SECRET", None, is_prod)?),
                issuer: get_env("JWT_ISSUER", Some("identity-service"), is_prod)?,
                algorithm: parse_hmac_algorithm(&get_env("JWT_ALGORITHM", Some("HS256"), is_prod)?)?,
                access_token_expiry_minutes: get_parsed(
                    "JWT_ACCESS_TOKEN_EXPIRY_MINUTES",
                    "15",
                    is_prod,
                )?,
                refresh_token_expiry_days: get_parsed("JWT_REFRESH_TOKEN_EXPIRY_DAYS", "7", is_prod)?,
                remember_me_expiry_days: get_parsed("JWT_REMEMBER_ME_EXPIRY_DAYS", "30", is_prod)?,
                mobile_access_token_expiry_hours: get_parsed(
                    "JWT_MOBILE_ACCESS_TOKEN_EXPIRY_HOURS",
                    "168",
                    is_prod,
                )?,
                mobile_refresh_token_expiry_hours: get_parsed(
                    "JWT_MOBILE_REFRESH_TOKEN_EXPIRY_HOURS",
                    "336",
                    is_prod,
                )?,
                csrf_token_expiry_seconds: get_parsed("CSRF_TOKEN_EXPIRY_SECONDS", "60", is_prod)?,
            },
            security: SecurityConfig {
                allowed_origins: get_env("ALLOWED_ORIGINS", Some("http://localhost:3000"), is_prod)?
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
            rate_limit: RateLimitConfig {
                login_attempts: get_env("RATE_LIMIT_LOGIN_ATTEMPTS", Some("5"), is_prod)?
                    .parse()
                    .unwrap_or(defaults.login_attempts),
                login_window_seconds: get_env("RATE_LIMIT_LOGIN_WINDOW_SECONDS", Some("900"), is_prod)?
                    .parse()
                    .unwrap_or(defaults.login_window_seconds),
                register_attempts: get_env("RATE_LIMIT_REGISTER_ATTEMPTS", Some("3"), is_prod)?
                    .parse()
                    .unwrap_or(defaults.register_attempts),
                register_window_seconds: get_env(
                    "RATE_LIMIT_REGISTER_WINDOW_SECONDS",
                    Some("3600"),
                    is_prod,
                )?
                .parse()
                .unwrap_or(defaults.register_window_seconds),
                refresh_attempts: get_env("RATE_LIMIT_REFRESH_ATTEMPTS", Some("30"), is_prod)?
                    .parse()
                    .unwrap_or(defaults.refresh_attempts),
                refresh_window_seconds: get_env(
                    "RATE_LIMIT_REFRESH_WINDOW_SECONDS",
                    Some("60"),
                    is_prod,
                )?
                .parse()
                .unwrap_or(defaults.refresh_window_seconds),
                api_limit: get_env("RATE_LIMIT_API_LIMIT", Some("100"), is_prod)?
                    .parse()
                    .unwrap_or(defaults.api_limit),
                api_window_seconds: get_env("RATE_LIMIT_API_WINDOW_SECONDS", Some("60"), is_prod)?
                    .parse()
                    .unwrap_or(defaults.api_window_seconds),
                fail_open: get_env("RATE_LIMIT_FAIL_OPEN", Some("false"), is_prod)?
                    .parse()
                    .unwrap_or(false),
                trusted_proxies: TrustedProxies::parse_list(&get_env(
                    "TRUSTED_PROXIES",
                    Some(""),
                    is_prod,
                )?)
                .map_err(|e| config_error(format!("TRUSTED_PROXIES is invalid: {}", e)))?,
                login_failure_max_attempts: get_env("LOGIN_FAILURE_MAX_ATTEMPTS", Some("5"), is_prod)?
                    .parse()
                    .unwrap_or(defaults.login_failure_max_attempts),
                login_failure_window_seconds: get_env(
                    "LOGIN_FAILURE_WINDOW_SECONDS",
                    Some("1800"),
                    is_prod,
                )?
                .parse()
                .unwrap_or(defaults.login_failure_window_seconds),
            },
            request: RequestConfig {
                timeout_seconds: get_env("REQUEST_TIMEOUT_SECONDS", Some("60"), is_prod)?
                    .parse()
                    .unwrap_or(request_defaults.timeout_seconds),
                store_timeout_millis: get_env("STORE_TIMEOUT_MILLIS", Some("3000"), is_prod)?
                    .parse()
                    .unwrap_or(request_defaults.store_timeout_millis),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(config_error("PORT must be greater than 0"));
        }

        if self.jwt.secret.expose_secret().len() < MIN_SECRET_BYTES {
            return Err(config_error(format!(
                "JWT_SECRET must be at least {} bytes",
                MIN_SECRET_BYTES
            )));
        }

        parse_hmac_algorithm(&format!("{:?}", self.jwt.algorithm))?;

        if self.jwt.access_token_expiry_minutes <= 0 {
            return Err(config_error("JWT_ACCESS_TOKEN_EXPIRY_MINUTES must be positive"));
        }

        if self.jwt.refresh_token_expiry_days <= 0 || self.jwt.remember_me_expiry_days <= 0 {
            return Err(config_error("Refresh token lifetimes must be positive"));
        }

        for platform in [ClientPlatform::Browser, ClientPlatform::Mobile] {
            let ttls = self.jwt.ttls(platform, false);
            if ttls.access <= Duration::zero() || ttls.refresh <= ttls.access {
                return Err(config_error(format!(
                    "Refresh token lifetime must exceed access token lifetime for {:?} clients",
                    platform
                )));
            }
        }

        if self.jwt.csrf_token_expiry_seconds <= 0 {
            return Err(config_error("CSRF_TOKEN_EXPIRY_SECONDS must be positive"));
        }

        let rl = &self.rate_limit;
        let quotas = [
            (rl.login_attempts, rl.login_window_seconds),
            (rl.register_attempts, rl.register_window_seconds),
            (rl.refresh_attempts, rl.refresh_window_seconds),
            (rl.api_limit, rl.api_window_seconds),
            (rl.login_failure_max_attempts, rl.login_failure_window_seconds),
        ];
        if quotas.iter().any(|(limit, window)| *limit == 0 || *window == 0) {
            return Err(config_error("Rate limit quotas and windows must be non-zero"));
        }

        if self.request.timeout_seconds == 0 || self.request.store_timeout_millis == 0 {
            return Err(config_error("Request and store timeouts must be non-zero"));
        }

        if self.environment == Environment::Prod
            && self.security.allowed_origins.iter().any(|o| o == "*")
        {
            return Err(config_error("Wildcard CORS origin not allowed in production"));
        }

        Ok(())
    }
}

/// Only the HMAC family is accepted for signing and verification.
pub fn parse_hmac_algorithm(value: &str) -> Result<Algorithm, AppError> {
    match value.trim().to_uppercase().as_str() {
        "HS256" => Ok(Algorithm::HS256),
        "HS384" => Ok(Algorithm::HS384),
        "HS512" => Ok(Algorithm::HS512),
        other => Err(config_error(format!(
            "JWT_ALGORITHM must be one of HS256, HS384, HS512 (got {})",
            other
        ))),
    }
}

fn config_error(msg: impl std::fmt::Display) -> AppError {
    AppError::ConfigError(anyhow::anyhow!(msg.to_string()))
}

fn get_parsed<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .parse()
        .map_err(|e: T::Err| config_error(format!("{} is invalid: {}", key, e)))
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(config_error(format!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(config_error(format!("{} is required but not set", key)))
            }
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> IdentityConfig {
        IdentityConfig {
            common: core_config::Config::default(),
            environment: Environment::Dev,
            service_name: "identity-service".to_string(),
            service_version: "test".to_string(),
            log_level: "info".to_string(),
            redis: RedisConfig {
                url: "redis://127.0.0.1:6379".to_string(),
            },
            jwt: JwtConfig::new("0123456789abcdef0123456789abcdef", "identity-test"),
            security: SecurityConfig {
                allowed_origins: vec!["*".to_string()],
            },
            rate_limit: RateLimitConfig::default(),
            request: RequestConfig::default(),
        }
    }

    #[test]
    fn defaults_are_valid() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn short_secret_is_rejected() {
        let mut cfg = config();
        cfg.jwt.secret = SecretString::new("too-short".to_string());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn asymmetric_algorithms_are_rejected() {
        assert!(parse_hmac_algorithm("hs384").is_ok());
        assert!(parse_hmac_algorithm("RS256").is_err());
        assert!(parse_hmac_algorithm("none").is_err());

        let mut cfg = config();
        cfg.jwt.algorithm = Algorithm::ES256;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn refresh_must_outlive_access() {
        let mut cfg = config();
        cfg.jwt.access_token_expiry_minutes = 60 * 24 * 8;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn wildcard_origin_rejected_in_prod() {
        let mut cfg = config();
        cfg.environment = Environment::Prod;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn no_proxy_is_trusted_by_default() {
        let cfg = config();
        assert!(cfg.rate_limit.trusted_proxies.is_empty());
        assert!(!cfg.rate_limit.trusted_proxies.contains(&"127.0.0.1".parse().unwrap()));
    }

    #[test]
    fn remember_me_extends_refresh_lifetime() {
        let jwt = JwtConfig::new("0123456789abcdef0123456789abcdef", "iss");
        let plain = jwt.ttls(ClientPlatform::Browser, false);
        let remembered = jwt.ttls(ClientPlatform::Browser, true);
        assert_eq!(plain.access, remembered.access);
        assert!(remembered.refresh > plain.refresh);

        let mobile = jwt.ttls(ClientPlatform::Mobile, false);
        assert_eq!(mobile.access, Duration::hours(168));
        assert_eq!(mobile.refresh, Duration::hours(336));
    }
}
