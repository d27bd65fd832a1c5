//! HMAC JWT signing and verification shared by every token kind.

use chrono::Duration;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::ExposeSecret;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::JwtConfig;
use crate::error::AuthError;
use crate::models::{Registered, RegisteredClaims, TokenUse};

pub struct TokenCodec {
    algorithm: Algorithm,
    issuer: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    clock: Arc<dyn Clock>,
}

impl TokenCodec {
    pub fn new(config: &JwtConfig, clock: Arc<dyn Clock>) -> Result<Self, AuthError> {
        if !matches!(
            config.algorithm,
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
        ) {
            return Err(AuthError::Internal(anyhow::anyhow!(
                "Only HMAC signing algorithms are supported, got {:?}",
                config.algorithm
            )));
        }

        let secret = config.secret.expose_secret().as_bytes();

        // Expiry and not-before are checked against the injected clock, so the
        // library's own wall-clock checks are off.
        let mut validation = Validation::new(config.algorithm);
        validation.algorithms = vec![config.algorithm];
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.leeway = 0;
        validation.set_issuer(&[config.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "nbf", "iss", "sub"]);

        tracing::info!(algorithm = ?config.algorithm, issuer = %config.issuer, "Token codec initialized");

        Ok(Self {
            algorithm: config.algorithm,
            issuer: config.issuer.clone(),
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            clock,
        })
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Registered claims for a token minted now and living for `ttl`.
    pub fn registered(&self, subject: String, token_use: TokenUse, ttl: Duration) -> RegisteredClaims {
        let now = self.clock.timestamp();
        RegisteredClaims {
            iss: self.issuer.clone(),
            sub: subject,
            iat: now,
            nbf: now,
            exp: now + ttl.num_seconds(),
            jti: Uuid::new_v4(),
            token_use,
        }
    }

    pub fn sign<T: Serialize>(&self, claims: &T) -> Result<String, AuthError> {
        encode(&Header::new(self.algorithm), claims, &self.encoding_key)
            .map_err(|e| AuthError::Internal(anyhow::anyhow!("Failed to sign token: {}", e)))
    }

    /// Checks signature, algorithm, issuer, token kind, expiry and not-before.
    /// Only an expired but otherwise sound token yields `TokenExpired`.
    pub fn verify<T>(&self, token: &str, expected: TokenUse) -> Result<T, AuthError>
    where
        T: DeserializeOwned + Registered,
    {
        let data = decode::<T>(token, &self.decoding_key, &self.validation).map_err(|e| {
            tracing::debug!(error = %e, "Token rejected");
            AuthError::InvalidToken
        })?;
        let claims = data.claims;
        let reg = claims.registered();

        if reg.token_use != expected {
            tracing::debug!(expected = ?expected, actual = ?reg.token_use, "Token of wrong kind");
            return Err(AuthError::InvalidToken);
        }
        if reg.exp <= reg.iat {
            return Err(AuthError::InvalidToken);
        }

        let now = self.clock.timestamp();
        if now >= reg.exp {
            return Err(AuthError::TokenExpired);
        }
        if now < reg.nbf {
            return Err(AuthError::InvalidToken);
        }

        Ok(claims)
    }
}
