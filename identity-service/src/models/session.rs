use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Header a client uses to declare what kind of client it is.
pub const PLATFORM_HEADER: &str = "x-platform";

/// Kind of client a session was opened from; selects the token lifetimes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ClientPlatform {
    #[default]
    Browser,
    Mobile,
}

impl ClientPlatform {
    /// `mobile` (any case) selects the mobile lifetimes; everything else is a browser.
    pub fn from_header(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.trim().eq_ignore_ascii_case("mobile") => ClientPlatform::Mobile,
            _ => ClientPlatform::Browser,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ClientPlatform::Browser => "browser",
            ClientPlatform::Mobile => "mobile",
        }
    }
}

impl std::str::FromStr for ClientPlatform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "browser" => Ok(ClientPlatform::Browser),
            "mobile" => Ok(ClientPlatform::Mobile),
            other => Err(format!("Unknown platform: {}", other)),
        }
    }
}

/// Server-side record of a refresh token lineage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    /// `jti` of the only refresh token currently honoured for this session.
    pub current_jti: Uuid,
    pub platform: ClientPlatform,
    pub remember_me: bool,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Live means neither revoked nor expired.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && !self.is_expired(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_header_defaults_to_browser() {
        assert_eq!(ClientPlatform::from_header(None), ClientPlatform::Browser);
        assert_eq!(ClientPlatform::from_header(Some("web")), ClientPlatform::Browser);
        assert_eq!(ClientPlatform::from_header(Some("Mobile")), ClientPlatform::Mobile);
    }
}
