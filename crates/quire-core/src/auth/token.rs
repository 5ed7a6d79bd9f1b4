use std::fmt;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::{AuthError, AuthResult};
use crate::util::unix_timestamp_now;

/// OAuth2 bearer credential with an absolute expiry.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    /// Empty when the provider did not issue one.
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Unix seconds
    pub expires_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl Token {
    /// Seconds of validity left, negative once expired.
    #[must_use]
    pub fn seconds_remaining(&self) -> i64 {
        self.expires_at - unix_timestamp_now()
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.seconds_remaining() <= 0
    }

    /// Whether the token expires within `margin` from now.
    #[must_use]
    pub fn expires_within(&self, margin: Duration) -> bool {
        let margin = i64::try_from(margin.as_secs()).unwrap_or(i64::MAX);
        self.seconds_remaining() <= margin
    }

    /// Combine a freshly refreshed token with this one, keeping the current
    /// refresh token when the provider did not rotate it.
    #[must_use]
    pub fn merge_refreshed(&self, refreshed: Self) -> Self {
        let refresh_token = if refreshed.refresh_token.is_empty() {
            self.refresh_token.clone()
        } else {
            refreshed.refresh_token
        };
        Self {
            access_token: refreshed.access_token,
            refresh_token,
            token_type: refreshed.token_type,
            expires_at: refreshed.expires_at,
            id_token: refreshed.id_token.or_else(|| self.id_token.clone()),
        }
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Token")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .field("id_token", &self.id_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Signed-in user, derived from the identity token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    /// Unix seconds
    pub created_at: i64,
}

#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    picture: Option<String>,
}

/// Read the profile claims out of an identity token.
///
/// The signature is not checked: the token came straight from the provider's
/// token endpoint over TLS.
pub fn profile_from_id_token(id_token: &str) -> AuthResult<UserProfile> {
    let payload = id_token
        .split('.')
        .nth(1)
        .filter(|segment| !segment.is_empty())
        .ok_or_else(|| AuthError::IdToken("expected three dot-separated segments".to_string()))?;

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|error| AuthError::IdToken(error.to_string()))?;
    let claims: IdTokenClaims = serde_json::from_slice(&bytes)?;

    Ok(UserProfile {
        id: claims.sub,
        email: claims.email.unwrap_or_default(),
        name: claims.name.unwrap_or_default(),
        picture: claims.picture,
        created_at: unix_timestamp_now(),
    })
}

#[cfg(test)]
pub(crate) fn token_expiring_in(seconds: i64) -> Token {
    Token {
        access_token: format!("access-{}", crate::util::monotonic_nanos()),
        refresh_token: "refresh-1".to_string(),
        token_type: "Bearer".to_string(),
        expires_at: unix_timestamp_now() + seconds,
        id_token: None,
    }
}
