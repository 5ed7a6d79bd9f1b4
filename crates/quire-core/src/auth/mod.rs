//! OAuth2 credential lifecycle: PKCE, loopback redirect capture, code
//! exchange, persisted credentials and the refreshing session.

mod credentials;
mod flow;
mod loopback;
mod oauth;
pub mod pkce;
mod session;
mod token;

use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

use crate::storage::StorageError;

pub use credentials::{CredentialStore, PROFILE_KEY, TOKEN_KEY};
pub use flow::login_interactive;
pub use loopback::{CallbackTarget, LoopbackServer, CALLBACK_PATH, DEFAULT_LOOPBACK_PORT};
pub use oauth::{
    OAuthClient, OAuthConfig, TokenRefresher, GOOGLE_AUTH_URL, GOOGLE_SCOPES, GOOGLE_TOKEN_URL,
};
pub use pkce::PkceChallenge;
pub use session::{SessionConfig, SessionEvent, SessionManager, SessionState};
pub use token::{profile_from_id_token, Token, UserProfile};

#[cfg(test)]
pub(crate) use session::testing;
#[cfg(test)]
pub(crate) use token::token_expiring_in;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid auth configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Failed to bind loopback listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Secure random source unavailable: {0}")]
    Entropy(String),
    #[error("Secure storage error: {0}")]
    SecureStorage(#[from] StorageError),

    #[error("Callback state did not match the authorization request")]
    StateMismatch,
    #[error("Authorization was denied by the provider: {0}")]
    Provider(String),
    #[error("Callback did not include an authorization code")]
    MissingCode,
    #[error("Timed out after {0:?} waiting for the authorization callback")]
    Timeout(Duration),
    #[error("An authorization attempt is already in progress")]
    AlreadyRunning,
    #[error("Authorization attempt was cancelled")]
    Cancelled,

    #[error("Authorization code exchange failed: {0}")]
    Exchange(String),
    #[error("Token refresh failed: {0}")]
    Refresh(String),
    #[error("Invalid identity token: {0}")]
    IdToken(String),
    #[error("Session expired; sign in again")]
    ReauthenticationRequired,
    #[error("Not signed in")]
    NotAuthenticated,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Failed to parse JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}

impl AuthError {
    /// Errors a caller should treat as "no usable session" rather than a
    /// transient fault.
    #[must_use]
    pub const fn is_session_missing(&self) -> bool {
        matches!(self, Self::NotAuthenticated | Self::ReauthenticationRequired)
    }
}

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, Deserialize)]
struct ProviderErrorResponse {
    error: Option<String>,
    error_description: Option<String>,
    message: Option<String>,
}

/// Render a provider error body into a short message.
fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ProviderErrorResponse>(body) {
        let message = match (payload.error, payload.error_description) {
            (Some(code), Some(description)) => Some(format!("{code}: {}", description.trim())),
            (code, description) => description.or(code).or(payload.message),
        };
        if let Some(message) = message {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = crate::util::compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_api_error_prefers_oauth_fields() {
        let message = parse_api_error(
            StatusCode::BAD_REQUEST,
            r#"{"error":"invalid_grant","error_description":"Token has been expired or revoked."}"#,
        );
        assert_eq!(
            message,
            "invalid_grant: Token has been expired or revoked. (400)"
        );
    }

    #[test]
    fn parse_api_error_falls_back_to_body() {
        assert_eq!(
            parse_api_error(StatusCode::BAD_GATEWAY, "  upstream down "),
            "upstream down (502)"
        );
        assert_eq!(parse_api_error(StatusCode::BAD_GATEWAY, ""), "HTTP 502");
    }
}
