use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use super::{parse_api_error, AuthError, AuthResult, PkceChallenge, Token};
use crate::util::{is_http_url, normalize_text_option, unix_timestamp_now};

pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const GOOGLE_SCOPES: [&str; 4] = [
    "openid",
    "https://www.googleapis.com/auth/userinfo.email",
    "https://www.googleapis.com/auth/userinfo.profile",
    "https://www.googleapis.com/auth/drive.file",
];

const DEFAULT_EXPIRES_IN_SECONDS: i64 = 3600;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Provider endpoints and client registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthConfig {
    pub client_id: String,
    /// Desktop clients may still be issued a secret; public clients have none.
    pub client_secret: Option<String>,
    pub auth_url: String,
    pub token_url: String,
    pub scopes: Vec<String>,
}

impl OAuthConfig {
    /// Google endpoints and scopes for the given client registration.
    pub fn google(client_id: impl Into<String>, client_secret: Option<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret,
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            scopes: GOOGLE_SCOPES.iter().map(ToString::to_string).collect(),
        }
    }

    fn validate(&self) -> AuthResult<()> {
        if self.client_id.trim().is_empty() {
            return Err(AuthError::InvalidConfiguration(
                "OAuth client id must not be empty".to_string(),
            ));
        }
        for (name, value) in [("auth", &self.auth_url), ("token", &self.token_url)] {
            if !is_http_url(value) {
                return Err(AuthError::InvalidConfiguration(format!(
                    "OAuth {name} URL must include http:// or https://"
                )));
            }
        }
        Ok(())
    }
}

/// The one operation the session needs from the provider.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> AuthResult<Token>;
}

/// Authorization-code + PKCE client.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    config: OAuthConfig,
    client: Client,
}

impl OAuthClient {
    pub fn new(config: OAuthConfig) -> AuthResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            client: Client::builder().timeout(REQUEST_TIMEOUT).build()?,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Consent-page URL for one attempt. Deterministic in its inputs.
    pub fn build_authorization_url(
        &self,
        redirect_uri: &str,
        state: &str,
        pkce: &PkceChallenge,
    ) -> AuthResult<String> {
        let mut url = Url::parse(&self.config.auth_url).map_err(|error| {
            AuthError::InvalidConfiguration(format!("Invalid OAuth auth URL: {error}"))
        })?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("scope", &self.config.scopes.join(" "))
            .append_pair("state", state)
            .append_pair("code_challenge", &pkce.challenge)
            .append_pair("code_challenge_method", pkce.method)
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent");
        Ok(url.into())
    }

    /// Trade an authorization code for a token.
    pub async fn exchange_code(
        &self,
        code: &str,
        verifier: &str,
        redirect_uri: &str,
    ) -> AuthResult<Token> {
        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("code_verifier", verifier),
            ("redirect_uri", redirect_uri),
            ("client_id", self.config.client_id.as_str()),
        ];
        if let Some(secret) = self.config.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }

        let response = self
            .client
            .post(&self.config.token_url)
            .form(&form)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Exchange(parse_api_error(status, &body)));
        }

        let payload = response.json::<TokenResponse>().await?;
        tracing::debug!(has_refresh_token = payload.refresh_token.is_some(), "Exchanged authorization code");
        payload.into_token().ok_or_else(|| {
            AuthError::Exchange("Token response did not include an access token".to_string())
        })
    }

    /// Redeem a refresh token. An omitted refresh token comes back empty.
    pub async fn refresh_token(&self, refresh_token: &str) -> AuthResult<Token> {
        let Some(refresh_token) = normalize_text_option(Some(refresh_token.to_string())) else {
            return Err(AuthError::ReauthenticationRequired);
        };

        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
            ("client_id", self.config.client_id.as_str()),
        ];
        if let Some(secret) = self.config.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }

        let response = self
            .client
            .post(&self.config.token_url)
            .form(&form)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Refresh(parse_api_error(status, &body)));
        }

        let payload = response.json::<TokenResponse>().await?;
        payload.into_token().ok_or_else(|| {
            AuthError::Refresh("Token response did not include an access token".to_string())
        })
    }
}

#[async_trait]
impl TokenRefresher for OAuthClient {
    async fn refresh(&self, refresh_token: &str) -> AuthResult<Token> {
        self.refresh_token(refresh_token).await
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    token_type: Option<String>,
    expires_in: Option<i64>,
    id_token: Option<String>,
}

impl TokenResponse {
    fn into_token(self) -> Option<Token> {
        let access_token = normalize_text_option(self.access_token)?;
        let expires_in = self
            .expires_in
            .filter(|seconds| *seconds > 0)
            .unwrap_or(DEFAULT_EXPIRES_IN_SECONDS);
        Some(Token {
            access_token,
            refresh_token: self.refresh_token.unwrap_or_default(),
            token_type: normalize_text_option(self.token_type)
                .unwrap_or_else(|| "Bearer".to_string()),
            expires_at: unix_timestamp_now().saturating_add(expires_in),
            id_token: normalize_text_option(self.id_token),
        })
    }
}
