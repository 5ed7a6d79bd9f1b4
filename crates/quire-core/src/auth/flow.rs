use std::sync::Arc;
use std::time::Duration;

use super::{
    pkce, profile_from_id_token, AuthResult, CredentialStore, LoopbackServer, OAuthClient,
    SessionManager, UserProfile,
};

/// Run one interactive authorization-code login end to end.
///
/// `on_url` receives the consent URL to open in a browser. On any failure
/// the loopback listener is released, the session returns to
/// unauthenticated and the first error is returned.
pub async fn login_interactive<F>(
    oauth: &OAuthClient,
    loopback: &LoopbackServer,
    session: &Arc<SessionManager>,
    credentials: &CredentialStore,
    timeout: Duration,
    on_url: F,
) -> AuthResult<Option<UserProfile>>
where
    F: FnOnce(&str),
{
    session.begin_authentication().await?;

    let result = run_login(oauth, loopback, session, credentials, timeout, on_url).await;
    if let Err(error) = &result {
        tracing::warn!(%error, "Interactive login failed");
        loopback.stop().await;
        session.abort_authentication();
    }
    result
}

async fn run_login<F>(
    oauth: &OAuthClient,
    loopback: &LoopbackServer,
    session: &Arc<SessionManager>,
    credentials: &CredentialStore,
    timeout: Duration,
    on_url: F,
) -> AuthResult<Option<UserProfile>>
where
    F: FnOnce(&str),
{
    let challenge = pkce::generate()?;
    let target = loopback.start().await?;
    let url = oauth.build_authorization_url(&target.redirect_url, &target.state, &challenge)?;
    on_url(&url);

    let code = loopback.wait_for_code(timeout).await?;
    let token = oauth
        .exchange_code(&code, &challenge.verifier, &target.redirect_url)
        .await?;

    let profile = match token.id_token.as_deref().map(profile_from_id_token) {
        Some(Ok(profile)) => {
            if let Err(error) = credentials.save_profile(&profile) {
                tracing::warn!(%error, "Could not persist user profile");
            }
            Some(profile)
        }
        Some(Err(error)) => {
            tracing::warn!(%error, "Ignoring unreadable identity token");
            None
        }
        None => None,
    };

    session.start(token).await?;
    tracing::info!(
        email = profile.as_ref().map_or("", |profile| profile.email.as_str()),
        "Signed in"
    );
    Ok(profile)
}
