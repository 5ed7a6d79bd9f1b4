//! One-shot HTTP listener on 127.0.0.1 that captures the OAuth redirect.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{pkce, AuthError, AuthResult};

pub const DEFAULT_LOOPBACK_PORT: u16 = 34116;
pub const CALLBACK_PATH: &str = "/callback";

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);
const STATE_BYTES: usize = 32;

const SUCCESS_PAGE: &str = "<!doctype html><html><head><title>Quire</title></head>\
<body><h1>Signed in</h1><p>You can close this window and return to Quire.</p></body></html>";
const FAILURE_PAGE: &str = "<!doctype html><html><head><title>Quire</title></head>\
<body><h1>Sign-in failed</h1><p>Return to Quire and try again.</p></body></html>";
const GONE_PAGE: &str = "<!doctype html><html><head><title>Quire</title></head>\
<body><p>This sign-in request has already been handled.</p></body></html>";

/// Where the provider should redirect, and the `state` it must echo back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackTarget {
    pub redirect_url: String,
    pub state: String,
}

struct Attempt {
    result: Option<oneshot::Receiver<AuthResult<String>>>,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

struct CallbackState {
    expected_state: String,
    sender: Mutex<Option<oneshot::Sender<AuthResult<String>>>>,
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Loopback redirect listener. At most one attempt is active at a time.
pub struct LoopbackServer {
    port: u16,
    attempt: tokio::sync::Mutex<Option<Attempt>>,
}

impl Default for LoopbackServer {
    fn default() -> Self {
        Self::new(DEFAULT_LOOPBACK_PORT)
    }
}

impl LoopbackServer {
    /// Port `0` binds an ephemeral port.
    #[must_use]
    pub fn new(port: u16) -> Self {
        Self {
            port,
            attempt: tokio::sync::Mutex::new(None),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.attempt.lock().await.is_some()
    }

    /// Bind the listener and start serving the callback path.
    pub async fn start(&self) -> AuthResult<CallbackTarget> {
        let mut slot = self.attempt.lock().await;
        if slot.is_some() {
            return Err(AuthError::AlreadyRunning);
        }

        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| AuthError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let bound = listener.local_addr().map_err(|source| AuthError::Bind {
            addr: addr.to_string(),
            source,
        })?;

        let state = pkce::random_urlsafe(STATE_BYTES)?;
        let (sender, receiver) = oneshot::channel();
        let router = Router::new()
            .route(CALLBACK_PATH, get(handle_callback))
            .with_state(Arc::new(CallbackState {
                expected_state: state.clone(),
                sender: Mutex::new(Some(sender)),
            }));

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let handle = tokio::spawn(async move {
            let server = axum::serve(listener, router)
                .with_graceful_shutdown(async move { signal.cancelled().await });
            if let Err(error) = server.await {
                tracing::warn!(%error, "Loopback callback server stopped with an error");
            }
        });

        let redirect_url = format!("http://{bound}{CALLBACK_PATH}");
        tracing::info!(%redirect_url, "Loopback callback server listening");

        *slot = Some(Attempt {
            result: Some(receiver),
            shutdown,
            handle,
        });
        Ok(CallbackTarget {
            redirect_url,
            state,
        })
    }

    /// Wait for the redirect and return its authorization code. The listener
    /// is torn down whatever the outcome.
    pub async fn wait_for_code(&self, timeout: Duration) -> AuthResult<String> {
        let receiver = {
            let mut slot = self.attempt.lock().await;
            slot.as_mut().and_then(|attempt| attempt.result.take())
        };
        let Some(receiver) = receiver else {
            return Err(AuthError::Cancelled);
        };

        let outcome = match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(AuthError::Cancelled),
            Err(_) => Err(AuthError::Timeout(timeout)),
        };

        self.stop().await;
        outcome
    }

    /// Shut the listener down. Safe to call repeatedly.
    pub async fn stop(&self) {
        let Some(attempt) = self.attempt.lock().await.take() else {
            return;
        };

        attempt.shutdown.cancel();
        let mut handle = attempt.handle;
        if tokio::time::timeout(SHUTDOWN_DEADLINE, &mut handle)
            .await
            .is_err()
        {
            tracing::warn!("Loopback server did not drain in time; aborting");
            handle.abort();
        }
        tracing::debug!("Loopback callback server stopped");
    }
}

async fn handle_callback(
    State(callback): State<Arc<CallbackState>>,
    Query(params): Query<CallbackParams>,
) -> (StatusCode, Html<&'static str>) {
    let sender = callback
        .sender
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    let Some(sender) = sender else {
        return (StatusCode::GONE, Html(GONE_PAGE));
    };

    let result = classify(&callback.expected_state, params);
    let response = match &result {
        Ok(_) => (StatusCode::OK, Html(SUCCESS_PAGE)),
        Err(error) => {
            tracing::warn!(%error, "Rejected authorization callback");
            (StatusCode::BAD_REQUEST, Html(FAILURE_PAGE))
        }
    };
    let _ = sender.send(result);
    response
}

/// State is checked before anything else the request claims.
fn classify(expected_state: &str, params: CallbackParams) -> AuthResult<String> {
    if params.state.as_deref() != Some(expected_state) {
        return Err(AuthError::StateMismatch);
    }
    if let Some(error) = params.error {
        let message = match params.error_description {
            Some(description) => format!("{error}: {description}"),
            None => error,
        };
        return Err(AuthError::Provider(message));
    }
    match params.code {
        Some(code) if !code.trim().is_empty() => Ok(code),
        _ => Err(AuthError::MissingCode),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn get_status(url: &str) -> u16 {
        reqwest::get(url).await.unwrap().status().as_u16()
    }

    #[tokio::test]
    async fn captures_code_once() {
        let server = LoopbackServer::new(0);
        let target = server.start().await.unwrap();
        assert!(target.redirect_url.starts_with("http://127.0.0.1:"));
        assert!(target.redirect_url.ends_with(CALLBACK_PATH));

        let url = format!("{}?code=abc&state={}", target.redirect_url, target.state);
        assert_eq!(get_status(&url).await, 200);
        assert_eq!(get_status(&url).await, 410);

        let code = server.wait_for_code(Duration::from_secs(5)).await.unwrap();
        assert_eq!(code, "abc");
        assert!(!server.is_running().await);
    }

    #[tokio::test]
    async fn rejects_state_mismatch() {
        let server = LoopbackServer::new(0);
        let target = server.start().await.unwrap();

        let url = format!("{}?code=abc&state=forged", target.redirect_url);
        assert_eq!(get_status(&url).await, 400);

        let error = server.wait_for_code(Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(error, AuthError::StateMismatch));
    }

    #[tokio::test]
    async fn provider_error_is_reported() {
        let server = LoopbackServer::new(0);
        let target = server.start().await.unwrap();

        let url = format!(
            "{}?error=access_denied&state={}",
            target.redirect_url, target.state
        );
        assert_eq!(get_status(&url).await, 400);

        match server.wait_for_code(Duration::from_secs(5)).await {
            Err(AuthError::Provider(message)) => assert_eq!(message, "access_denied"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn error_without_matching_state_is_a_state_mismatch() {
        let server = LoopbackServer::new(0);
        let target = server.start().await.unwrap();

        let url = format!("{}?error=access_denied", target.redirect_url);
        assert_eq!(get_status(&url).await, 400);
        assert!(matches!(
            server.wait_for_code(Duration::from_secs(5)).await,
            Err(AuthError::StateMismatch)
        ));
    }

    #[tokio::test]
    async fn missing_code_is_rejected() {
        let server = LoopbackServer::new(0);
        let target = server.start().await.unwrap();

        let url = format!("{}?state={}", target.redirect_url, target.state);
        assert_eq!(get_status(&url).await, 400);
        assert!(matches!(
            server.wait_for_code(Duration::from_secs(5)).await,
            Err(AuthError::MissingCode)
        ));
    }

    #[tokio::test]
    async fn times_out_and_releases_port() {
        let server = LoopbackServer::new(0);
        let target = server.start().await.unwrap();
        let port = url::Url::parse(&target.redirect_url)
            .unwrap()
            .port()
            .unwrap();

        let error = server
            .wait_for_code(Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(error, AuthError::Timeout(_)));
        assert!(!server.is_running().await);

        // The same port can be bound again once the listener is gone.
        let rebound = LoopbackServer::new(port);
        rebound.start().await.unwrap();
        rebound.stop().await;
    }

    #[tokio::test]
    async fn second_start_fails_without_disturbing_first() {
        let server = LoopbackServer::new(0);
        let target = server.start().await.unwrap();

        assert!(matches!(
            server.start().await,
            Err(AuthError::AlreadyRunning)
        ));

        let url = format!("{}?code=xyz&state={}", target.redirect_url, target.state);
        assert_eq!(get_status(&url).await, 200);
        assert_eq!(
            server.wait_for_code(Duration::from_secs(5)).await.unwrap(),
            "xyz"
        );
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_cancels_waiters() {
        let server = Arc::new(LoopbackServer::new(0));
        server.start().await.unwrap();

        let waiter = {
            let server = server.clone();
            tokio::spawn(async move { server.wait_for_code(Duration::from_secs(30)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        server.stop().await;
        server.stop().await;

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(AuthError::Cancelled)));
    }

    #[tokio::test]
    async fn bind_conflict_is_a_setup_error() {
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = occupied.local_addr().unwrap().port();

        let server = LoopbackServer::new(port);
        assert!(matches!(server.start().await, Err(AuthError::Bind { .. })));
        assert!(!server.is_running().await);
    }

    #[test]
    fn classify_rules() {
        let params = |code: Option<&str>, state: Option<&str>| CallbackParams {
            code: code.map(str::to_string),
            state: state.map(str::to_string),
            error: None,
            error_description: None,
        };
        assert_eq!(classify("s", params(Some("c"), Some("s"))).unwrap(), "c");
        assert!(matches!(
            classify("s", params(Some("c"), None)),
            Err(AuthError::StateMismatch)
        ));
        assert!(matches!(
            classify("s", params(Some(" "), Some("s"))),
            Err(AuthError::MissingCode)
        ));

        let denied = |state: Option<&str>| CallbackParams {
            error: Some("access_denied".to_string()),
            ..params(None, state)
        };
        assert!(matches!(
            classify("s", denied(Some("forged"))),
            Err(AuthError::StateMismatch)
        ));
        assert!(matches!(
            classify("s", denied(Some("s"))),
            Err(AuthError::Provider(_))
        ));
    }
}
