//! Live session: owns the token, keeps it fresh on a timer and hands out
//! valid access tokens.
//!
//! Refreshes are single-flight. The scheduler and on-demand callers both go
//! through `refresh_gate`; a caller that waited on the gate compares the
//! generation it observed with the current one and reuses the token another
//! caller just obtained instead of refreshing again.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{AuthError, AuthResult, CredentialStore, Token, TokenRefresher};

const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Refresh timing knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// `valid_token` refreshes first when the token expires within this window.
    pub expiry_margin: Duration,
    /// Lower bound for the scheduled refresh delay.
    pub min_refresh_delay: Duration,
    /// First retry delay after a failed scheduled refresh; doubles each time.
    pub retry_base_delay: Duration,
    /// Retries after the first failed attempt before the session expires.
    pub max_retries: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            expiry_margin: Duration::from_secs(5 * 60),
            min_refresh_delay: Duration::from_secs(60),
            retry_base_delay: Duration::from_secs(5),
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticating,
    Active,
    Refreshing,
    Expired,
    LoggedOut,
}

impl SessionState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Authenticating => "authenticating",
            Self::Active => "active",
            Self::Refreshing => "refreshing",
            Self::Expired => "expired",
            Self::LoggedOut => "logged_out",
        }
    }

    /// Whether the session currently holds a usable token.
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Active | Self::Refreshing)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Published on every session transition worth observing. Delivery is best
/// effort: lagging or absent subscribers never block the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Refreshed { expires_at: i64 },
    RefreshFailed { attempt: u32, error: String },
    Expired,
    LoggedOut,
}

struct Inner {
    token: Option<Token>,
    state: SessionState,
    generation: u64,
}

struct Scheduler {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct SessionManager {
    refresher: Arc<dyn TokenRefresher>,
    credentials: CredentialStore,
    config: SessionConfig,
    shutdown: CancellationToken,
    inner: Mutex<Inner>,
    refresh_gate: tokio::sync::Mutex<()>,
    scheduler: Mutex<Option<Scheduler>>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionManager {
    /// `shutdown` is the process-wide token; the refresh timer runs on a child
    /// of it.
    pub fn new(
        refresher: Arc<dyn TokenRefresher>,
        credentials: CredentialStore,
        config: SessionConfig,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            refresher,
            credentials,
            config,
            shutdown,
            inner: Mutex::new(Inner {
                token: None,
                state: SessionState::Unauthenticated,
                generation: 0,
            }),
            refresh_gate: tokio::sync::Mutex::new(()),
            scheduler: Mutex::new(None),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.lock_inner().state
    }

    /// Expiry of the held token (Unix seconds).
    pub fn expires_at(&self) -> Option<i64> {
        self.lock_inner().token.as_ref().map(|token| token.expires_at)
    }

    pub const fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// Mark an interactive login as underway. Any live session is dropped
    /// from memory; persisted credentials stay until `start` replaces them.
    pub async fn begin_authentication(&self) -> AuthResult<()> {
        {
            let mut inner = self.lock_inner();
            if inner.state == SessionState::Authenticating {
                return Err(AuthError::AlreadyRunning);
            }
            inner.state = SessionState::Authenticating;
            inner.token = None;
            inner.generation += 1;
        }
        self.stop_scheduler().await;
        Ok(())
    }

    /// Undo `begin_authentication` after a failed login.
    pub fn abort_authentication(&self) {
        let mut inner = self.lock_inner();
        if inner.state == SessionState::Authenticating {
            inner.state = SessionState::Unauthenticated;
            inner.generation += 1;
        }
    }

    /// Persist `token`, make it the live session and schedule its refresh.
    pub async fn start(self: &Arc<Self>, token: Token) -> AuthResult<()> {
        self.stop_scheduler().await;
        self.credentials.save_token(&token)?;

        let expires_at = token.expires_at;
        self.activate(token);
        self.spawn_scheduler();
        tracing::info!(expires_at, "Session started");
        Ok(())
    }

    /// Resume from persisted credentials. Returns `false` when none exist.
    pub async fn restore_session(self: &Arc<Self>) -> AuthResult<bool> {
        let Some(token) = self.credentials.load_token()? else {
            return Ok(false);
        };

        self.stop_scheduler().await;
        let expires_at = token.expires_at;
        self.activate(token);
        self.spawn_scheduler();
        tracing::info!(expires_at, "Session restored from secure storage");
        Ok(true)
    }

    /// An access token that is good for at least the expiry margin, refreshing
    /// first when needed.
    pub async fn valid_token(&self) -> AuthResult<Token> {
        let (token, generation) = {
            let inner = self.lock_inner();
            match inner.state {
                SessionState::Active | SessionState::Refreshing => {}
                SessionState::Expired => return Err(AuthError::ReauthenticationRequired),
                _ => return Err(AuthError::NotAuthenticated),
            }
            let token = inner.token.clone().ok_or(AuthError::NotAuthenticated)?;
            (token, inner.generation)
        };

        if !token.expires_within(self.config.expiry_margin) {
            return Ok(token);
        }

        tracing::debug!("Access token near expiry; refreshing before use");
        self.refresh_single_flight(generation).await
    }

    /// Stop the schedule, forget the token and delete persisted credentials.
    pub async fn logout(&self) -> AuthResult<()> {
        self.stop_scheduler().await;
        let _gate = self.refresh_gate.lock().await;
        {
            let mut inner = self.lock_inner();
            inner.token = None;
            inner.state = SessionState::LoggedOut;
            inner.generation += 1;
        }
        let result = self.credentials.clear();
        let _ = self.events.send(SessionEvent::LoggedOut);
        tracing::info!("Logged out");
        result
    }

    /// Stop the refresh timer without touching the session.
    pub async fn stop(&self) {
        self.stop_scheduler().await;
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_scheduler(&self) -> MutexGuard<'_, Option<Scheduler>> {
        self.scheduler.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn activate(&self, token: Token) {
        let mut inner = self.lock_inner();
        inner.token = Some(token);
        inner.state = SessionState::Active;
        inner.generation += 1;
    }

    fn spawn_scheduler(self: &Arc<Self>) {
        let cancel = self.shutdown.child_token();
        let handle = tokio::spawn(Arc::clone(self).run_scheduler(cancel.clone()));
        if let Some(previous) = self.lock_scheduler().replace(Scheduler { cancel, handle }) {
            previous.cancel.cancel();
        }
    }

    async fn stop_scheduler(&self) {
        let scheduler = self.lock_scheduler().take();
        if let Some(scheduler) = scheduler {
            scheduler.cancel.cancel();
            if let Err(error) = scheduler.handle.await {
                tracing::warn!(%error, "Refresh scheduler task ended abnormally");
            }
        }
    }

    fn next_refresh(&self) -> Option<(Duration, u64)> {
        let inner = self.lock_inner();
        if !inner.state.is_live() {
            return None;
        }
        let token = inner.token.as_ref()?;
        let delay = refresh_delay(token.seconds_remaining(), self.config.min_refresh_delay);
        Some((delay, inner.generation))
    }

    async fn run_scheduler(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            let Some((delay, generation)) = self.next_refresh() else {
                return;
            };
            tracing::debug!(delay_secs = delay.as_secs(), "Next token refresh scheduled");

            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }

            // Someone refreshed or replaced the token while we slept.
            if self.lock_inner().generation != generation {
                continue;
            }
            if !self.refresh_with_retries(generation, &cancel).await {
                return;
            }
        }
    }

    /// Returns whether the schedule should continue.
    async fn refresh_with_retries(&self, generation: u64, cancel: &CancellationToken) -> bool {
        let mut backoff = self.config.retry_base_delay;
        let mut attempt = 0_u32;

        loop {
            attempt += 1;
            let result = tokio::select! {
                () = cancel.cancelled() => return false,
                result = self.refresh_single_flight(generation) => result,
            };

            let error = match result {
                Ok(_) => return true,
                Err(AuthError::NotAuthenticated) => return false,
                Err(AuthError::ReauthenticationRequired) => {
                    self.mark_expired(generation);
                    return false;
                }
                Err(error) => error,
            };

            let _ = self.events.send(SessionEvent::RefreshFailed {
                attempt,
                error: error.to_string(),
            });

            if attempt > self.config.max_retries {
                tracing::error!(attempts = attempt, %error, "Token refresh retries exhausted");
                self.mark_expired(generation);
                return false;
            }

            tracing::warn!(
                attempt,
                max_retries = self.config.max_retries,
                backoff_secs = backoff.as_secs(),
                %error,
                "Token refresh failed, retrying"
            );
            tokio::select! {
                () = cancel.cancelled() => return false,
                () = tokio::time::sleep(backoff) => {}
            }
            backoff = backoff.saturating_mul(2);
        }
    }

    async fn refresh_single_flight(&self, observed_generation: u64) -> AuthResult<Token> {
        let _gate = self.refresh_gate.lock().await;

        let (current, generation) = {
            let mut inner = self.lock_inner();
            match inner.state {
                SessionState::Active | SessionState::Refreshing => {}
                SessionState::Expired => return Err(AuthError::ReauthenticationRequired),
                _ => return Err(AuthError::NotAuthenticated),
            }
            let token = inner.token.clone().ok_or(AuthError::NotAuthenticated)?;
            if inner.generation != observed_generation {
                return Ok(token);
            }
            inner.state = SessionState::Refreshing;
            (token, inner.generation)
        };
        let _reset = RefreshingReset {
            inner: &self.inner,
            generation,
        };

        let refreshed = self.refresher.refresh(&current.refresh_token).await?;
        let merged = current.merge_refreshed(refreshed);

        {
            let mut inner = self.lock_inner();
            if inner.generation != generation || inner.state != SessionState::Refreshing {
                return Err(AuthError::NotAuthenticated);
            }
            inner.token = Some(merged.clone());
            inner.state = SessionState::Active;
            inner.generation += 1;
        }

        if let Err(error) = self.credentials.save_token(&merged) {
            tracing::warn!(%error, "Refreshed token could not be persisted; keeping it in memory");
        }
        let _ = self.events.send(SessionEvent::Refreshed {
            expires_at: merged.expires_at,
        });
        tracing::info!(expires_at = merged.expires_at, "Access token refreshed");
        Ok(merged)
    }

    fn mark_expired(&self, generation: u64) {
        {
            let mut inner = self.lock_inner();
            if inner.generation != generation || !inner.state.is_live() {
                return;
            }
            inner.state = SessionState::Expired;
        }
        let _ = self.events.send(SessionEvent::Expired);
        tracing::warn!("Session expired; sign in again to resume syncing");
    }
}

/// Puts a session left in `Refreshing` back to `Active` when a refresh ends
/// without installing a new token, including when its future is dropped.
struct RefreshingReset<'a> {
    inner: &'a Mutex<Inner>,
    generation: u64,
}

impl Drop for RefreshingReset<'_> {
    fn drop(&mut self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.generation == self.generation && inner.state == SessionState::Refreshing {
            inner.state = SessionState::Active;
        }
    }
}

/// Delay until the scheduled refresh: 75% of the remaining lifetime, never
/// less than `floor`, immediate once expired.
#[must_use]
pub fn refresh_delay(seconds_remaining: i64, floor: Duration) -> Duration {
    if seconds_remaining <= 0 {
        return Duration::ZERO;
    }
    let three_quarters = Duration::from_millis(seconds_remaining.unsigned_abs().saturating_mul(750));
    three_quarters.max(floor)
}
