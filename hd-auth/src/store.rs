//! Session store: owns the current credential and keeps it fresh.
//!
//! Every credential change re-arms the token clock. A refresh exchanges the
//! refresh token through an [`AuthRefresher`]; success installs the new
//! credential, failure clears the session (unless the relaxed policy
//! tolerates a transient error) so no stale credential survives.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, error, info, warn};

use hd_core::config::SessionConfig;
use hd_core::error::{HdError, HdResult};

use crate::clock::{RefreshTrigger, TokenClock};
use crate::credential::Credential;
use crate::persist::SessionStorage;
use crate::session::{ClearReason, Session, SessionEvent};

/// Exchanges a refresh token for a new session.
#[async_trait]
pub trait AuthRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> HdResult<Session>;
}

/// Read access to the current credential, used at connection handshake time.
pub trait CredentialSource: Send + Sync {
    fn current_credential(&self) -> Option<Credential>;
}

/// How the store reacts to refresh timing and failures.
#[derive(Debug, Clone)]
pub struct RefreshPolicy {
    /// Lead time before expiry at which the refresh is scheduled.
    pub margin: Duration,
    /// Clear the session on any refresh failure, transient or not.
    pub logout_on_transient_error: bool,
    /// Retry delay after a tolerated transient failure.
    pub transient_retry: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

impl From<&SessionConfig> for RefreshPolicy {
    fn from(config: &SessionConfig) -> Self {
        Self {
            margin: config.refresh_margin(),
            logout_on_transient_error: config.logout_on_transient_refresh_error,
            transient_retry: config.transient_retry(),
        }
    }
}

/// Owner of the authenticated session.
pub struct SessionStore {
    state: watch::Sender<Option<Arc<Session>>>,
    events: broadcast::Sender<SessionEvent>,
    clock: TokenClock,
    storage: Arc<dyn SessionStorage>,
    refresher: Arc<dyn AuthRefresher>,
    policy: RefreshPolicy,
    /// Serializes refresh exchanges.
    refresh_lock: Mutex<()>,
    /// Bumped on every install or clear; detects results for a replaced session.
    epoch: AtomicU64,
}

impl SessionStore {
    /// Create an empty store. Call [`SessionStore::restore`] to load a
    /// persisted session.
    pub fn new(
        refresher: Arc<dyn AuthRefresher>,
        storage: Arc<dyn SessionStorage>,
        policy: RefreshPolicy,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<SessionStore>| {
            let trigger: Weak<dyn RefreshTrigger> = weak.clone();
            let (state, _) = watch::channel(None);
            let (events, _) = broadcast::channel(32);
            Self {
                state,
                events,
                clock: TokenClock::new(policy.margin, trigger),
                storage,
                refresher,
                policy,
                refresh_lock: Mutex::new(()),
                epoch: AtomicU64::new(0),
            }
        })
    }

    /// Load the persisted session and arm the token clock from its expiry.
    ///
    /// Returns whether a session was restored. A corrupt store is discarded.
    pub fn restore(&self) -> HdResult<bool> {
        match self.storage.load() {
            Ok(Some(session)) => {
                info!(
                    "restored session (expires at {})",
                    session.credential.expires_at
                );
                self.install(session, false, false);
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(HdError::Storage(msg)) => {
                warn!("discarding unreadable session: {msg}");
                self.storage.clear()?;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Install a new session (login), persist it, and schedule its refresh.
    pub fn set_session(&self, session: Session) {
        self.install(session, false, true);
    }

    /// Destroy the session. Idempotent: does nothing if already cleared.
    pub fn clear_session(&self) {
        self.clear_with_reason(ClearReason::Logout);
    }

    /// Current session, if authenticated.
    pub fn get_session(&self) -> Option<Arc<Session>> {
        self.state.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_some()
    }

    /// Watch the session; the value is `None` while logged out.
    pub fn watch(&self) -> watch::Receiver<Option<Arc<Session>>> {
        self.state.subscribe()
    }

    /// Subscribe to session lifecycle events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// When the next proactive refresh is due.
    pub fn next_refresh_at(&self) -> Option<DateTime<Utc>> {
        self.clock.due_at()
    }

    pub fn policy(&self) -> &RefreshPolicy {
        &self.policy
    }

    /// Exchange the refresh token for a new credential.
    ///
    /// Concurrent callers share one exchange. On failure the session is
    /// cleared and `HdError::RefreshFailed` is returned so the caller can
    /// send the user back to login.
    pub async fn refresh(&self) -> HdResult<()> {
        let observed = self.epoch.load(Ordering::SeqCst);
        let _guard = self.refresh_lock.lock().await;

        if self.epoch.load(Ordering::SeqCst) != observed {
            debug!("session changed while waiting, skipping refresh");
            return self.outcome_after_change();
        }

        let session = self.get_session().ok_or(HdError::NotAuthenticated)?;
        info!(
            "refreshing session (current token expires at {})",
            session.credential.expires_at
        );

        let result = self.refresher.refresh(&session.credential.refresh_token).await;

        if self.epoch.load(Ordering::SeqCst) != observed {
            debug!("discarding refresh result for a replaced session");
            return self.outcome_after_change();
        }

        match result {
            Ok(mut fresh) => {
                if fresh.user.is_none() {
                    fresh.user = session.user.clone();
                }
                self.install(fresh, true, true);
                Ok(())
            }
            Err(e) => {
                let tolerated = !self.policy.logout_on_transient_error
                    && e.is_transient()
                    && session.credential.is_valid_at(Utc::now());
                if tolerated {
                    warn!(
                        "transient refresh failure, retrying in {}s: {e}",
                        self.policy.transient_retry.as_secs()
                    );
                    self.clock.schedule_after(self.policy.transient_retry);
                    return Err(e);
                }

                error!("session refresh failed, logging out: {e}");
                self.clear_with_reason(ClearReason::RefreshFailed);
                Err(HdError::RefreshFailed(e.to_string()))
            }
        }
    }

    fn outcome_after_change(&self) -> HdResult<()> {
        if self.is_authenticated() {
            Ok(())
        } else {
            Err(HdError::NotAuthenticated)
        }
    }

    fn install(&self, session: Session, refreshed: bool, persist: bool) {
        if persist {
            if let Err(e) = self.storage.save(&session) {
                warn!("failed to persist session: {e}");
            }
        }

        let expires_at = session.credential.expires_at;
        let user_id = session.user_id();

        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.state.send_replace(Some(Arc::new(session)));
        self.clock.schedule_at(expires_at);

        let event = if refreshed {
            info!("session refreshed (expires at {expires_at})");
            SessionEvent::Refreshed { expires_at }
        } else {
            info!("session established for user {user_id:?} (expires at {expires_at})");
            SessionEvent::Established { user_id, expires_at }
        };
        let _ = self.events.send(event);
    }

    fn clear_with_reason(&self, reason: ClearReason) {
        if self.state.send_replace(None).is_none() {
            return;
        }
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.clock.cancel();
        if let Err(e) = self.storage.clear() {
            warn!("failed to remove persisted session: {e}");
        }
        info!("session cleared ({reason})");
        let _ = self.events.send(SessionEvent::Cleared { reason });
    }
}

#[async_trait]
impl RefreshTrigger for SessionStore {
    async fn on_refresh_due(&self) -> HdResult<()> {
        self.refresh().await
    }
}

impl CredentialSource for SessionStore {
    fn current_credential(&self) -> Option<Credential> {
        self.get_session().map(|s| s.credential.clone())
    }
}
