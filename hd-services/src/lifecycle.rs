//! Application lifecycle: startup, login, logout and shutdown.
//!
//! Startup restores the persisted session before anything is armed, so the
//! refresh schedule comes from the persisted expiry. Only then are the
//! adapters attached and the realtime connection opened.

use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use hd_api::ApiClient;
use hd_auth::{
    AuthRefresher, CredentialSource, FileSessionStorage, RefreshPolicy, Session, SessionEvent,
    SessionStorage, SessionStore,
};
use hd_core::config::{AppConfig, ConfigHandle};
use hd_core::error::{HdError, HdResult};
use hd_models::User;
use hd_socket::{ConnectionCallbacks, ConnectionState};

use crate::adapters::Publisher;
use crate::event_bus::EventBus;
use crate::hub::RealtimeHub;
use crate::lock;
use crate::registry::{AdapterRegistry, WatchScope};

/// Application lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    /// Nothing loaded yet.
    NotStarted,
    /// Restoring the session and connecting.
    Starting,
    /// Running without a session; waiting for login.
    SignedOut,
    /// Session restored, realtime connection not started.
    Offline,
    /// Signed in; adapters attached and the connection loop running.
    Online,
    /// Tearing down.
    ShuttingDown,
    Stopped,
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::Starting => write!(f, "starting"),
            Self::SignedOut => write!(f, "signed_out"),
            Self::Offline => write!(f, "offline"),
            Self::Online => write!(f, "online"),
            Self::ShuttingDown => write!(f, "shutting_down"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Account endpoints the lifecycle drives.
#[async_trait]
pub trait AccountApi: Send + Sync {
    async fn login(&self, username: &str, password: &str) -> HdResult<Session>;
    async fn logout(&self) -> HdResult<()>;
    async fn current_user(&self) -> HdResult<User>;
    /// Authorize requests with whatever credential `source` holds.
    fn bind_credentials(&self, source: Weak<dyn CredentialSource>);
}

#[async_trait]
impl AccountApi for ApiClient {
    async fn login(&self, username: &str, password: &str) -> HdResult<Session> {
        ApiClient::login(self, username, password).await
    }

    async fn logout(&self) -> HdResult<()> {
        ApiClient::logout(self).await
    }

    async fn current_user(&self) -> HdResult<User> {
        ApiClient::current_user(self).await
    }

    fn bind_credentials(&self, source: Weak<dyn CredentialSource>) {
        ApiClient::bind_credentials(self, source)
    }
}

/// Health of one attached adapter.
#[derive(Debug, Clone, Serialize)]
pub struct AdapterHealth {
    pub name: String,
    pub state: String,
    pub healthy: bool,
}

/// Snapshot of the lifecycle for status displays.
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleDiagnostics {
    pub phase: LifecyclePhase,
    pub authenticated: bool,
    pub user_id: Option<i64>,
    pub username: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub next_refresh_at: Option<DateTime<Utc>>,
    pub connection: ConnectionState,
    pub ws_url: String,
    pub adapters: Vec<AdapterHealth>,
}

pub struct Lifecycle {
    config: AppConfig,
    account: Arc<dyn AccountApi>,
    sessions: Arc<SessionStore>,
    hub: Arc<RealtimeHub>,
    bus: EventBus,
    phase: Arc<Mutex<LifecyclePhase>>,
    adapters: Arc<Mutex<Option<AdapterRegistry>>>,
    watcher: JoinHandle<()>,
}

impl Lifecycle {
    /// Wire the production stack from configuration: REST client, file
    /// session storage and a WebSocket hub. Must be called inside a tokio
    /// runtime.
    pub fn build(config: AppConfig) -> HdResult<Self> {
        let api = Arc::new(ApiClient::new(&config.server)?);
        let storage: Arc<dyn SessionStorage> =
            Arc::new(FileSessionStorage::new(config.effective_session_path()?));
        let refresher: Arc<dyn AuthRefresher> = api.clone();
        let sessions = SessionStore::new(refresher, storage, RefreshPolicy::from(&config.session));
        let bus = EventBus::default();
        let hub = RealtimeHub::new(
            config.effective_ws_url()?,
            &config.realtime,
            Arc::clone(&sessions),
            bus.clone(),
        );
        Ok(Self::from_parts(config, api, sessions, hub, bus))
    }

    /// Build from the current contents of a shared config handle.
    pub async fn load(handle: &ConfigHandle) -> HdResult<Self> {
        Self::build(handle.snapshot().await)
    }

    /// Assemble from prepared parts. The account API is bound to the
    /// session store. Must be called inside a tokio runtime.
    pub fn from_parts(
        config: AppConfig,
        account: Arc<dyn AccountApi>,
        sessions: Arc<SessionStore>,
        hub: RealtimeHub,
        bus: EventBus,
    ) -> Self {
        let source: Weak<dyn CredentialSource> = Arc::downgrade(&sessions) as Weak<SessionStore>;
        account.bind_credentials(source);

        let phase = Arc::new(Mutex::new(LifecyclePhase::NotStarted));
        let adapters = Arc::new(Mutex::new(None));
        let watcher = tokio::spawn(watch_session_end(
            Arc::clone(&sessions),
            sessions.subscribe_events(),
            Arc::clone(&phase),
            Arc::clone(&adapters),
        ));
        Self {
            config,
            account,
            sessions,
            hub: Arc::new(hub),
            bus,
            phase,
            adapters,
            watcher,
        }
    }

    /// Restore the persisted session and, if there is one, go online.
    ///
    /// Returns whether the user is signed in afterwards.
    pub async fn startup(
        &self,
        scope: &WatchScope,
        callbacks: ConnectionCallbacks,
    ) -> HdResult<bool> {
        let Some(user) = self.restore().await? else {
            return Ok(false);
        };
        self.go_online(&user, scope, callbacks).await?;
        Ok(true)
    }

    /// Restore the persisted session without connecting. The REST client
    /// is authorized and a missing profile is fetched.
    pub async fn restore(&self) -> HdResult<Option<User>> {
        self.set_phase(LifecyclePhase::Starting);

        let restored = self.sessions.restore()?;
        let Some(session) = self.sessions.get_session().filter(|_| restored) else {
            info!("no persisted session, waiting for login");
            self.set_phase(LifecyclePhase::SignedOut);
            return Ok(None);
        };

        let user = match &session.user {
            Some(user) => user.clone(),
            None => {
                debug!("restored session has no profile, fetching it");
                let user = self.account.current_user().await?;
                self.sessions
                    .set_session(Session::new(session.credential.clone(), Some(user.clone())));
                user
            }
        };
        self.set_phase(LifecyclePhase::Offline);
        Ok(Some(user))
    }

    /// Sign in, persist the session and go online.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        scope: &WatchScope,
        callbacks: ConnectionCallbacks,
    ) -> HdResult<User> {
        let mut session = self.account.login(username, password).await?;
        let user = match session.user.clone() {
            Some(user) => user,
            None => {
                let user = self.account.current_user().await?;
                session.user = Some(user.clone());
                user
            }
        };
        self.sessions.set_session(session);
        self.go_online(&user, scope, callbacks).await?;
        Ok(user)
    }

    /// Sign out: best-effort server logout, then drop the session locally.
    pub async fn logout(&self) {
        self.go_offline().await;
        if self.sessions.is_authenticated() {
            if let Err(e) = self.account.logout().await {
                warn!("server logout failed, clearing session locally: {e}");
            }
        }
        self.sessions.clear_session();
        self.set_phase(LifecyclePhase::SignedOut);
        info!("signed out");
    }

    /// Detach everything and close the connection. The session stays
    /// persisted for the next start.
    pub async fn shutdown(&self) {
        self.set_phase(LifecyclePhase::ShuttingDown);
        self.watcher.abort();
        self.detach_adapters();
        self.hub.shutdown().await;
        self.set_phase(LifecyclePhase::Stopped);
        info!("lifecycle stopped");
    }

    async fn go_online(
        &self,
        user: &User,
        scope: &WatchScope,
        callbacks: ConnectionCallbacks,
    ) -> HdResult<()> {
        self.detach_adapters();
        let publisher: Arc<dyn Publisher> = self.hub.clone();
        let mut registry =
            AdapterRegistry::for_user(self.hub.router(), &self.bus, publisher, user, scope);
        registry.init_all()?;
        *lock(&self.adapters) = Some(registry);

        self.hub.connect(user.id, callbacks).await?;
        self.set_phase(LifecyclePhase::Online);
        info!("online as {} (user {})", user.display_name(), user.id);
        Ok(())
    }

    async fn go_offline(&self) {
        self.detach_adapters();
        self.hub.disconnect().await;
    }

    fn detach_adapters(&self) {
        detach(&self.adapters);
    }

    fn set_phase(&self, phase: LifecyclePhase) {
        transition(&self.phase, phase);
    }

    pub fn phase(&self) -> LifecyclePhase {
        *lock(&self.phase)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn hub(&self) -> &Arc<RealtimeHub> {
        &self.hub
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Signed-in user, if any.
    pub fn current_user(&self) -> Option<User> {
        self.sessions.get_session().and_then(|s| s.user.clone())
    }

    /// Current user or `NotAuthenticated`.
    pub fn require_user(&self) -> HdResult<User> {
        self.current_user().ok_or(HdError::NotAuthenticated)
    }

    pub fn diagnostics(&self) -> LifecycleDiagnostics {
        let session = self.sessions.get_session();
        let adapters = lock(&self.adapters)
            .as_ref()
            .map(|registry| {
                registry
                    .health_check()
                    .into_iter()
                    .map(|(name, state, healthy)| AdapterHealth {
                        name,
                        state: state.to_string(),
                        healthy,
                    })
                    .collect()
            })
            .unwrap_or_default();

        LifecycleDiagnostics {
            phase: self.phase(),
            authenticated: session.is_some(),
            user_id: session.as_ref().and_then(|s| s.user_id()),
            username: session
                .as_ref()
                .and_then(|s| s.user.as_ref())
                .map(|u| u.username.clone()),
            expires_at: session.as_ref().map(|s| s.expires_at()),
            next_refresh_at: self.sessions.next_refresh_at(),
            connection: self.hub.state(),
            ws_url: self.hub.url().to_string(),
            adapters,
        }
    }
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

fn detach(adapters: &Mutex<Option<AdapterRegistry>>) {
    if let Some(mut registry) = lock(adapters).take() {
        registry.shutdown_all();
    }
}

fn transition(current: &Mutex<LifecyclePhase>, phase: LifecyclePhase) {
    let mut current = lock(current);
    if *current != phase {
        debug!("lifecycle phase: {} -> {phase}", *current);
        *current = phase;
    }
}

/// Sign out locally once the session store drops the session on its own,
/// e.g. after a rejected refresh.
async fn watch_session_end(
    sessions: Arc<SessionStore>,
    mut events: broadcast::Receiver<SessionEvent>,
    phase: Arc<Mutex<LifecyclePhase>>,
    adapters: Arc<Mutex<Option<AdapterRegistry>>>,
) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::Cleared { reason }) => {
                // A login may have landed since the event was sent.
                if sessions.is_authenticated() {
                    continue;
                }
                if matches!(*lock(&phase), LifecyclePhase::Online | LifecyclePhase::Offline) {
                    info!("session ended ({reason}), detaching adapters");
                    detach(&adapters);
                    transition(&phase, LifecyclePhase::SignedOut);
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(n)) => warn!("lifecycle missed {n} session events"),
            Err(RecvError::Closed) => break,
        }
    }
}
