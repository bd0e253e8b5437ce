//! Realtime hub: the one connection of a signed-in session, shared by every
//! consumer.
//!
//! The hub owns the topic router and the connection manager, reads the
//! credential from the session store at every handshake, and watches both:
//! connectivity changes and the end of the session are turned into
//! [`AppEvent`]s, and a rejected handshake triggers a session refresh before
//! the next reconnect attempt.

use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use hd_auth::{CredentialSource, SessionEvent, SessionStore};
use hd_core::config::RealtimeConfig;
use hd_core::error::{HdError, HdResult};
use hd_socket::{
    ConnectionCallbacks, ConnectionEvent, ConnectionManager, ConnectionState, Connector,
    SubscriptionHandle, TopicRouter,
};

use crate::adapters::Publisher;
use crate::event_bus::{AppEvent, EventBus};
use crate::lock;

pub struct RealtimeHub {
    router: TopicRouter,
    manager: Arc<ConnectionManager>,
    sessions: Arc<SessionStore>,
    bus: EventBus,
    user_id: Mutex<Option<i64>>,
    supervisor: JoinHandle<()>,
}

impl RealtimeHub {
    /// Hub over a WebSocket connection to `url`. Must be called inside a
    /// tokio runtime.
    pub fn new(
        url: impl Into<String>,
        config: &RealtimeConfig,
        sessions: Arc<SessionStore>,
        bus: EventBus,
    ) -> Self {
        let router = TopicRouter::new();
        let manager = ConnectionManager::websocket(url, router.clone(), config);
        Self::assemble(router, manager, sessions, bus)
    }

    /// Hub over a caller-supplied transport.
    pub fn with_connector(
        url: impl Into<String>,
        connector: Arc<dyn Connector>,
        config: &RealtimeConfig,
        sessions: Arc<SessionStore>,
        bus: EventBus,
    ) -> Self {
        let router = TopicRouter::new();
        let manager = ConnectionManager::new(url, connector, router.clone(), config);
        Self::assemble(router, manager, sessions, bus)
    }

    fn assemble(
        router: TopicRouter,
        manager: ConnectionManager,
        sessions: Arc<SessionStore>,
        bus: EventBus,
    ) -> Self {
        let manager = Arc::new(manager);
        let supervisor = tokio::spawn(supervise(
            Arc::clone(&manager),
            Arc::clone(&sessions),
            bus.clone(),
            manager.subscribe_events(),
            sessions.subscribe_events(),
        ));
        Self {
            router,
            manager,
            sessions,
            bus,
            user_id: Mutex::new(None),
            supervisor,
        }
    }

    /// Register a handler for `topic`. The topic is wired now if connected,
    /// otherwise on the next successful handshake.
    pub fn subscribe<F>(&self, topic: &str, handler: F) -> SubscriptionHandle
    where
        F: Fn(&Value) -> HdResult<()> + Send + Sync + 'static,
    {
        self.router.subscribe(topic, handler)
    }

    /// Register a handler receiving payloads deserialized as `T`.
    pub fn subscribe_as<T, F>(&self, topic: &str, handler: F) -> SubscriptionHandle
    where
        T: DeserializeOwned,
        F: Fn(T) -> HdResult<()> + Send + Sync + 'static,
    {
        self.router.subscribe_as(topic, handler)
    }

    /// Open the connection for `user_id` using the current session.
    ///
    /// A no-op while a connection loop is already running.
    pub async fn connect(&self, user_id: i64, callbacks: ConnectionCallbacks) -> HdResult<()> {
        if !self.sessions.is_authenticated() {
            return Err(HdError::NotAuthenticated);
        }
        if let Some(session_user) = self.sessions.get_session().and_then(|s| s.user_id()) {
            if session_user != user_id {
                warn!("connecting as user {user_id} but the session belongs to {session_user}");
            }
        }
        *lock(&self.user_id) = Some(user_id);

        let credentials: Arc<dyn CredentialSource> = self.sessions.clone();
        self.manager.connect(credentials, callbacks).await;
        Ok(())
    }

    /// Close the connection and stop reconnecting. Registrations survive.
    pub async fn disconnect(&self) {
        self.manager.disconnect().await;
    }

    pub fn is_connected(&self) -> bool {
        self.manager.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.manager.state_receiver()
    }

    pub fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.manager.subscribe_events()
    }

    /// Send a JSON payload to an application destination.
    pub fn publish<T: Serialize + ?Sized>(&self, destination: &str, payload: &T) -> HdResult<()> {
        self.manager.publish(destination, payload)
    }

    /// User the connection was opened for.
    pub fn user_id(&self) -> Option<i64> {
        *lock(&self.user_id)
    }

    pub fn router(&self) -> &TopicRouter {
        &self.router
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn url(&self) -> &str {
        self.manager.url()
    }

    /// Disconnect and stop watching the session. The hub is unusable after.
    pub async fn shutdown(&self) {
        self.manager.disconnect().await;
        self.supervisor.abort();
        *lock(&self.user_id) = None;
        info!("realtime hub shut down");
    }
}

impl Publisher for RealtimeHub {
    fn publish_json(&self, destination: &str, payload: &Value) -> HdResult<()> {
        self.publish(destination, payload)
    }
}

impl Drop for RealtimeHub {
    fn drop(&mut self) {
        self.supervisor.abort();
    }
}

async fn supervise(
    manager: Arc<ConnectionManager>,
    sessions: Arc<SessionStore>,
    bus: EventBus,
    mut connection: broadcast::Receiver<ConnectionEvent>,
    mut session: broadcast::Receiver<SessionEvent>,
) {
    loop {
        tokio::select! {
            event = connection.recv() => match event {
                Ok(event) => on_connection_event(&sessions, &bus, event).await,
                Err(RecvError::Lagged(n)) => warn!("hub missed {n} connection events"),
                Err(RecvError::Closed) => break,
            },
            event = session.recv() => match event {
                Ok(SessionEvent::Cleared { reason }) => {
                    info!("session ended ({reason}), closing realtime connection");
                    manager.disconnect().await;
                    bus.emit(AppEvent::SessionEnded { reason });
                }
                Ok(other) => debug!("session event: {other:?}"),
                Err(RecvError::Lagged(n)) => warn!("hub missed {n} session events"),
                Err(RecvError::Closed) => break,
            },
        }
    }
}

async fn on_connection_event(sessions: &SessionStore, bus: &EventBus, event: ConnectionEvent) {
    match event {
        ConnectionEvent::Connected => bus.emit(AppEvent::ConnectionStateChanged {
            connected: true,
            message: "connected".into(),
        }),
        ConnectionEvent::Dropped { reason } => bus.emit(AppEvent::ConnectionStateChanged {
            connected: false,
            message: reason,
        }),
        ConnectionEvent::HandshakeRejected { message } => {
            bus.emit(AppEvent::ConnectionStateChanged {
                connected: false,
                message: format!("handshake rejected: {message}"),
            });
            if sessions.is_authenticated() {
                info!("refreshing session after rejected handshake");
                if let Err(e) = sessions.refresh().await {
                    warn!("refresh after rejected handshake failed: {e}");
                }
            }
        }
        ConnectionEvent::ReconnectScheduled { attempt, delay } => {
            debug!("reconnect attempt {attempt} in {delay:?}");
        }
        ConnectionEvent::Closed => bus.emit(AppEvent::ConnectionStateChanged {
            connected: false,
            message: "closed".into(),
        }),
    }
}
