//! Shared test utilities for integration tests.
//!
//! `FakeBroker` is an in-memory STOMP broker plugged in through the
//! `Connector` seam; it records what the client put on the wire and can
//! push messages, refuse connections, reject credentials or drop links.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, watch};

use hd_auth::{
    AuthRefresher, Credential, CredentialSource, MemorySessionStorage, RefreshPolicy, Session,
    SessionStorage, SessionStore,
};
use hd_core::config::RealtimeConfig;
use hd_core::error::{HdError, HdResult};
use hd_models::User;
use hd_services::{AccountApi, AppEvent, EventBus, RealtimeHub};
use hd_socket::frame::Inbound;
use hd_socket::{Command, Connector, Frame, FrameDecoder, TransportLink};

pub const WS_URL: &str = "ws://helpdesk.test/ws";

/// Upper bound for waiting on asynchronous effects. Long enough that paused
/// time reaches reconnect timers first.
pub const WAIT: Duration = Duration::from_secs(120);

/// One client frame as seen by the broker.
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Subscribe(String),
    Unsubscribe(String),
    Send { destination: String, body: String },
    Disconnect,
}

struct LiveSession {
    id: u64,
    to_client: mpsc::Sender<String>,
    connected: bool,
    subscriptions: HashMap<String, String>,
}

#[derive(Default)]
struct BrokerState {
    bearers: Vec<String>,
    log: Vec<Recorded>,
    sessions: Vec<LiveSession>,
    rejected: HashSet<String>,
    refuse: bool,
    attempts: usize,
    opened: usize,
    next_id: u64,
    next_message: u64,
}

struct BrokerInner {
    state: Mutex<BrokerState>,
    revision: watch::Sender<u64>,
}

impl BrokerInner {
    fn update<R>(&self, f: impl FnOnce(&mut BrokerState) -> R) -> R {
        let out = f(&mut self.state.lock().unwrap());
        self.revision.send_modify(|r| *r += 1);
        out
    }
}

#[derive(Clone)]
pub struct FakeBroker {
    inner: Arc<BrokerInner>,
}

impl Default for FakeBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBroker {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(BrokerInner {
                state: Mutex::new(BrokerState::default()),
                revision,
            }),
        }
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(self.clone())
    }

    /// Answer CONNECT frames carrying this bearer with ERROR.
    pub fn reject_bearer(&self, bearer: &str) {
        self.inner.update(|s| s.rejected.insert(bearer.to_string()));
    }

    /// Fail transport opens while set.
    pub fn refuse_connections(&self, refuse: bool) {
        self.inner.update(|s| s.refuse = refuse);
    }

    /// Close every live link from the broker side.
    pub fn drop_connections(&self) {
        self.inner.update(|s| s.sessions.clear());
    }

    /// Deliver a MESSAGE to every connected client subscribed to `topic`.
    pub fn publish(&self, topic: &str, body: &str) -> usize {
        self.inner.update(|s| {
            let mut delivered = 0;
            for session in s.sessions.iter().filter(|c| c.connected) {
                for (sub_id, destination) in &session.subscriptions {
                    if destination != topic {
                        continue;
                    }
                    s.next_message += 1;
                    let frame = Frame::new(Command::Message)
                        .header("destination", topic)
                        .header("subscription", sub_id.as_str())
                        .header("message-id", format!("m-{}", s.next_message))
                        .header("content-type", "application/json")
                        .body(body);
                    if session.to_client.try_send(frame.encode()).is_ok() {
                        delivered += 1;
                    }
                }
            }
            delivered
        })
    }

    pub fn log(&self) -> Vec<Recorded> {
        self.inner.state.lock().unwrap().log.clone()
    }

    pub fn bearers(&self) -> Vec<String> {
        self.inner.state.lock().unwrap().bearers.clone()
    }

    /// Transport opens tried, refused ones included.
    pub fn attempts(&self) -> usize {
        self.inner.state.lock().unwrap().attempts
    }

    pub fn opened(&self) -> usize {
        self.inner.state.lock().unwrap().opened
    }

    pub fn subscribe_count(&self, topic: &str) -> usize {
        self.count(|r| matches!(r, Recorded::Subscribe(t) if t == topic))
    }

    pub fn unsubscribe_count(&self, topic: &str) -> usize {
        self.count(|r| matches!(r, Recorded::Unsubscribe(t) if t == topic))
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.log()
            .into_iter()
            .filter_map(|r| match r {
                Recorded::Send { destination, body } => Some((destination, body)),
                _ => None,
            })
            .collect()
    }

    /// Topics currently subscribed on any connected link.
    pub fn live_topics(&self) -> Vec<String> {
        let state = self.inner.state.lock().unwrap();
        let mut topics: Vec<String> = state
            .sessions
            .iter()
            .filter(|c| c.connected)
            .flat_map(|c| c.subscriptions.values().cloned())
            .collect();
        topics.sort();
        topics
    }

    pub fn connected_clients(&self) -> usize {
        let state = self.inner.state.lock().unwrap();
        state.sessions.iter().filter(|c| c.connected).count()
    }

    fn count(&self, pred: impl Fn(&Recorded) -> bool) -> usize {
        self.inner.state.lock().unwrap().log.iter().filter(|r| pred(r)).count()
    }

    /// Wait until `pred` holds for the broker.
    pub async fn wait_until(&self, what: &str, pred: impl Fn(&FakeBroker) -> bool) {
        let mut rx = self.inner.revision.subscribe();
        let waited = tokio::time::timeout(WAIT, async {
            loop {
                if pred(self) {
                    return;
                }
                if rx.changed().await.is_err() {
                    return;
                }
            }
        })
        .await;
        assert!(waited.is_ok(), "timed out waiting for broker: {what}");
    }

    pub async fn wait_subscribed(&self, topic: &str) {
        let owned = topic.to_string();
        self.wait_until(&format!("SUBSCRIBE {topic}"), move |b| {
            b.live_topics().contains(&owned)
        })
        .await;
    }

    async fn serve(self, id: u64, mut from_client: mpsc::Receiver<String>) {
        let mut decoder = FrameDecoder::new(1 << 20);
        'link: while let Some(text) = from_client.recv().await {
            let Ok(items) = decoder.push(&text) else {
                break;
            };
            for item in items {
                let Inbound::Frame(frame) = item else {
                    continue;
                };
                if !self.handle(id, frame) {
                    break 'link;
                }
            }
        }
        self.inner.update(|s| s.sessions.retain(|c| c.id != id));
    }

    /// Apply one client frame. Returns false when the link should close.
    fn handle(&self, id: u64, frame: Frame) -> bool {
        self.inner.update(|s| {
            let rejected = s.rejected.clone();
            let Some(session) = s.sessions.iter_mut().find(|c| c.id == id) else {
                return false;
            };
            match frame.command {
                Command::Connect | Command::Stomp => {
                    let bearer = frame.get("Authorization").unwrap_or_default().to_string();
                    let reply = if rejected.contains(&bearer) {
                        Frame::new(Command::Error)
                            .header("message", "Invalid token")
                            .body("Authentication failed")
                    } else {
                        session.connected = true;
                        Frame::new(Command::Connected)
                            .header("version", "1.2")
                            .header("heart-beat", "0,0")
                    };
                    let ok = session.connected;
                    let _ = session.to_client.try_send(reply.encode());
                    s.bearers.push(bearer);
                    ok
                }
                Command::Subscribe => {
                    let sub_id = frame.get("id").unwrap_or_default().to_string();
                    let destination = frame.get("destination").unwrap_or_default().to_string();
                    session.subscriptions.insert(sub_id, destination.clone());
                    s.log.push(Recorded::Subscribe(destination));
                    true
                }
                Command::Unsubscribe => {
                    let sub_id = frame.get("id").unwrap_or_default();
                    if let Some(destination) = session.subscriptions.remove(sub_id) {
                        s.log.push(Recorded::Unsubscribe(destination));
                    }
                    true
                }
                Command::Send => {
                    s.log.push(Recorded::Send {
                        destination: frame.get("destination").unwrap_or_default().to_string(),
                        body: frame.body.clone(),
                    });
                    true
                }
                Command::Disconnect => {
                    s.log.push(Recorded::Disconnect);
                    false
                }
                _ => true,
            }
        })
    }
}

#[async_trait]
impl Connector for FakeBroker {
    async fn open(&self, _url: &str) -> HdResult<TransportLink> {
        let (link, from_client, to_client) = TransportLink::pair();
        let id = self.inner.update(|s| {
            s.attempts += 1;
            if s.refuse {
                return None;
            }
            s.opened += 1;
            s.next_id += 1;
            s.sessions.push(LiveSession {
                id: s.next_id,
                to_client,
                connected: false,
                subscriptions: HashMap::new(),
            });
            Some(s.next_id)
        });
        let Some(id) = id else {
            return Err(HdError::Socket("connection refused".into()));
        };
        tokio::spawn(self.clone().serve(id, from_client));
        Ok(link)
    }
}

/// Unsigned JWT whose payload carries `exp`.
pub fn jwt(sub: &str, exp: DateTime<Utc>) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(
        serde_json::json!({ "sub": sub, "exp": exp.timestamp() }).to_string(),
    );
    format!("{header}.{payload}.signature")
}

pub fn user(id: i64, specialist: bool) -> User {
    User {
        id,
        username: format!("user{id}"),
        fio: Some(format!("User {id}")),
        email: None,
        telegram_id: None,
        specialist,
        roles: if specialist {
            vec!["SPECIALIST".into()]
        } else {
            vec!["USER".into()]
        },
        active: true,
    }
}

/// Session for `user` whose access token expires `lifetime` from now.
pub fn session_for(user: &User, lifetime: chrono::Duration, tag: &str) -> Session {
    let expires_at = Utc::now() + lifetime;
    Session::new(
        Credential::new(
            jwt(&format!("{}-{tag}", user.username), expires_at),
            format!("refresh-{tag}"),
            expires_at,
        ),
        Some(user.clone()),
    )
}

pub fn long_session(user: &User, tag: &str) -> Session {
    session_for(user, chrono::Duration::hours(2), tag)
}

pub fn bearer_of(session: &Session) -> String {
    session.credential.bearer()
}

/// Refresh collaborator answering from a script.
pub struct ScriptedRefresher {
    responses: Mutex<VecDeque<HdResult<Session>>>,
    calls: AtomicUsize,
    seen_tokens: Mutex<Vec<String>>,
}

impl ScriptedRefresher {
    pub fn new(responses: Vec<HdResult<Session>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            calls: AtomicUsize::new(0),
            seen_tokens: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen_tokens(&self) -> Vec<String> {
        self.seen_tokens.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuthRefresher for ScriptedRefresher {
    async fn refresh(&self, refresh_token: &str) -> HdResult<Session> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_tokens.lock().unwrap().push(refresh_token.to_string());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(HdError::Unauthorized("refresh token expired".into())))
    }
}

/// Account endpoints backed by fixed data.
pub struct FakeAccount {
    pub user: User,
    pub login_session: Mutex<Option<Session>>,
    pub logouts: AtomicUsize,
    pub fail_logout: bool,
    credentials: Mutex<Option<Weak<dyn CredentialSource>>>,
}

impl FakeAccount {
    pub fn new(user: User, login_session: Option<Session>) -> Arc<Self> {
        Arc::new(Self {
            user,
            login_session: Mutex::new(login_session),
            logouts: AtomicUsize::new(0),
            fail_logout: false,
            credentials: Mutex::new(None),
        })
    }

    /// Access token the next request would carry.
    pub fn token(&self) -> Option<String> {
        let source = self.credentials.lock().unwrap().clone()?;
        source
            .upgrade()
            .and_then(|s| s.current_credential())
            .map(|c| c.access_token)
    }
}

#[async_trait]
impl AccountApi for FakeAccount {
    async fn login(&self, username: &str, password: &str) -> HdResult<Session> {
        if username != self.user.username || password != "secret" {
            return Err(HdError::Unauthorized("bad credentials".into()));
        }
        let session = self
            .login_session
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| HdError::Internal("no login scripted".into()))?;
        Ok(session)
    }

    async fn logout(&self) -> HdResult<()> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        if self.fail_logout {
            return Err(HdError::Http("connection reset".into()));
        }
        Ok(())
    }

    async fn current_user(&self) -> HdResult<User> {
        Ok(self.user.clone())
    }

    fn bind_credentials(&self, source: Weak<dyn CredentialSource>) {
        *self.credentials.lock().unwrap() = Some(source);
    }
}

pub fn realtime_config() -> RealtimeConfig {
    RealtimeConfig::default()
}

pub fn store(
    refresher: Arc<ScriptedRefresher>,
    storage: Arc<dyn SessionStorage>,
) -> Arc<SessionStore> {
    SessionStore::new(refresher, storage, RefreshPolicy::default())
}

pub fn memory_store(refresher: Arc<ScriptedRefresher>) -> Arc<SessionStore> {
    store(refresher, Arc::new(MemorySessionStorage::new()))
}

pub fn hub(broker: &FakeBroker, sessions: Arc<SessionStore>, bus: EventBus) -> RealtimeHub {
    RealtimeHub::with_connector(WS_URL, broker.connector(), &realtime_config(), sessions, bus)
}

/// Receive bus events until one matches.
pub async fn next_matching(
    rx: &mut broadcast::Receiver<AppEvent>,
    what: &str,
    pred: impl Fn(&AppEvent) -> bool,
) -> AppEvent {
    let found = tokio::time::timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await;
    match found {
        Ok(Some(event)) => event,
        _ => panic!("timed out waiting for event: {what}"),
    }
}

/// Wait for the hub's connection state to become `connected`.
pub async fn wait_connected(hub: &RealtimeHub, connected: bool) {
    let mut rx = hub.state_receiver();
    let done = tokio::time::timeout(WAIT, rx.wait_for(|s| s.is_connected() == connected)).await;
    assert!(done.is_ok(), "timed out waiting for connected={connected}");
}
