//! STOMP connection manager.
//!
//! Owns the single realtime connection: opens the transport, authenticates
//! the STOMP handshake with whatever credential is current at that moment,
//! wires the router's active topics, exchanges heartbeats, and reconnects
//! after a delay for as long as the connection is wanted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use hd_auth::{Credential, CredentialSource};
use hd_core::config::RealtimeConfig;
use hd_core::error::{HdError, HdResult};

use crate::events::{ConnectionEvent, ConnectionState};
use crate::frame::{Command, Frame, FrameDecoder, Inbound, HEARTBEAT};
use crate::lock;
use crate::router::TopicRouter;
use crate::transport::{Connector, TransportLink, WsConnector};

const OUTBOX_CAPACITY: usize = 64;
const EVENT_CAPACITY: usize = 64;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Configuration for reconnection delays.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first retry after a failure or drop.
    pub base_delay: Duration,
    /// Cap for exponential growth. Equal to `base_delay` gives a fixed delay.
    pub max_delay: Duration,
    /// Jitter factor (0.0 to 1.0) applied to each delay.
    pub jitter_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(hd_core::constants::RECONNECT_DELAY_SECS),
            max_delay: Duration::from_secs(hd_core::constants::RECONNECT_DELAY_SECS),
            jitter_factor: 0.0,
        }
    }
}

impl From<&RealtimeConfig> for ReconnectConfig {
    fn from(config: &RealtimeConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.reconnect_delay_ms),
            max_delay: Duration::from_millis(config.max_reconnect_delay_ms),
            jitter_factor: config.reconnect_jitter,
        }
    }
}

impl ReconnectConfig {
    /// Delay before retry number `attempt` (0-based). There is no attempt cap.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_secs_f64();
        let max = self.max_delay.as_secs_f64().max(base);

        let exponential = (base * 2.0_f64.powi(attempt.min(30) as i32)).min(max);

        let jitter_range = exponential * self.jitter_factor.clamp(0.0, 1.0);
        let jitter = if jitter_range > 0.0 {
            (rand::random::<f64>() * 2.0 - 1.0) * jitter_range
        } else {
            0.0
        };
        Duration::from_secs_f64((exponential + jitter).max(0.0))
    }
}

/// Heartbeat intervals the client offers in `CONNECT`.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatConfig {
    pub outgoing: Duration,
    pub incoming: Duration,
}

impl From<&RealtimeConfig> for HeartbeatConfig {
    fn from(config: &RealtimeConfig) -> Self {
        Self {
            outgoing: Duration::from_millis(config.heartbeat_outgoing_ms),
            incoming: Duration::from_millis(config.heartbeat_incoming_ms),
        }
    }
}

impl HeartbeatConfig {
    fn offer(&self) -> (u64, u64) {
        (
            self.outgoing.as_millis() as u64,
            self.incoming.as_millis() as u64,
        )
    }

    /// Combine with the broker's `heart-beat` header. Returns how often we
    /// must send and how often we expect to hear from the broker; `None`
    /// disables that direction.
    pub fn negotiate(&self, server: (u64, u64)) -> (Option<Duration>, Option<Duration>) {
        let (cx, cy) = self.offer();
        let (sx, sy) = server;
        let send_every = (cx != 0 && sy != 0).then(|| Duration::from_millis(cx.max(sy)));
        let expect_every = (cy != 0 && sx != 0).then(|| Duration::from_millis(cy.max(sx)));
        (send_every, expect_every)
    }
}

fn parse_heartbeat(header: Option<&str>) -> (u64, u64) {
    header
        .and_then(|h| h.split_once(','))
        .and_then(|(x, y)| Some((x.trim().parse().ok()?, y.trim().parse().ok()?)))
        .unwrap_or((0, 0))
}

type Callback = Arc<dyn Fn() + Send + Sync>;

/// Hooks fired on every entry into and exit from `Connected`.
#[derive(Clone, Default)]
pub struct ConnectionCallbacks {
    on_connect: Option<Callback>,
    on_disconnect: Option<Callback>,
}

impl ConnectionCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_connect(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(f));
        self
    }

    pub fn on_disconnect(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Arc::new(f));
        self
    }

    fn fire_connect(&self) {
        if let Some(f) = &self.on_connect {
            f();
        }
    }

    fn fire_disconnect(&self) {
        if let Some(f) = &self.on_disconnect {
            f();
        }
    }
}

impl std::fmt::Debug for ConnectionCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionCallbacks")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .finish()
    }
}

/// An authenticated STOMP session on top of a transport link.
struct Stomp {
    link: TransportLink,
    decoder: FrameDecoder,
    send_every: Option<Duration>,
    expect_every: Option<Duration>,
}

enum SessionExit {
    Shutdown,
    Dropped(String),
}

/// Transport-level subscriptions of one connection.
#[derive(Default)]
struct Wiring {
    by_topic: HashMap<String, String>,
    next_id: u64,
}

impl Wiring {
    /// Bring the wire in line with the router's active topics.
    async fn reconcile(&mut self, router: &TopicRouter, link: &TransportLink) -> HdResult<()> {
        let active = router.active_topics();

        let released: Vec<String> = self
            .by_topic
            .keys()
            .filter(|t| !active.contains(*t))
            .cloned()
            .collect();
        for topic in released {
            if let Some(id) = self.by_topic.remove(&topic) {
                send_frame(link, &Frame::unsubscribe(&id)).await?;
                debug!("unsubscribed {topic} ({id})");
            }
        }

        for topic in active {
            if self.by_topic.contains_key(&topic) {
                continue;
            }
            let id = format!("sub-{}", self.next_id);
            self.next_id += 1;
            send_frame(link, &Frame::subscribe(&id, &topic)).await?;
            debug!("subscribed {topic} ({id})");
            self.by_topic.insert(topic, id);
        }
        Ok(())
    }
}

async fn send_frame(link: &TransportLink, frame: &Frame) -> HdResult<()> {
    link.outbound
        .send(frame.encode())
        .await
        .map_err(|_| HdError::SocketDisconnected)
}

/// Resolves once shutdown is requested or the manager is gone.
async fn wait_shutdown(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(iv) => {
            iv.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn host_header(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "localhost".to_string())
}

struct Shared {
    url: String,
    connector: Arc<dyn Connector>,
    router: TopicRouter,
    heartbeat: HeartbeatConfig,
    reconnect: ReconnectConfig,
    connect_timeout: Duration,
    max_frame_bytes: usize,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<ConnectionEvent>,
    outbox: Mutex<Option<mpsc::Sender<Frame>>>,
}

impl Shared {
    fn set_state(&self, new_state: ConnectionState) {
        self.state.send_if_modified(|state| {
            if *state == new_state {
                return false;
            }
            info!("realtime state: {} -> {}", *state, new_state);
            *state = new_state;
            true
        });
    }

    fn emit(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
    }

    async fn handshake(&self, credential: &Credential) -> HdResult<Stomp> {
        let mut link = self.connector.open(&self.url).await?;
        let connect = Frame::connect(
            &host_header(&self.url),
            &credential.bearer(),
            self.heartbeat.offer(),
        );
        send_frame(&link, &connect).await?;

        let mut decoder = FrameDecoder::new(self.max_frame_bytes);
        loop {
            let Some(text) = link.inbound.recv().await else {
                return Err(HdError::SocketDisconnected);
            };
            for item in decoder.push(&text)? {
                let Inbound::Frame(frame) = item else {
                    continue;
                };
                return match frame.command {
                    Command::Connected => {
                        let (send_every, expect_every) =
                            self.heartbeat.negotiate(parse_heartbeat(frame.get("heart-beat")));
                        debug!(
                            "stomp session up (version {}, heartbeat out {:?} in {:?})",
                            frame.get("version").unwrap_or("?"),
                            send_every,
                            expect_every
                        );
                        Ok(Stomp {
                            link,
                            decoder,
                            send_every,
                            expect_every,
                        })
                    }
                    Command::Error => Err(HdError::HandshakeRejected(
                        frame.get("message").unwrap_or(frame.body.as_str()).to_string(),
                    )),
                    other => Err(HdError::Frame(format!("expected CONNECTED, got {other}"))),
                };
            }
        }
    }

    async fn run_session(
        &self,
        mut stomp: Stomp,
        callbacks: &ConnectionCallbacks,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionExit {
        let mut wiring = Wiring::default();
        if let Err(e) = wiring.reconcile(&self.router, &stomp.link).await {
            return SessionExit::Dropped(e.to_string());
        }

        let (out_tx, mut out_rx) = mpsc::channel(OUTBOX_CAPACITY);
        *lock(&self.outbox) = Some(out_tx);
        self.set_state(ConnectionState::Connected);
        self.emit(ConnectionEvent::Connected);
        callbacks.fire_connect();

        let exit = self
            .pump(&mut stomp, &mut wiring, &mut out_rx, shutdown)
            .await;

        // Frames queued for this connection are never replayed.
        *lock(&self.outbox) = None;
        match &exit {
            SessionExit::Shutdown => {
                // Publishes already accepted go out ahead of DISCONNECT.
                while let Ok(frame) = out_rx.try_recv() {
                    let _ = stomp.link.outbound.try_send(frame.encode());
                }
                let _ = stomp.link.outbound.try_send(Frame::disconnect().encode());
                self.set_state(ConnectionState::Disconnected);
            }
            SessionExit::Dropped(reason) => {
                warn!("realtime connection lost: {reason}");
                self.set_state(ConnectionState::Connecting);
                self.emit(ConnectionEvent::Dropped {
                    reason: reason.clone(),
                });
            }
        }
        callbacks.fire_disconnect();
        exit
    }

    async fn pump(
        &self,
        stomp: &mut Stomp,
        wiring: &mut Wiring,
        out_rx: &mut mpsc::Receiver<Frame>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionExit {
        let mut heartbeat = stomp.send_every.map(|every| {
            let mut iv = tokio::time::interval_at(Instant::now() + every, every);
            iv.set_missed_tick_behavior(MissedTickBehavior::Delay);
            iv
        });
        let mut last_seen = Instant::now();

        loop {
            let silence_deadline = stomp.expect_every.map(|every| last_seen + every * 2);
            tokio::select! {
                _ = wait_shutdown(shutdown) => return SessionExit::Shutdown,
                _ = self.router.changed() => {
                    if let Err(e) = wiring.reconcile(&self.router, &stomp.link).await {
                        return SessionExit::Dropped(e.to_string());
                    }
                }
                _ = tick(&mut heartbeat) => {
                    if stomp.link.outbound.send(HEARTBEAT.to_string()).await.is_err() {
                        return SessionExit::Dropped("transport closed".into());
                    }
                }
                _ = sleep_until(silence_deadline) => {
                    return SessionExit::Dropped("heartbeat timeout".into());
                }
                msg = stomp.link.inbound.recv() => {
                    let Some(text) = msg else {
                        return SessionExit::Dropped("transport closed by peer".into());
                    };
                    last_seen = Instant::now();
                    let items = match stomp.decoder.push(&text) {
                        Ok(items) => items,
                        Err(e) => return SessionExit::Dropped(e.to_string()),
                    };
                    for item in items {
                        if let Inbound::Frame(frame) = item {
                            if let Some(reason) = self.on_frame(frame) {
                                return SessionExit::Dropped(reason);
                            }
                        }
                    }
                }
                Some(frame) = out_rx.recv() => {
                    debug!("-> {} {}", frame.command, frame.get("destination").unwrap_or(""));
                    if send_frame(&stomp.link, &frame).await.is_err() {
                        return SessionExit::Dropped("transport closed".into());
                    }
                }
            }
        }
    }

    /// Handle one inbound frame; returns a reason when the session must end.
    fn on_frame(&self, frame: Frame) -> Option<String> {
        match frame.command {
            Command::Message => match frame.get("destination") {
                Some(topic) => {
                    debug!("<- MESSAGE {topic}");
                    self.router.dispatch(topic, &frame.body);
                }
                None => warn!("MESSAGE without destination dropped"),
            },
            Command::Receipt => debug!("<- RECEIPT {}", frame.get("receipt-id").unwrap_or("")),
            Command::Error => {
                let message = frame.get("message").unwrap_or(frame.body.as_str());
                return Some(format!("broker error: {message}"));
            }
            other => debug!("ignoring {other} frame"),
        }
        None
    }
}

async fn run(
    shared: Arc<Shared>,
    credentials: Arc<dyn CredentialSource>,
    callbacks: ConnectionCallbacks,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut attempt: u32 = 0;
    loop {
        shared.set_state(ConnectionState::Connecting);

        match credentials.current_credential() {
            None => debug!("no credential available, skipping connection attempt"),
            Some(credential) => {
                let outcome = tokio::select! {
                    r = timeout(shared.connect_timeout, shared.handshake(&credential)) => {
                        r.unwrap_or_else(|_| Err(HdError::Timeout("stomp handshake".into())))
                    }
                    _ = wait_shutdown(&mut shutdown) => break,
                };
                match outcome {
                    Ok(stomp) => {
                        attempt = 0;
                        info!("realtime connection established");
                        let exit = shared.run_session(stomp, &callbacks, &mut shutdown).await;
                        if let SessionExit::Shutdown = exit {
                            break;
                        }
                    }
                    Err(HdError::HandshakeRejected(message)) | Err(HdError::Unauthorized(message)) => {
                        warn!("realtime handshake rejected: {message}");
                        shared.emit(ConnectionEvent::HandshakeRejected { message });
                    }
                    Err(e) => warn!("realtime connection attempt failed: {e}"),
                }
            }
        }

        let delay = shared.reconnect.delay(attempt);
        attempt = attempt.saturating_add(1);
        info!(
            "reconnecting in {:.1}s (attempt {attempt})",
            delay.as_secs_f64()
        );
        shared.emit(ConnectionEvent::ReconnectScheduled { attempt, delay });
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = wait_shutdown(&mut shutdown) => break,
        }
    }
    shared.set_state(ConnectionState::Disconnected);
}

struct RunHandle {
    task: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

/// The realtime connection.
///
/// At most one connection loop runs per manager; `connect` while one is
/// live is a no-op. The credential is read from the [`CredentialSource`] at
/// every handshake, so a refreshed session is picked up on the next
/// reconnect without restarting anything.
pub struct ConnectionManager {
    shared: Arc<Shared>,
    run: tokio::sync::Mutex<Option<RunHandle>>,
}

impl ConnectionManager {
    pub fn new(
        url: impl Into<String>,
        connector: Arc<dyn Connector>,
        router: TopicRouter,
        config: &RealtimeConfig,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                url: url.into(),
                connector,
                router,
                heartbeat: HeartbeatConfig::from(config),
                reconnect: ReconnectConfig::from(config),
                connect_timeout: Duration::from_millis(config.connect_timeout_ms),
                max_frame_bytes: config.max_frame_bytes,
                state,
                events,
                outbox: Mutex::new(None),
            }),
            run: tokio::sync::Mutex::new(None),
        }
    }

    /// Manager over a real WebSocket transport.
    pub fn websocket(url: impl Into<String>, router: TopicRouter, config: &RealtimeConfig) -> Self {
        let connector = Arc::new(WsConnector::new(config.max_frame_bytes));
        Self::new(url, connector, router, config)
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    pub fn router(&self) -> &TopicRouter {
        &self.shared.router
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Subscribe to connection state changes.
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.events.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Start the connection loop.
    pub async fn connect(
        &self,
        credentials: Arc<dyn CredentialSource>,
        callbacks: ConnectionCallbacks,
    ) {
        let mut slot = self.run.lock().await;
        if let Some(existing) = slot.as_ref() {
            if !existing.task.is_finished() {
                debug!("connection loop already running, ignoring connect");
                return;
            }
        }

        info!("realtime connecting to {}", self.shared.url);
        self.shared.set_state(ConnectionState::Connecting);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run(
            Arc::clone(&self.shared),
            credentials,
            callbacks,
            shutdown_rx,
        ));
        *slot = Some(RunHandle { task, shutdown });
    }

    /// Stop the connection loop and cancel any pending reconnect.
    /// Safe to call repeatedly.
    pub async fn disconnect(&self) {
        let run = self.run.lock().await.take();
        let Some(mut run) = run else {
            self.shared.set_state(ConnectionState::Disconnected);
            return;
        };

        let _ = run.shutdown.send(true);
        if timeout(SHUTDOWN_GRACE, &mut run.task).await.is_err() {
            warn!("connection loop did not stop in time, aborting");
            run.task.abort();
        }
        self.shared.set_state(ConnectionState::Disconnected);
        self.shared.emit(ConnectionEvent::Closed);
        info!("realtime connection closed");
    }

    /// Send a JSON payload to an application destination.
    ///
    /// Only allowed while connected; nothing is buffered across reconnects.
    pub fn publish<T: Serialize + ?Sized>(&self, destination: &str, payload: &T) -> HdResult<()> {
        let body = serde_json::to_string(payload)?;
        let outbox = lock(&self.shared.outbox);
        let Some(tx) = outbox.as_ref() else {
            return Err(HdError::SocketDisconnected);
        };
        tx.try_send(Frame::send(destination, body))
            .map_err(|e| match e {
                TrySendError::Full(_) => HdError::Socket("outbound queue is full".into()),
                TrySendError::Closed(_) => HdError::SocketDisconnected,
            })
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(run) = self.run.get_mut().take() {
            run.task.abort();
        }
    }
}
