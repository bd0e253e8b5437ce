//! Drop detection and the fixed-delay reconnect loop.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use common::*;
use hd_services::{AppEvent, EventBus};
use hd_socket::{ConnectionCallbacks, ConnectionState};

const TOPIC: &str = "/topic/line/3/status";

fn counting_callbacks() -> (ConnectionCallbacks, Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let ups = Arc::new(AtomicUsize::new(0));
    let downs = Arc::new(AtomicUsize::new(0));
    let (u, d) = (Arc::clone(&ups), Arc::clone(&downs));
    let callbacks = ConnectionCallbacks::new()
        .on_connect(move || {
            u.fetch_add(1, Ordering::SeqCst);
        })
        .on_disconnect(move || {
            d.fetch_add(1, Ordering::SeqCst);
        });
    (callbacks, ups, downs)
}

#[tokio::test(start_paused = true)]
async fn test_drop_reconnects_after_fixed_delay_and_rewires() {
    let broker = FakeBroker::new();
    let me = user(7, true);
    let sessions = memory_store(ScriptedRefresher::new(vec![]));
    sessions.set_session(long_session(&me, "a"));
    let bus = EventBus::new(64);
    let mut events = bus.subscribe();
    let hub = hub(&broker, sessions, bus);
    let _sub = hub.subscribe(TOPIC, |_| Ok(()));

    let (callbacks, ups, downs) = counting_callbacks();
    hub.connect(7, callbacks).await.unwrap();
    broker.wait_subscribed(TOPIC).await;
    wait_connected(&hub, true).await;
    assert_eq!(ups.load(Ordering::SeqCst), 1);

    let dropped_at = Instant::now();
    broker.drop_connections();

    let mut states = hub.state_receiver();
    states
        .wait_for(|s| *s == ConnectionState::Connecting)
        .await
        .unwrap();
    next_matching(&mut events, "drop reported", |e| {
        matches!(e, AppEvent::ConnectionStateChanged { connected: false, .. })
    })
    .await;
    assert_eq!(downs.load(Ordering::SeqCst), 1);

    broker
        .wait_until("second subscribe", |b| b.subscribe_count(TOPIC) == 2)
        .await;
    assert!(dropped_at.elapsed() >= Duration::from_secs(5));
    assert_eq!(broker.opened(), 2);
    wait_connected(&hub, true).await;
    assert_eq!(ups.load(Ordering::SeqCst), 2);
    assert_eq!(broker.live_topics(), vec![TOPIC.to_string()]);

    hub.shutdown().await;
    assert_eq!(downs.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_retries_indefinitely_until_disconnect() {
    let broker = FakeBroker::new();
    let me = user(7, false);
    let sessions = memory_store(ScriptedRefresher::new(vec![]));
    sessions.set_session(long_session(&me, "a"));
    let hub = hub(&broker, sessions, EventBus::new(64));

    hub.connect(7, ConnectionCallbacks::new()).await.unwrap();
    wait_connected(&hub, true).await;

    broker.refuse_connections(true);
    broker.drop_connections();

    let started = Instant::now();
    broker
        .wait_until("ten refused attempts", |b| b.attempts() >= 11)
        .await;
    assert!(started.elapsed() >= Duration::from_secs(50));
    assert_eq!(hub.state(), ConnectionState::Connecting);

    broker.refuse_connections(false);
    wait_connected(&hub, true).await;
    assert_eq!(broker.opened(), 2);

    hub.disconnect().await;
    assert_eq!(hub.state(), ConnectionState::Disconnected);
    let attempts = broker.attempts();
    broker.drop_connections();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(broker.attempts(), attempts);
    assert_eq!(hub.state(), ConnectionState::Disconnected);

    hub.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_pending_reconnect() {
    let broker = FakeBroker::new();
    let me = user(7, false);
    let sessions = memory_store(ScriptedRefresher::new(vec![]));
    sessions.set_session(long_session(&me, "a"));
    let hub = hub(&broker, sessions, EventBus::new(64));

    hub.connect(7, ConnectionCallbacks::new()).await.unwrap();
    wait_connected(&hub, true).await;

    broker.drop_connections();
    let mut states = hub.state_receiver();
    states
        .wait_for(|s| *s == ConnectionState::Connecting)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    hub.disconnect().await;
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(broker.attempts(), 1);
    assert_eq!(hub.state(), ConnectionState::Disconnected);
    hub.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_publishes_are_not_replayed_after_reconnect() {
    let broker = FakeBroker::new();
    let me = user(7, false);
    let sessions = memory_store(ScriptedRefresher::new(vec![]));
    sessions.set_session(long_session(&me, "a"));
    let hub = hub(&broker, sessions, EventBus::new(64));

    hub.connect(7, ConnectionCallbacks::new()).await.unwrap();
    wait_connected(&hub, true).await;

    broker.drop_connections();
    wait_connected(&hub, false).await;
    assert!(hub
        .publish("/app/ticket/1/typing", &serde_json::json!({"typing": true}))
        .is_err());

    wait_connected(&hub, true).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(broker.sent().is_empty());

    hub.shutdown().await;
}
