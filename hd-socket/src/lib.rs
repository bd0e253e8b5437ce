//! Helpdesk Socket - STOMP over WebSocket client for realtime events.
//!
//! This crate provides:
//! - A STOMP 1.2 frame codec
//! - A transport abstraction with a tokio-tungstenite implementation
//! - The topic router with ref-counted, per-handler subscriptions
//! - The connection manager: authenticated handshake, heartbeats,
//!   topic re-wiring and fixed-delay reconnection that never gives up

pub mod events;
pub mod frame;
pub mod manager;
pub mod router;
pub mod transport;

// Re-export key types
pub use events::{ConnectionEvent, ConnectionState};
pub use frame::{Command, Frame, FrameDecoder};
pub use manager::{ConnectionCallbacks, ConnectionManager, HeartbeatConfig, ReconnectConfig};
pub use router::{Handler, SubscriptionHandle, SubscriptionId, TopicRouter};
pub use transport::{Connector, TransportLink, WsConnector};

/// Lock a std mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
