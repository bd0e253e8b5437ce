//! Connection state and lifecycle events.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lifecycle of the realtime connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// Not connected and not trying to connect.
    Disconnected,
    /// Opening the transport, handshaking, or waiting to retry.
    Connecting,
    /// Handshake complete; frames are flowing.
    Connected,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        *self == Self::Connected
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Notable things that happen on the connection, broadcast to observers.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Handshake succeeded.
    Connected,
    /// A live connection went away.
    Dropped { reason: String },
    /// The broker refused the credential. The owner should refresh the
    /// session before the next attempt.
    HandshakeRejected { message: String },
    /// The next attempt is due after `delay`.
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// `disconnect()` completed.
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Disconnected.to_string(), "disconnected");
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
    }

    #[test]
    fn test_connection_state_serde() {
        let json = serde_json::to_string(&ConnectionState::Connected).unwrap();
        assert_eq!(json, "\"CONNECTED\"");
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
    }
}
