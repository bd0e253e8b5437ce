//! Typed event bus carrying UI effects.
//!
//! Adapters turn raw realtime payloads into `AppEvent`s; the surface that
//! renders them (toasts, query caches, redirects) subscribes here without
//! knowing where the events came from.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use hd_auth::ClearReason;
use hd_models::{ActivityStatus, ChatMessage, Ticket};

/// Severity of a toast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl std::fmt::Display for ToastLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Success => write!(f, "success"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// UI-facing effects produced from realtime traffic.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AppEvent {
    /// Show a transient message.
    Toast {
        level: ToastLevel,
        title: String,
        body: Option<String>,
    },
    /// Cached data under this query key is stale.
    InvalidateQuery { key: String },
    /// The signed-in user's own activity status changed.
    StatusUpdated {
        user_id: i64,
        status: ActivityStatus,
    },
    /// A chat message arrived on a watched ticket.
    ChatMessageReceived { ticket_id: i64, message: ChatMessage },
    /// Someone else started or stopped typing on a watched ticket.
    TypingChanged {
        ticket_id: i64,
        user_id: i64,
        name: String,
        typing: bool,
    },
    TicketCreated { ticket: Ticket },
    TicketUpdated { ticket: Ticket },
    TicketDeleted { ticket_id: i64 },
    /// The ticket was handed to someone else and the viewer lost access.
    TicketAccessLost { ticket_id: i64, assignee: String },
    /// Realtime connectivity changed.
    ConnectionStateChanged { connected: bool, message: String },
    /// The session is gone; the user must sign in again.
    SessionEnded { reason: ClearReason },
}

impl AppEvent {
    pub fn toast(level: ToastLevel, title: impl Into<String>, body: Option<String>) -> Self {
        Self::Toast {
            level,
            title: title.into(),
            body,
        }
    }

    pub fn invalidate(key: impl Into<String>) -> Self {
        Self::InvalidateQuery { key: key.into() }
    }
}

/// Application-wide event bus backed by a tokio broadcast channel.
///
/// Every subscriber gets every event. Slow subscribers that fall behind
/// receive a `Lagged` error and miss events, which is acceptable for
/// UI-driven consumers.
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<AppEvent>>,
}

impl EventBus {
    /// Create a new EventBus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Subscribe to receive application events.
    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.sender.subscribe()
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: AppEvent) {
        let label = event_label(&event);
        match self.sender.send(event) {
            Ok(count) => {
                debug!("event_bus: emitted {label} to {count} subscriber(s)");
            }
            Err(_) => {
                debug!("event_bus: no subscribers for {label}");
            }
        }
    }

    /// Get the current number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Human-readable label for an event (for logging).
pub fn event_label(event: &AppEvent) -> &'static str {
    match event {
        AppEvent::Toast { .. } => "Toast",
        AppEvent::InvalidateQuery { .. } => "InvalidateQuery",
        AppEvent::StatusUpdated { .. } => "StatusUpdated",
        AppEvent::ChatMessageReceived { .. } => "ChatMessageReceived",
        AppEvent::TypingChanged { .. } => "TypingChanged",
        AppEvent::TicketCreated { .. } => "TicketCreated",
        AppEvent::TicketUpdated { .. } => "TicketUpdated",
        AppEvent::TicketDeleted { .. } => "TicketDeleted",
        AppEvent::TicketAccessLost { .. } => "TicketAccessLost",
        AppEvent::ConnectionStateChanged { .. } => "ConnectionStateChanged",
        AppEvent::SessionEnded { .. } => "SessionEnded",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_bus_emit_receive() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.emit(AppEvent::invalidate("tickets"));

        match rx.recv().await.unwrap() {
            AppEvent::InvalidateQuery { key } => assert_eq!(key, "tickets"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_event_bus_multiple_subscribers() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.emit(AppEvent::TicketDeleted { ticket_id: 42 });

        for rx in [&mut rx1, &mut rx2] {
            match rx.recv().await.unwrap() {
                AppEvent::TicketDeleted { ticket_id } => assert_eq!(ticket_id, 42),
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[test]
    fn test_event_bus_no_subscribers() {
        let bus = EventBus::new(16);
        bus.emit(AppEvent::SessionEnded {
            reason: ClearReason::Logout,
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_event_json_shape() {
        let event = AppEvent::toast(ToastLevel::Success, "New assignment", Some("#5".into()));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "toast");
        assert_eq!(json["level"], "success");
        assert_eq!(json["title"], "New assignment");

        let ended = serde_json::to_value(AppEvent::SessionEnded {
            reason: ClearReason::RefreshFailed,
        })
        .unwrap();
        assert_eq!(ended["reason"], "refresh_failed");
    }

    #[test]
    fn test_event_labels() {
        assert_eq!(event_label(&AppEvent::invalidate("stats")), "InvalidateQuery");
        assert_eq!(
            event_label(&AppEvent::ConnectionStateChanged {
                connected: true,
                message: String::new(),
            }),
            "ConnectionStateChanged"
        );
    }
}
