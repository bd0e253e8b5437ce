//! Chat pane of one ticket: messages, typing indicators, and the two
//! client-to-server destinations.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use hd_core::constants::TYPING_THROTTLE_MS;
use hd_core::error::HdResult;
use hd_models::{topics, ChatMessage, SendMessageRequest, TypingIndicator, TypingSignal};
use hd_socket::TopicRouter;

use super::{AdapterCore, Publisher};
use crate::event_bus::{AppEvent, EventBus};
use crate::lock;
use crate::service::{Service, ServiceState};

pub struct TicketChatAdapter {
    core: AdapterCore,
    publisher: Arc<dyn Publisher>,
    ticket_id: i64,
    user_id: i64,
    seen: Arc<Mutex<HashSet<i64>>>,
    last_typing_sent: Mutex<Option<Instant>>,
}

impl TicketChatAdapter {
    pub fn new(
        router: TopicRouter,
        bus: EventBus,
        publisher: Arc<dyn Publisher>,
        ticket_id: i64,
        user_id: i64,
    ) -> Self {
        Self {
            core: AdapterCore::new(router, bus),
            publisher,
            ticket_id,
            user_id,
            seen: Arc::new(Mutex::new(HashSet::new())),
            last_typing_sent: Mutex::new(None),
        }
    }

    pub fn ticket_id(&self) -> i64 {
        self.ticket_id
    }

    pub fn topics(&self) -> Vec<String> {
        self.core.topics()
    }

    /// Mark messages already loaded by other means so their echo is ignored.
    pub fn mark_seen(&self, ids: impl IntoIterator<Item = i64>) {
        lock(&self.seen).extend(ids);
    }

    /// Post a chat message. Fails with `SocketDisconnected` while offline.
    pub fn send_message(&self, content: &str, internal: bool) -> HdResult<()> {
        let payload = serde_json::to_value(SendMessageRequest {
            content: content.to_string(),
            internal,
        })?;
        self.publisher
            .publish_json(&topics::app::send_message(self.ticket_id), &payload)
    }

    /// Signal typing state. "Started" signals are throttled; "stopped" is
    /// always sent. Returns whether a frame went out.
    pub fn send_typing(&self, typing: bool) -> HdResult<bool> {
        let now = Instant::now();
        let mut last = lock(&self.last_typing_sent);
        let throttle = Duration::from_millis(TYPING_THROTTLE_MS);
        if typing && last.is_some_and(|at| now.duration_since(at) <= throttle) {
            return Ok(false);
        }
        let payload = serde_json::to_value(TypingSignal { typing })?;
        self.publisher
            .publish_json(&topics::app::typing(self.ticket_id), &payload)?;
        *last = Some(now);
        Ok(true)
    }
}

impl Service for TicketChatAdapter {
    fn name(&self) -> &str {
        "chat"
    }

    fn state(&self) -> ServiceState {
        self.core.state()
    }

    fn init(&mut self) -> HdResult<()> {
        if self.core.is_running() {
            return Ok(());
        }
        let ticket_id = self.ticket_id;

        let bus = self.core.bus.clone();
        let seen = Arc::clone(&self.seen);
        let handle = self.core.router.subscribe_as(
            &topics::ticket_messages(ticket_id),
            move |message: ChatMessage| {
                if !lock(&seen).insert(message.id) {
                    debug!("duplicate chat message {} ignored", message.id);
                    return Ok(());
                }
                bus.emit(AppEvent::ChatMessageReceived { ticket_id, message });
                Ok(())
            },
        );
        self.core.hold(handle);

        let bus = self.core.bus.clone();
        let own = self.user_id;
        let handle = self.core.router.subscribe_as(
            &topics::ticket_typing(ticket_id),
            move |indicator: TypingIndicator| {
                if indicator.user_id == own {
                    return Ok(());
                }
                let name = indicator
                    .fio
                    .filter(|f| !f.is_empty())
                    .unwrap_or(indicator.username);
                bus.emit(AppEvent::TypingChanged {
                    ticket_id,
                    user_id: indicator.user_id,
                    name,
                    typing: indicator.typing,
                });
                Ok(())
            },
        );
        self.core.hold(handle);

        self.core.mark_running();
        Ok(())
    }

    fn shutdown(&mut self) -> HdResult<()> {
        self.core.release();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hd_core::error::HdError;

    #[derive(Default)]
    struct RecordingPublisher {
        sent: Mutex<Vec<(String, serde_json::Value)>>,
        offline: bool,
    }

    impl Publisher for RecordingPublisher {
        fn publish_json(&self, destination: &str, payload: &serde_json::Value) -> HdResult<()> {
            if self.offline {
                return Err(HdError::SocketDisconnected);
            }
            self.sent
                .lock()
                .unwrap()
                .push((destination.to_string(), payload.clone()));
            Ok(())
        }
    }

    fn adapter(publisher: Arc<RecordingPublisher>) -> (TicketChatAdapter, TopicRouter, EventBus) {
        let router = TopicRouter::new();
        let bus = EventBus::new(16);
        let chat = TicketChatAdapter::new(router.clone(), bus.clone(), publisher, 9, 1);
        (chat, router, bus)
    }

    #[tokio::test]
    async fn test_messages_are_deduplicated() {
        let (mut chat, router, bus) = adapter(Arc::default());
        let mut rx = bus.subscribe();
        chat.init().unwrap();
        chat.mark_seen([100]);

        let old = r#"{"id":100,"ticketId":9,"content":"old"}"#;
        let fresh = r#"{"id":101,"ticketId":9,"content":"hello","senderFio":"Ann"}"#;
        router.dispatch("/topic/ticket/9/messages", old);
        router.dispatch("/topic/ticket/9/messages", fresh);
        router.dispatch("/topic/ticket/9/messages", fresh);

        match rx.recv().await.unwrap() {
            AppEvent::ChatMessageReceived { ticket_id, message } => {
                assert_eq!(ticket_id, 9);
                assert_eq!(message.id, 101);
                assert_eq!(message.author_name(), "Ann");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_own_typing_ignored() {
        let (mut chat, router, bus) = adapter(Arc::default());
        let mut rx = bus.subscribe();
        chat.init().unwrap();

        router.dispatch(
            "/topic/ticket/9/typing",
            r#"{"ticketId":9,"userId":1,"username":"me","typing":true}"#,
        );
        router.dispatch(
            "/topic/ticket/9/typing",
            r#"{"ticketId":9,"userId":2,"username":"ann","typing":true}"#,
        );

        match rx.recv().await.unwrap() {
            AppEvent::TypingChanged { user_id, name, typing, .. } => {
                assert_eq!(user_id, 2);
                assert_eq!(name, "ann");
                assert!(typing);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_typing_start_throttled_stop_always_sent() {
        let publisher = Arc::new(RecordingPublisher::default());
        let (chat, _router, _bus) = adapter(Arc::clone(&publisher));

        assert!(chat.send_typing(true).unwrap());
        assert!(!chat.send_typing(true).unwrap());
        assert!(chat.send_typing(false).unwrap());

        tokio::time::advance(Duration::from_millis(1_100)).await;
        assert!(chat.send_typing(true).unwrap());

        let sent = publisher.sent.lock().unwrap();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].0, "/app/ticket/9/typing");
        assert_eq!(sent[1].1, serde_json::json!({"typing": false}));
    }

    #[test]
    fn test_send_message_payload() {
        let publisher = Arc::new(RecordingPublisher::default());
        let (chat, _router, _bus) = adapter(Arc::clone(&publisher));
        chat.send_message("on my way", true).unwrap();

        let sent = publisher.sent.lock().unwrap();
        assert_eq!(sent[0].0, "/app/ticket/9/send");
        assert_eq!(
            sent[0].1,
            serde_json::json!({"content": "on my way", "internal": true})
        );
    }

    #[test]
    fn test_send_while_offline_fails() {
        let publisher = Arc::new(RecordingPublisher {
            offline: true,
            ..Default::default()
        });
        let (chat, _router, _bus) = adapter(publisher);
        assert!(matches!(
            chat.send_message("hi", false),
            Err(HdError::SocketDisconnected)
        ));
        assert!(matches!(chat.send_typing(true), Err(HdError::SocketDisconnected)));
    }
}
