//! Ticket assignments for specialists.

use hd_core::constants::query_keys;
use hd_core::error::HdResult;
use hd_models::{topics, AssignmentEvent};
use hd_socket::TopicRouter;

use super::AdapterCore;
use crate::event_bus::{AppEvent, EventBus, ToastLevel};
use crate::service::{Service, ServiceState};

/// Listens for assignments made to the user and rejections of the
/// assignments they handed out.
pub struct AssignmentAdapter {
    core: AdapterCore,
    user_id: i64,
}

impl AssignmentAdapter {
    pub fn new(router: TopicRouter, bus: EventBus, user_id: i64) -> Self {
        Self {
            core: AdapterCore::new(router, bus),
            user_id,
        }
    }

    pub fn topics(&self) -> Vec<String> {
        self.core.topics()
    }
}

pub fn assigned_effects(event: &AssignmentEvent) -> Vec<AppEvent> {
    vec![
        AppEvent::toast(
            ToastLevel::Info,
            "New assignment",
            Some(format!(
                "You have been assigned ticket #{}: {}",
                event.ticket_id, event.ticket_title
            )),
        ),
        AppEvent::invalidate(query_keys::TICKETS),
        AppEvent::invalidate(query_keys::TICKETS_COUNT),
    ]
}

pub fn rejected_effects(event: &AssignmentEvent) -> Vec<AppEvent> {
    vec![
        AppEvent::toast(
            ToastLevel::Error,
            "Assignment rejected",
            Some(format!(
                "{} rejected the assignment of ticket #{}: {}",
                event.rejected_by(),
                event.ticket_id,
                event.ticket_title
            )),
        ),
        AppEvent::invalidate(query_keys::ticket(event.ticket_id)),
        AppEvent::invalidate(query_keys::TICKETS),
        AppEvent::invalidate(query_keys::TICKETS_COUNT),
    ]
}

impl Service for AssignmentAdapter {
    fn name(&self) -> &str {
        "assignments"
    }

    fn state(&self) -> ServiceState {
        self.core.state()
    }

    fn init(&mut self) -> HdResult<()> {
        if self.core.is_running() {
            return Ok(());
        }

        let routes: [(String, fn(&AssignmentEvent) -> Vec<AppEvent>); 2] = [
            (topics::user_assignments(self.user_id), assigned_effects),
            (topics::user_assignments_rejected(self.user_id), rejected_effects),
        ];
        for (topic, effects) in routes {
            let bus = self.core.bus.clone();
            let handle = self
                .core
                .router
                .subscribe_as(&topic, move |event: AssignmentEvent| {
                    for effect in effects(&event) {
                        bus.emit(effect);
                    }
                    Ok(())
                });
            self.core.hold(handle);
        }

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

    fn event(json: serde_json::Value) -> AssignmentEvent {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_new_assignment_effects() {
        let effects = assigned_effects(&event(serde_json::json!({
            "ticketId": 12,
            "ticketTitle": "Printer on fire",
        })));
        match &effects[0] {
            AppEvent::Toast { level, title, body } => {
                assert_eq!(*level, ToastLevel::Info);
                assert_eq!(title, "New assignment");
                assert_eq!(
                    body.as_deref(),
                    Some("You have been assigned ticket #12: Printer on fire")
                );
            }
            other => panic!("unexpected effect: {other:?}"),
        }
        let keys: Vec<_> = effects[1..]
            .iter()
            .map(|e| match e {
                AppEvent::InvalidateQuery { key } => key.as_str(),
                _ => "",
            })
            .collect();
        assert_eq!(keys, vec!["tickets", "ticketsCount"]);
    }

    #[test]
    fn test_rejection_names_rejecting_party() {
        let by_user = rejected_effects(&event(serde_json::json!({
            "ticketId": 3,
            "ticketTitle": "VPN",
            "toUser": {"id": 8, "username": "asmith", "fio": "Anna Smith"},
        })));
        match &by_user[0] {
            AppEvent::Toast { level, body, .. } => {
                assert_eq!(*level, ToastLevel::Error);
                assert_eq!(
                    body.as_deref(),
                    Some("Anna Smith rejected the assignment of ticket #3: VPN")
                );
            }
            other => panic!("unexpected effect: {other:?}"),
        }
        assert_eq!(by_user.len(), 4);
        match &by_user[1] {
            AppEvent::InvalidateQuery { key } => assert_eq!(key, "ticket/3"),
            other => panic!("unexpected effect: {other:?}"),
        }

        let by_line = rejected_effects(&event(serde_json::json!({
            "ticketId": 3,
            "ticketTitle": "VPN",
            "toLine": {"id": 2, "name": "Second line"},
        })));
        match &by_line[0] {
            AppEvent::Toast { body, .. } => {
                assert!(body.as_deref().unwrap_or_default().starts_with("Second line rejected"));
            }
            other => panic!("unexpected effect: {other:?}"),
        }
    }

    #[test]
    fn test_adapter_subscribes_both_topics() {
        let router = TopicRouter::new();
        let mut adapter = AssignmentAdapter::new(router.clone(), EventBus::new(8), 4);
        adapter.init().unwrap();
        adapter.init().unwrap();
        assert_eq!(router.handler_count("/topic/user/4/assignments"), 1);
        assert_eq!(router.handler_count("/topic/user/4/assignments/rejected"), 1);
        adapter.shutdown().unwrap();
        assert!(router.active_topics().is_empty());
    }
}
