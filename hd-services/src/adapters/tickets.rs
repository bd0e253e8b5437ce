//! Ticket feed: new tickets, updates and deletions of watched tickets.
//!
//! The adapter remembers the last version of each watched ticket so an
//! update can be summarised against it. A local action on a ticket may
//! suppress the echo toasts for a short window.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use hd_core::constants::{query_keys, TICKET_TOAST_SUPPRESSION_MS};
use hd_core::error::HdResult;
use hd_models::{topics, Ticket, User};
use hd_socket::TopicRouter;

use super::AdapterCore;
use crate::event_bus::{AppEvent, EventBus, ToastLevel};
use crate::lock;
use crate::service::{Service, ServiceState};

const ADMIN_ROLE: &str = "ADMIN";

#[derive(Default)]
struct FeedState {
    known: Mutex<HashMap<i64, Ticket>>,
    suppressed_until: Mutex<HashMap<i64, Instant>>,
}

impl FeedState {
    fn is_suppressed(&self, ticket_id: i64) -> bool {
        let mut suppressed = lock(&self.suppressed_until);
        match suppressed.get(&ticket_id) {
            Some(until) if Instant::now() < *until => true,
            Some(_) => {
                suppressed.remove(&ticket_id);
                false
            }
            None => false,
        }
    }
}

pub struct TicketFeedAdapter {
    core: AdapterCore,
    viewer: User,
    watch_new: bool,
    ticket_ids: Vec<i64>,
    state: Arc<FeedState>,
}

impl TicketFeedAdapter {
    pub fn new(router: TopicRouter, bus: EventBus, viewer: User) -> Self {
        Self {
            core: AdapterCore::new(router, bus),
            viewer,
            watch_new: false,
            ticket_ids: Vec::new(),
            state: Arc::new(FeedState::default()),
        }
    }

    /// Also listen for newly created tickets.
    pub fn watch_new_tickets(mut self, enabled: bool) -> Self {
        self.watch_new = enabled;
        self
    }

    /// Listen for updates and deletion of these tickets.
    pub fn watch_tickets(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.ticket_ids.extend(ids);
        self.ticket_ids.sort_unstable();
        self.ticket_ids.dedup();
        self
    }

    /// Seed the version an incoming update is compared against.
    pub fn remember(&self, ticket: Ticket) {
        lock(&self.state.known).insert(ticket.id, ticket);
    }

    /// Last known version of a watched ticket.
    pub fn known(&self, ticket_id: i64) -> Option<Ticket> {
        lock(&self.state.known).get(&ticket_id).cloned()
    }

    /// Silence update and deletion toasts for `ticket_id` for `window`.
    pub fn suppress_toasts(&self, ticket_id: i64, window: Duration) {
        lock(&self.state.suppressed_until).insert(ticket_id, Instant::now() + window);
    }

    /// Silence toasts for the default window after a local action.
    pub fn suppress_toasts_after_action(&self, ticket_id: i64) {
        self.suppress_toasts(ticket_id, Duration::from_millis(TICKET_TOAST_SUPPRESSION_MS));
    }

    pub fn topics(&self) -> Vec<String> {
        self.core.topics()
    }
}

pub fn created_effects(ticket: &Ticket) -> Vec<AppEvent> {
    vec![
        AppEvent::toast(
            ToastLevel::Info,
            "New ticket",
            Some(format!("#{}: {}", ticket.id, ticket.title)),
        ),
        AppEvent::invalidate(query_keys::TICKETS),
        AppEvent::invalidate(query_keys::STATS),
        AppEvent::TicketCreated {
            ticket: ticket.clone(),
        },
    ]
}

/// Effects of an update to a watched ticket.
///
/// A specialist who neither administers nor created the ticket loses access
/// once it is handed to somebody else; nothing else is produced then.
pub fn update_effects(
    viewer: &User,
    previous: Option<&Ticket>,
    updated: &Ticket,
    toasts_suppressed: bool,
) -> Vec<AppEvent> {
    let is_creator = updated.created_by.as_ref().map(|u| u.id) == Some(viewer.id);
    if viewer.specialist && !viewer.has_role(ADMIN_ROLE) && !is_creator {
        let before = previous.and_then(|t| t.assigned_to.as_ref()).map(|u| u.id);
        if let Some(assignee) = &updated.assigned_to {
            if before != Some(assignee.id) && assignee.id != viewer.id {
                let name = assignee.display_name().to_string();
                let body = if before == Some(viewer.id) {
                    format!("Ticket handed over to {name}. You no longer have access.")
                } else {
                    format!("Ticket taken by {name}. You no longer have access.")
                };
                return vec![
                    AppEvent::toast(
                        ToastLevel::Warning,
                        format!("Ticket #{}", updated.id),
                        Some(body),
                    ),
                    AppEvent::TicketAccessLost {
                        ticket_id: updated.id,
                        assignee: name,
                    },
                ];
            }
        }
    }

    let mut effects = Vec::with_capacity(5);
    if !toasts_suppressed {
        if let Some(summary) = previous.and_then(|p| updated.change_summary(p)) {
            effects.push(AppEvent::toast(
                ToastLevel::Info,
                format!("Ticket #{}", updated.id),
                Some(summary),
            ));
        }
    }
    effects.push(AppEvent::invalidate(query_keys::TICKETS));
    effects.push(AppEvent::invalidate(query_keys::STATS));
    effects.push(AppEvent::invalidate(query_keys::ASSIGNMENTS));
    effects.push(AppEvent::TicketUpdated {
        ticket: updated.clone(),
    });
    effects
}

pub fn deleted_effects(ticket_id: i64, toasts_suppressed: bool) -> Vec<AppEvent> {
    let mut effects = Vec::with_capacity(4);
    if !toasts_suppressed {
        effects.push(AppEvent::toast(
            ToastLevel::Warning,
            format!("Ticket #{ticket_id} deleted"),
            None,
        ));
    }
    effects.push(AppEvent::invalidate(query_keys::TICKETS));
    effects.push(AppEvent::invalidate(query_keys::STATS));
    effects.push(AppEvent::TicketDeleted { ticket_id });
    effects
}

impl TicketFeedAdapter {
    fn watch_one(&mut self, ticket_id: i64) {
        let bus = self.core.bus.clone();
        let state = Arc::clone(&self.state);
        let viewer = self.viewer.clone();
        let handle = self
            .core
            .router
            .subscribe_as(&topics::ticket(ticket_id), move |updated: Ticket| {
                let previous = lock(&state.known).get(&updated.id).cloned();
                let effects = update_effects(
                    &viewer,
                    previous.as_ref(),
                    &updated,
                    state.is_suppressed(updated.id),
                );
                let lost = effects
                    .iter()
                    .any(|e| matches!(e, AppEvent::TicketAccessLost { .. }));
                if lost {
                    info!("lost access to ticket {}", updated.id);
                    lock(&state.known).remove(&updated.id);
                } else {
                    lock(&state.known).insert(updated.id, updated);
                }
                for effect in effects {
                    bus.emit(effect);
                }
                Ok(())
            });
        self.core.hold(handle);

        let bus = self.core.bus.clone();
        let state = Arc::clone(&self.state);
        let handle = self
            .core
            .router
            .subscribe(&topics::ticket_deleted(ticket_id), move |_| {
                debug!("ticket {ticket_id} deleted");
                lock(&state.known).remove(&ticket_id);
                for effect in deleted_effects(ticket_id, state.is_suppressed(ticket_id)) {
                    bus.emit(effect);
                }
                Ok(())
            });
        self.core.hold(handle);
    }
}

impl Service for TicketFeedAdapter {
    fn name(&self) -> &str {
        "tickets"
    }

    fn state(&self) -> ServiceState {
        self.core.state()
    }

    fn init(&mut self) -> HdResult<()> {
        if self.core.is_running() {
            return Ok(());
        }

        if self.watch_new {
            let bus = self.core.bus.clone();
            let handle = self
                .core
                .router
                .subscribe_as(topics::TICKET_NEW, move |ticket: Ticket| {
                    for effect in created_effects(&ticket) {
                        bus.emit(effect);
                    }
                    Ok(())
                });
            self.core.hold(handle);
        }

        for ticket_id in self.ticket_ids.clone() {
            self.watch_one(ticket_id);
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
    use hd_models::{TicketPriority, TicketStatus, UserShort};

    fn user(id: i64, specialist: bool, roles: &[&str]) -> User {
        User {
            id,
            username: format!("user{id}"),
            fio: None,
            email: None,
            telegram_id: None,
            specialist,
            roles: roles.iter().map(|r| r.to_string()).collect(),
            active: true,
        }
    }

    fn short(id: i64, fio: &str) -> UserShort {
        UserShort {
            id,
            username: format!("user{id}"),
            fio: Some(fio.to_string()),
        }
    }

    fn ticket(id: i64, assignee: Option<UserShort>) -> Ticket {
        Ticket {
            id,
            title: "Broken laptop".into(),
            description: String::new(),
            status: TicketStatus::Open,
            priority: TicketPriority::Medium,
            created_by: Some(short(1, "Customer")),
            assigned_to: assignee,
            support_line: None,
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn test_specialist_loses_access_on_reassignment() {
        let viewer = user(10, true, &["SPECIALIST"]);
        let before = ticket(5, Some(short(10, "Me")));
        let after = ticket(5, Some(short(11, "Bob Builder")));

        let effects = update_effects(&viewer, Some(&before), &after, false);
        assert_eq!(effects.len(), 2);
        match &effects[0] {
            AppEvent::Toast { level, body, .. } => {
                assert_eq!(*level, ToastLevel::Warning);
                assert!(body.as_deref().unwrap_or_default().contains("handed over to Bob Builder"));
            }
            other => panic!("unexpected effect: {other:?}"),
        }
        match &effects[1] {
            AppEvent::TicketAccessLost { ticket_id, assignee } => {
                assert_eq!(*ticket_id, 5);
                assert_eq!(assignee, "Bob Builder");
            }
            other => panic!("unexpected effect: {other:?}"),
        }
    }

    #[test]
    fn test_admin_keeps_access() {
        let viewer = user(10, true, &["ADMIN"]);
        let before = ticket(5, None);
        let after = ticket(5, Some(short(11, "Bob")));

        let effects = update_effects(&viewer, Some(&before), &after, false);
        match &effects[0] {
            AppEvent::Toast { body, .. } => {
                assert_eq!(body.as_deref(), Some("Ticket taken by Bob"));
            }
            other => panic!("unexpected effect: {other:?}"),
        }
        assert!(matches!(effects.last(), Some(AppEvent::TicketUpdated { .. })));
    }

    #[test]
    fn test_suppressed_update_still_invalidates() {
        let viewer = user(1, false, &[]);
        let before = ticket(5, None);
        let mut after = ticket(5, None);
        after.status = TicketStatus::Resolved;

        let effects = update_effects(&viewer, Some(&before), &after, true);
        assert!(!effects.iter().any(|e| matches!(e, AppEvent::Toast { .. })));
        let keys: Vec<_> = effects
            .iter()
            .filter_map(|e| match e {
                AppEvent::InvalidateQuery { key } => Some(key.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(keys, vec!["tickets", "stats", "assignments"]);
    }

    #[test]
    fn test_first_update_without_history_has_no_toast() {
        let viewer = user(1, false, &[]);
        let effects = update_effects(&viewer, None, &ticket(5, None), false);
        assert_eq!(effects.len(), 4);
    }

    #[test]
    fn test_deleted_effects() {
        let effects = deleted_effects(9, false);
        match &effects[0] {
            AppEvent::Toast { title, .. } => assert_eq!(title, "Ticket #9 deleted"),
            other => panic!("unexpected effect: {other:?}"),
        }
        assert_eq!(deleted_effects(9, true).len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_flow_and_suppression_window() {
        let router = TopicRouter::new();
        let bus = EventBus::new(32);
        let mut rx = bus.subscribe();
        let mut adapter = TicketFeedAdapter::new(router.clone(), bus, user(1, false, &[]))
            .watch_tickets([5]);
        adapter.init().unwrap();
        adapter.remember(ticket(5, None));
        adapter.suppress_toasts(5, Duration::from_secs(2));

        let mut resolved = ticket(5, None);
        resolved.status = TicketStatus::Resolved;
        let body = serde_json::to_string(&resolved).unwrap();

        router.dispatch("/topic/ticket/5", &body);
        let first = rx.recv().await.unwrap();
        assert!(matches!(first, AppEvent::InvalidateQuery { .. }));
        while !matches!(rx.recv().await.unwrap(), AppEvent::TicketUpdated { .. }) {}
        assert_eq!(adapter.known(5).map(|t| t.status), Some(TicketStatus::Resolved));

        tokio::time::advance(Duration::from_secs(3)).await;
        let mut closed = resolved.clone();
        closed.status = TicketStatus::Closed;
        router.dispatch("/topic/ticket/5", &serde_json::to_string(&closed).unwrap());
        match rx.recv().await.unwrap() {
            AppEvent::Toast { body, .. } => {
                assert_eq!(body.as_deref(), Some("Status changed: Resolved -> Closed"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_new_ticket_feed() {
        let router = TopicRouter::new();
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let mut adapter =
            TicketFeedAdapter::new(router.clone(), bus, user(1, true, &[])).watch_new_tickets(true);
        adapter.init().unwrap();

        let body = serde_json::to_string(&ticket(77, None)).unwrap();
        router.dispatch(topics::TICKET_NEW, &body);
        match rx.recv().await.unwrap() {
            AppEvent::Toast { title, body, .. } => {
                assert_eq!(title, "New ticket");
                assert_eq!(body.as_deref(), Some("#77: Broken laptop"));
            }
            other => panic!("unexpected event: {other:?}"),
        }

        adapter.shutdown().unwrap();
        assert_eq!(router.handler_count(topics::TICKET_NEW), 0);
    }
}
