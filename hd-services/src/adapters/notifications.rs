//! Personal notifications feed.

use tracing::debug;

use hd_core::error::HdResult;
use hd_models::{topics, Notification, NotificationType};
use hd_socket::TopicRouter;

use super::AdapterCore;
use crate::event_bus::{AppEvent, EventBus, ToastLevel};
use crate::service::{Service, ServiceState};

/// Shows a toast for every notification addressed to the user.
pub struct NotificationAdapter {
    core: AdapterCore,
    user_id: i64,
}

impl NotificationAdapter {
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

/// Toast for a notification. Status changes are left to the ticket feed.
pub fn notification_effect(notification: &Notification) -> Option<AppEvent> {
    let level = match notification.kind {
        NotificationType::StatusChange => return None,
        NotificationType::Assignment => ToastLevel::Success,
        _ => ToastLevel::Info,
    };
    let body = Some(notification.body.clone()).filter(|b| !b.is_empty());
    Some(AppEvent::toast(level, notification.title.clone(), body))
}

impl Service for NotificationAdapter {
    fn name(&self) -> &str {
        "notifications"
    }

    fn state(&self) -> ServiceState {
        self.core.state()
    }

    fn init(&mut self) -> HdResult<()> {
        if self.core.is_running() {
            return Ok(());
        }
        let bus = self.core.bus.clone();
        let handle = self.core.router.subscribe_as(
            &topics::user_notifications(self.user_id),
            move |notification: Notification| {
                match notification_effect(&notification) {
                    Some(event) => bus.emit(event),
                    None => debug!(
                        "skipping {:?} notification for ticket {}",
                        notification.kind, notification.ticket_id
                    ),
                }
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
