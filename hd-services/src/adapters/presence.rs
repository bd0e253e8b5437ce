//! Activity status of the user and of colleagues on their support lines.

use hd_core::constants::query_keys;
use hd_core::error::HdResult;
use hd_models::{topics, StatusUpdate};
use hd_socket::TopicRouter;

use super::AdapterCore;
use crate::event_bus::{AppEvent, EventBus, ToastLevel};
use crate::service::{Service, ServiceState};

pub struct PresenceAdapter {
    core: AdapterCore,
    user_id: i64,
    line_ids: Vec<i64>,
}

impl PresenceAdapter {
    pub fn new(router: TopicRouter, bus: EventBus, user_id: i64) -> Self {
        Self {
            core: AdapterCore::new(router, bus),
            user_id,
            line_ids: Vec::new(),
        }
    }

    /// Also watch the members of these support lines.
    pub fn with_lines(mut self, line_ids: impl IntoIterator<Item = i64>) -> Self {
        self.line_ids.extend(line_ids);
        self.line_ids.sort_unstable();
        self.line_ids.dedup();
        self
    }

    pub fn topics(&self) -> Vec<String> {
        self.core.topics()
    }
}

/// Effects of a status change seen on a line topic.
pub fn colleague_effects(own_user_id: i64, update: &StatusUpdate) -> Vec<AppEvent> {
    if update.user_id == own_user_id {
        return Vec::new();
    }
    vec![
        AppEvent::toast(
            ToastLevel::Warning,
            "Colleague status",
            Some(format!(
                "{} is now {}",
                update.display_name(),
                update.status.label()
            )),
        ),
        AppEvent::invalidate(query_keys::user_status(update.user_id)),
    ]
}

impl Service for PresenceAdapter {
    fn name(&self) -> &str {
        "presence"
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
            &topics::user_status(self.user_id),
            move |update: StatusUpdate| {
                bus.emit(AppEvent::StatusUpdated {
                    user_id: update.user_id,
                    status: update.status,
                });
                Ok(())
            },
        );
        self.core.hold(handle);

        for line_id in self.line_ids.clone() {
            let bus = self.core.bus.clone();
            let own = self.user_id;
            let handle = self.core.router.subscribe_as(
                &topics::line_status(line_id),
                move |update: StatusUpdate| {
                    for event in colleague_effects(own, &update) {
                        bus.emit(event);
                    }
                    Ok(())
                },
            );
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
