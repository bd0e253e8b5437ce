//! Consumer adapters.
//!
//! Each adapter registers interest in a handful of topics on the shared
//! [`TopicRouter`] and turns the raw payloads into [`AppEvent`]s. Adapters
//! never touch the transport; dropping or shutting one down releases its
//! registrations, and the connection manager unwires any topic left
//! without handlers.
//!
//! [`AppEvent`]: crate::event_bus::AppEvent

pub mod assignments;
pub mod chat;
pub mod notifications;
pub mod presence;
pub mod tickets;

pub use assignments::AssignmentAdapter;
pub use chat::TicketChatAdapter;
pub use notifications::NotificationAdapter;
pub use presence::PresenceAdapter;
pub use tickets::TicketFeedAdapter;

use hd_core::error::HdResult;
use hd_socket::{ConnectionManager, SubscriptionHandle, TopicRouter};

use crate::event_bus::EventBus;
use crate::service::ServiceState;

/// Sends JSON payloads to application destinations on the live connection.
pub trait Publisher: Send + Sync {
    fn publish_json(&self, destination: &str, payload: &serde_json::Value) -> HdResult<()>;
}

impl Publisher for ConnectionManager {
    fn publish_json(&self, destination: &str, payload: &serde_json::Value) -> HdResult<()> {
        self.publish(destination, payload)
    }
}

/// Router, bus and registrations shared by every adapter.
pub(crate) struct AdapterCore {
    pub(crate) router: TopicRouter,
    pub(crate) bus: EventBus,
    handles: Vec<SubscriptionHandle>,
    state: ServiceState,
}

impl AdapterCore {
    pub(crate) fn new(router: TopicRouter, bus: EventBus) -> Self {
        Self {
            router,
            bus,
            handles: Vec::new(),
            state: ServiceState::Created,
        }
    }

    pub(crate) fn state(&self) -> ServiceState {
        self.state
    }

    pub(crate) fn is_running(&self) -> bool {
        self.state == ServiceState::Running
    }

    pub(crate) fn hold(&mut self, handle: SubscriptionHandle) {
        self.handles.push(handle);
    }

    pub(crate) fn mark_running(&mut self) {
        self.state = ServiceState::Running;
    }

    /// Topics this adapter currently listens on.
    pub(crate) fn topics(&self) -> Vec<String> {
        self.handles.iter().map(|h| h.topic().to_string()).collect()
    }

    /// Drop every registration.
    pub(crate) fn release(&mut self) {
        for handle in &mut self.handles {
            handle.unsubscribe();
        }
        self.handles.clear();
        if self.state != ServiceState::Created {
            self.state = ServiceState::Stopped;
        }
    }
}
