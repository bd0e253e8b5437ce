//! Adapter registry.
//!
//! Holds the consumer adapters attached for one signed-in user, attaches
//! them in registration order and detaches them in reverse.

use std::sync::Arc;

use tracing::{error, info};

use hd_core::error::{HdError, HdResult};
use hd_models::User;
use hd_socket::TopicRouter;

use crate::adapters::{
    AssignmentAdapter, NotificationAdapter, PresenceAdapter, Publisher, TicketChatAdapter,
    TicketFeedAdapter,
};
use crate::event_bus::EventBus;
use crate::service::{Service, ServiceState};

/// Extra lines and tickets to watch besides the user's own topics.
#[derive(Debug, Clone, Default)]
pub struct WatchScope {
    pub line_ids: Vec<i64>,
    pub ticket_ids: Vec<i64>,
}

pub struct AdapterRegistry {
    services: Vec<(String, Box<dyn Service>)>,
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            services: Vec::new(),
        }
    }

    /// Register a service. Services are attached in registration order.
    pub fn register<S: Service + 'static>(&mut self, service: S) {
        let name = service.name().to_string();
        info!("registered adapter: {name}");
        self.services.push((name, Box::new(service)));
    }

    /// The standard adapter set for `user`.
    ///
    /// Order:
    /// 1. Notifications
    /// 2. Presence (own status plus `scope.line_ids`)
    /// 3. Assignments (specialists only)
    /// 4. Ticket feed (new tickets for specialists, plus `scope.ticket_ids`)
    /// 5. One chat adapter per watched ticket
    pub fn for_user(
        router: &TopicRouter,
        bus: &EventBus,
        publisher: Arc<dyn Publisher>,
        user: &User,
        scope: &WatchScope,
    ) -> Self {
        let mut registry = Self::new();

        registry.register(NotificationAdapter::new(router.clone(), bus.clone(), user.id));

        registry.register(
            PresenceAdapter::new(router.clone(), bus.clone(), user.id)
                .with_lines(scope.line_ids.iter().copied()),
        );

        if user.specialist {
            registry.register(AssignmentAdapter::new(router.clone(), bus.clone(), user.id));
        }

        registry.register(
            TicketFeedAdapter::new(router.clone(), bus.clone(), user.clone())
                .watch_new_tickets(user.specialist)
                .watch_tickets(scope.ticket_ids.iter().copied()),
        );

        for &ticket_id in &scope.ticket_ids {
            registry.register(TicketChatAdapter::new(
                router.clone(),
                bus.clone(),
                Arc::clone(&publisher),
                ticket_id,
                user.id,
            ));
        }

        info!("registered {} adapters for user {}", registry.len(), user.id);
        registry
    }

    /// Attach all registered adapters in order.
    pub fn init_all(&mut self) -> HdResult<()> {
        info!("attaching {} adapters", self.services.len());

        for (name, service) in &mut self.services {
            if let Err(e) = service.init() {
                error!("failed to attach adapter {name}: {e}");
                return Err(HdError::Internal(format!("{name}: {e}")));
            }
        }
        Ok(())
    }

    /// Detach all adapters in reverse order.
    pub fn shutdown_all(&mut self) {
        for (name, service) in self.services.iter_mut().rev() {
            if let Err(e) = service.shutdown() {
                error!("error detaching adapter {name}: {e}");
            }
        }
        info!("all adapters detached");
    }

    /// State and health of every adapter.
    pub fn health_check(&self) -> Vec<(String, ServiceState, bool)> {
        self.services
            .iter()
            .map(|(name, svc)| (name.clone(), svc.state(), svc.is_healthy()))
            .collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.services.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
