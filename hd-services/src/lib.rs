//! Helpdesk Services - Realtime consumers and application orchestration.
//!
//! This crate provides:
//! - Consumer adapters turning topic payloads into UI effects
//! - The event bus those effects travel on
//! - The realtime hub shared by all consumers of a signed-in session
//! - Lifecycle orchestration (startup, login, logout, shutdown)

pub mod adapters;
pub mod event_bus;
pub mod hub;
pub mod lifecycle;
pub mod registry;
pub mod service;

pub use adapters::{
    AssignmentAdapter, NotificationAdapter, PresenceAdapter, Publisher, TicketChatAdapter,
    TicketFeedAdapter,
};
pub use event_bus::{AppEvent, EventBus, ToastLevel};
pub use hub::RealtimeHub;
pub use lifecycle::{AccountApi, Lifecycle, LifecycleDiagnostics, LifecyclePhase};
pub use registry::{AdapterRegistry, WatchScope};
pub use service::{Service, ServiceState};

/// Lock a std mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
