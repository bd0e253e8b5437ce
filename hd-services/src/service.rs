//! Service trait and lifecycle state.
//!
//! Consumer adapters implement `Service`: `init` registers their topic
//! subscriptions and `shutdown` releases them.

use hd_core::error::HdResult;

/// Lifecycle state of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Created but not attached.
    Created,
    /// Subscriptions registered; handling events.
    Running,
    /// Subscriptions released.
    Stopped,
    /// Attaching failed.
    Failed,
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Standard lifecycle for anything that consumes realtime events.
pub trait Service: Send + Sync {
    /// Human-readable name of this service.
    fn name(&self) -> &str;

    /// Current state of this service.
    fn state(&self) -> ServiceState;

    /// Start consuming. Called once after construction.
    fn init(&mut self) -> HdResult<()>;

    /// Stop consuming. Must be safe to call more than once.
    fn shutdown(&mut self) -> HdResult<()>;

    /// Health check. Returns true if the service is operational.
    fn is_healthy(&self) -> bool {
        self.state() == ServiceState::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestService {
        state: ServiceState,
    }

    impl Service for TestService {
        fn name(&self) -> &str {
            "test"
        }
        fn state(&self) -> ServiceState {
            self.state
        }
        fn init(&mut self) -> HdResult<()> {
            self.state = ServiceState::Running;
            Ok(())
        }
        fn shutdown(&mut self) -> HdResult<()> {
            self.state = ServiceState::Stopped;
            Ok(())
        }
    }

    #[test]
    fn test_service_lifecycle() {
        let mut svc = TestService {
            state: ServiceState::Created,
        };
        assert!(!svc.is_healthy());
        svc.init().unwrap();
        assert!(svc.is_healthy());
        svc.shutdown().unwrap();
        assert!(!svc.is_healthy());
        assert_eq!(svc.state().to_string(), "stopped");
    }
}
