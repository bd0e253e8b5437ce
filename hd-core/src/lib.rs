//! Helpdesk Core - Foundation types, error handling, configuration, and logging.
//!
//! This crate provides the shared foundation used by all other helpdesk crates:
//! - Application configuration (API server, realtime transport, session policy)
//! - Global error types covering all error categories
//! - Structured logging with tracing
//! - Platform directory lookup
//! - Common constants

pub mod config;
pub mod error;
pub mod logging;
pub mod platform;
pub mod constants;

// Re-export commonly used items at the crate root
pub use config::{AppConfig, ConfigHandle};
pub use error::{HdError, HdResult};
pub use logging::init_logging;
pub use platform::Platform;
