//! Helpdesk API - HTTP client for the helpdesk REST API.
//!
//! Covers the authentication surface the realtime client depends on: login,
//! token refresh, logout, and the current user profile. `ApiClient`
//! implements `hd_auth::AuthRefresher`, so it plugs straight into the
//! session store.

pub mod client;
pub mod endpoints;
pub mod response;

// Re-export key types
pub use client::{ApiClient, RetryConfig};
pub use response::ApiResponse;
