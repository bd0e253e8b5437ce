//! Helpdesk Auth - Session continuity for the realtime client.
//!
//! Provides:
//! - `Credential`: access/refresh token pair with decoded JWT expiry
//! - `TokenClock`: single-timer scheduler for proactive refreshes
//! - `SessionStore`: owner of the current session, refresh coordination, persistence
//! - `SessionStorage`: durable storage backends (file, memory)

pub mod clock;
pub mod credential;
pub mod persist;
pub mod session;
pub mod store;

pub use clock::{RefreshTrigger, TokenClock};
pub use credential::Credential;
pub use persist::{FileSessionStorage, MemorySessionStorage, SessionStorage};
pub use session::{ClearReason, Session, SessionEvent};
pub use store::{AuthRefresher, CredentialSource, RefreshPolicy, SessionStore};
