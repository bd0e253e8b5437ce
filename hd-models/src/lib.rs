//! Helpdesk Models - Wire payloads and the realtime topic contract.
//!
//! This crate owns every JSON shape exchanged with the helpdesk backend over
//! REST and the STOMP broker, plus the topic and destination naming scheme
//! both sides must agree on.

pub mod models;
pub mod topics;

// Re-export key types
pub use models::auth::{AuthResponse, LoginRequest, RefreshRequest, User, UserShort};
pub use models::assignment::{AssignmentEvent, LineShort};
pub use models::chat::{ChatMessage, SendMessageRequest, TypingIndicator, TypingSignal};
pub use models::notification::{Notification, NotificationType};
pub use models::presence::{ActivityStatus, StatusUpdate};
pub use models::ticket::{Ticket, TicketDeleted, TicketPriority, TicketStatus};
