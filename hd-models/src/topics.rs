//! Topic and destination naming shared with the backend broker.
//!
//! Topics are the only addressing mechanism on the realtime connection; there
//! are no wildcard subscriptions. Inbound traffic arrives on `/topic/...`,
//! client publishes go to `/app/...`.

/// All newly created tickets.
pub const TICKET_NEW: &str = "/topic/ticket/new";

/// Notifications addressed to one user.
pub fn user_notifications(user_id: i64) -> String {
    format!("/topic/user/{user_id}/notifications")
}

/// Presence changes of one user.
pub fn user_status(user_id: i64) -> String {
    format!("/topic/user/{user_id}/status")
}

/// New assignments for one user.
pub fn user_assignments(user_id: i64) -> String {
    format!("/topic/user/{user_id}/assignments")
}

/// Rejections of assignments created by one user.
pub fn user_assignments_rejected(user_id: i64) -> String {
    format!("/topic/user/{user_id}/assignments/rejected")
}

/// Presence changes of all members of a support line.
pub fn line_status(line_id: i64) -> String {
    format!("/topic/line/{line_id}/status")
}

/// Updates to one ticket.
pub fn ticket(ticket_id: i64) -> String {
    format!("/topic/ticket/{ticket_id}")
}

/// Deletion of one ticket.
pub fn ticket_deleted(ticket_id: i64) -> String {
    format!("/topic/ticket/{ticket_id}/deleted")
}

/// Chat messages of one ticket.
pub fn ticket_messages(ticket_id: i64) -> String {
    format!("/topic/ticket/{ticket_id}/messages")
}

/// Typing indicators of one ticket.
pub fn ticket_typing(ticket_id: i64) -> String {
    format!("/topic/ticket/{ticket_id}/typing")
}

/// Client destinations (application-prefixed).
pub mod app {
    /// Post a chat message to a ticket.
    pub fn send_message(ticket_id: i64) -> String {
        format!("/app/ticket/{ticket_id}/send")
    }

    /// Signal typing state in a ticket chat.
    pub fn typing(ticket_id: i64) -> String {
        format!("/app/ticket/{ticket_id}/typing")
    }
}
