//! Ticket chat payloads: inbound messages and typing indicators, and the
//! outbound bodies published to `/app/ticket/{id}/...`.

use serde::{Deserialize, Serialize};

use super::auth::UserShort;

/// A chat message broadcast to the participants of a ticket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: i64,
    pub ticket_id: i64,
    pub content: String,
    #[serde(default)]
    pub sender: Option<UserShort>,
    #[serde(default)]
    pub sender_id: Option<i64>,
    #[serde(default)]
    pub sender_username: Option<String>,
    #[serde(default)]
    pub sender_fio: Option<String>,
    #[serde(default)]
    pub sender_type: String,
    #[serde(default)]
    pub internal: bool,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl ChatMessage {
    /// Id of the author, from either the flat fields or the embedded sender.
    pub fn author_id(&self) -> Option<i64> {
        self.sender_id.or_else(|| self.sender.as_ref().map(|s| s.id))
    }

    /// Best available display name for the author.
    pub fn author_name(&self) -> &str {
        if let Some(fio) = self.sender_fio.as_deref().filter(|s| !s.is_empty()) {
            return fio;
        }
        if let Some(username) = self.sender_username.as_deref() {
            return username;
        }
        self.sender.as_ref().map(|s| s.display_name()).unwrap_or("unknown")
    }
}

/// Typing state of one participant in a ticket chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingIndicator {
    pub ticket_id: i64,
    pub user_id: i64,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub fio: Option<String>,
    pub typing: bool,
}

/// Body published to `/app/ticket/{id}/send`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
    pub internal: bool,
}

/// Body published to `/app/ticket/{id}/typing`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TypingSignal {
    pub typing: bool,
}
