//! Per-user notification payloads delivered on `/topic/user/{id}/notifications`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    Message,
    StatusChange,
    Assignment,
    Escalation,
    #[serde(other)]
    Unknown,
}

/// A notification pushed to a single user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub ticket_id: i64,
    #[serde(default)]
    pub ticket_title: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub sender_id: Option<i64>,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl Notification {
    /// Creation time, if the server sent a parseable one.
    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        super::parse_timestamp(self.created_at.as_deref())
    }
}
