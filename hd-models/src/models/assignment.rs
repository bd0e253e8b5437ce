//! Ticket assignment payloads delivered to specialists.

use serde::{Deserialize, Serialize};

use super::auth::UserShort;

/// Abbreviated support line reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineShort {
    pub id: i64,
    pub name: String,
}

/// A new or rejected assignment of a ticket to a user or support line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentEvent {
    #[serde(default)]
    pub id: Option<i64>,
    pub ticket_id: i64,
    #[serde(default)]
    pub ticket_title: String,
    #[serde(default)]
    pub from_user: Option<UserShort>,
    #[serde(default)]
    pub to_user: Option<UserShort>,
    #[serde(default)]
    pub to_line: Option<LineShort>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub rejected_reason: Option<String>,
}

impl AssignmentEvent {
    /// Who rejected the assignment: the target user, else the target line.
    pub fn rejected_by(&self) -> &str {
        if let Some(user) = &self.to_user {
            return user.display_name();
        }
        self.to_line.as_ref().map(|l| l.name.as_str()).unwrap_or("A specialist")
    }
}
