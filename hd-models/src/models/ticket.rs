//! Ticket payloads broadcast on the ticket feed topics.

use serde::{Deserialize, Serialize};

use super::assignment::LineShort;
use super::auth::UserShort;

/// Ticket lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    New,
    Open,
    Pending,
    Escalated,
    Resolved,
    PendingClosure,
    Closed,
    Reopened,
    Rejected,
    Cancelled,
    #[serde(other)]
    Unknown,
}

impl TicketStatus {
    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            TicketStatus::New => "New",
            TicketStatus::Open => "Open",
            TicketStatus::Pending => "Pending",
            TicketStatus::Escalated => "Escalated",
            TicketStatus::Resolved => "Resolved",
            TicketStatus::PendingClosure => "Pending closure",
            TicketStatus::Closed => "Closed",
            TicketStatus::Reopened => "Reopened",
            TicketStatus::Rejected => "Rejected",
            TicketStatus::Cancelled => "Cancelled",
            TicketStatus::Unknown => "Unknown",
        }
    }
}

/// Ticket priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketPriority {
    Low,
    Medium,
    High,
    Urgent,
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for TicketPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TicketPriority::Low => "LOW",
            TicketPriority::Medium => "MEDIUM",
            TicketPriority::High => "HIGH",
            TicketPriority::Urgent => "URGENT",
            TicketPriority::Unknown => "UNKNOWN",
        };
        write!(f, "{s}")
    }
}

/// Full ticket as sent on `/topic/ticket/new` and `/topic/ticket/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: TicketStatus,
    pub priority: TicketPriority,
    #[serde(default)]
    pub created_by: Option<UserShort>,
    #[serde(default)]
    pub assigned_to: Option<UserShort>,
    #[serde(default)]
    pub support_line: Option<LineShort>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl Ticket {
    /// Summarize the most significant difference between two versions of a
    /// ticket, or `None` if nothing user-visible changed.
    ///
    /// Checked in order: assignee, status, support line, priority, title, description.
    pub fn change_summary(&self, previous: &Ticket) -> Option<String> {
        let prev_assignee = previous.assigned_to.as_ref().map(|u| u.id);
        if let Some(assignee) = &self.assigned_to {
            if prev_assignee != Some(assignee.id) {
                return Some(format!("Ticket taken by {}", assignee.display_name()));
            }
        }

        if previous.status != self.status {
            return Some(format!(
                "Status changed: {} -> {}",
                previous.status.label(),
                self.status.label()
            ));
        }

        let prev_line = previous.support_line.as_ref().map(|l| l.id);
        if let Some(line) = &self.support_line {
            if prev_line != Some(line.id) {
                return Some(format!("Ticket forwarded to {}", line.name));
            }
        }

        if previous.priority != self.priority {
            return Some(format!("Priority changed: {}", self.priority));
        }
        if previous.title != self.title {
            return Some("Ticket title updated".to_string());
        }
        if previous.description != self.description {
            return Some("Ticket description updated".to_string());
        }
        None
    }
}

/// Body of `/topic/ticket/{id}/deleted`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketDeleted {
    pub id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket() -> Ticket {
        serde_json::from_value(serde_json::json!({
            "id": 1,
            "title": "Mail broken",
            "description": "Outlook crashes",
            "status": "NEW",
            "priority": "MEDIUM",
            "createdBy": {"id": 10, "username": "user10", "fio": null},
            "assignedTo": null,
            "supportLine": {"id": 1, "name": "First line"}
        }))
        .unwrap()
    }

    #[test]
    fn test_no_change() {
        let t = ticket();
        assert_eq!(t.change_summary(&t.clone()), None);
    }

    #[test]
    fn test_assignee_change_wins() {
        let old = ticket();
        let mut new = ticket();
        new.assigned_to = Some(UserShort { id: 3, username: "ivanov".into(), fio: None });
        new.status = TicketStatus::Open;
        assert_eq!(new.change_summary(&old).unwrap(), "Ticket taken by ivanov");
    }

    #[test]
    fn test_status_then_priority() {
        let old = ticket();
        let mut new = ticket();
        new.status = TicketStatus::Escalated;
        assert_eq!(new.change_summary(&old).unwrap(), "Status changed: New -> Escalated");

        let mut new = ticket();
        new.priority = TicketPriority::Urgent;
        assert_eq!(new.change_summary(&old).unwrap(), "Priority changed: URGENT");
    }

    #[test]
    fn test_unknown_status_tolerated() {
        let mut v = serde_json::to_value(ticket()).unwrap();
        v["status"] = serde_json::json!("ARCHIVED");
        let t: Ticket = serde_json::from_value(v).unwrap();
        assert_eq!(t.status, TicketStatus::Unknown);
    }
}
