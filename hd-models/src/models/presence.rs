//! Specialist presence (activity status) payloads.

use serde::{Deserialize, Serialize};

/// Activity status of a specialist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityStatus {
    Available,
    Unavailable,
    Busy,
    TechnicalIssue,
    Offline,
    #[serde(other)]
    Unknown,
}

impl ActivityStatus {
    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            ActivityStatus::Available => "available",
            ActivityStatus::Unavailable => "unavailable",
            ActivityStatus::Busy => "busy",
            ActivityStatus::TechnicalIssue => "having technical issues",
            ActivityStatus::Offline => "offline",
            ActivityStatus::Unknown => "in an unknown state",
        }
    }
}

impl std::fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Status change broadcast on `/topic/user/{id}/status` and `/topic/line/{id}/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub user_id: i64,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub fio: Option<String>,
    pub status: ActivityStatus,
}

impl StatusUpdate {
    /// Full name when known, otherwise the username.
    pub fn display_name(&self) -> &str {
        self.fio.as_deref().filter(|s| !s.is_empty()).unwrap_or(&self.username)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status_update() {
        let u: StatusUpdate = serde_json::from_str(
            r#"{"userId": 4, "username": "orlov", "fio": "", "status": "TECHNICAL_ISSUE"}"#,
        )
        .unwrap();
        assert_eq!(u.status, ActivityStatus::TechnicalIssue);
        assert_eq!(u.display_name(), "orlov");
        assert_eq!(u.status.to_string(), "having technical issues");
    }
}
