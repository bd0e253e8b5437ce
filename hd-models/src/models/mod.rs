//! Payload definitions.

pub mod auth;
pub mod assignment;
pub mod chat;
pub mod notification;
pub mod presence;
pub mod ticket;

use chrono::{DateTime, Utc};

/// Parse an ISO-8601 timestamp as sent by the backend. Returns `None` for
/// missing or unparseable values.
pub(crate) fn parse_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}
