//! Application-wide constants.

use std::time::Duration;

/// Application name.
pub const APP_NAME: &str = "Helpdesk";

/// Directory name used under the platform data/config roots.
pub const APP_DIR_NAME: &str = "Helpdesk";

/// Application version.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Base name of the rotated log file.
pub const LOG_FILE_NAME: &str = "helpdesk.log";

/// REST API version prefix.
pub const API_VERSION: &str = "v1";

/// Default server API timeout in milliseconds.
pub const DEFAULT_API_TIMEOUT_MS: u64 = 30_000;

/// Default timeout for the refresh token exchange in milliseconds.
pub const DEFAULT_REFRESH_TIMEOUT_MS: u64 = 15_000;

/// Lead time before token expiry at which a refresh is scheduled.
pub const REFRESH_MARGIN_SECS: u64 = 300;

/// Socket reconnection delay in seconds.
pub const RECONNECT_DELAY_SECS: u64 = 5;

/// STOMP heartbeat interval in each direction, in milliseconds.
pub const HEARTBEAT_INTERVAL_MS: u64 = 10_000;

/// Longest single timer the token clock arms. Longer waits are split into
/// several timers (matches the 32-bit millisecond limit of browser timers).
pub const MAX_TIMER_DURATION: Duration = Duration::from_millis(i32::MAX as u64);

/// STOMP protocol version negotiated with the broker.
pub const STOMP_VERSION: &str = "1.2";

/// Minimum spacing between "typing started" signals for one ticket.
pub const TYPING_THROTTLE_MS: u64 = 1_000;

/// Window after a local action on a ticket during which its update toasts are suppressed.
pub const TICKET_TOAST_SUPPRESSION_MS: u64 = 3_000;

/// Query keys invalidated by realtime events.
pub mod query_keys {
    pub const TICKETS: &str = "tickets";
    pub const TICKETS_COUNT: &str = "ticketsCount";
    pub const STATS: &str = "stats";
    pub const ASSIGNMENTS: &str = "assignments";

    /// Key for one ticket's detail query.
    pub fn ticket(ticket_id: i64) -> String {
        format!("ticket/{ticket_id}")
    }

    /// Key for one user's status query.
    pub fn user_status(user_id: i64) -> String {
        format!("userStatus/{user_id}")
    }
}
