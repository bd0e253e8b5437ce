//! CLI command implementations.

pub mod listen;
pub mod login;
pub mod logout;
pub mod send;
pub mod status;

use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use console::style;
use serde_json::Value;

use hd_core::config::ConfigHandle;
use hd_core::error::{HdError, HdResult};
use hd_services::{Lifecycle, RealtimeHub};

/// Helper to build the lifecycle from config.
pub async fn create_lifecycle(config: &ConfigHandle) -> HdResult<Lifecycle> {
    Lifecycle::load(config).await
}

/// Wait until the hub reports a live connection.
pub async fn wait_connected(hub: &RealtimeHub, limit: Duration) -> HdResult<()> {
    let mut states = hub.state_receiver();
    let ready = tokio::time::timeout(limit, states.wait_for(|s| s.is_connected()))
        .await
        .map(|r| r.map(|_| ()));
    match ready {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => Err(HdError::SocketDisconnected),
        Err(_) => Err(HdError::Timeout(format!(
            "no realtime connection to {} after {}s",
            hub.url(),
            limit.as_secs()
        ))),
    }
}

/// Error returned when a command needs a stored session.
pub fn not_signed_in() -> HdError {
    println!(
        "  {} Not signed in. Run {} first.",
        style("!").yellow().bold(),
        style("helpdesk login").bold()
    );
    HdError::NotAuthenticated
}

/// Local-time rendering of an instant, with the remaining time.
pub fn format_instant(at: Option<DateTime<Utc>>) -> String {
    let Some(at) = at else {
        return "-".to_string();
    };
    let local = at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S");
    let remaining = at - Utc::now();
    if remaining.num_seconds() <= 0 {
        format!("{local} (due)")
    } else {
        format!("{local} (in {})", format_remaining(remaining.num_seconds()))
    }
}

fn format_remaining(secs: i64) -> String {
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

pub fn print_json(value: &Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_remaining() {
        assert_eq!(format_remaining(42), "42s");
        assert_eq!(format_remaining(125), "2m 5s");
        assert_eq!(format_remaining(7260), "2h 1m");
    }

    #[test]
    fn test_format_instant_none() {
        assert_eq!(format_instant(None), "-");
    }

    #[tokio::test]
    async fn test_wait_connected_times_out_when_offline() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = hd_core::config::AppConfig::default();
        config.session.storage_path = dir.path().join("session.json").display().to_string();
        config.server.ws_url = "ws://127.0.0.1:9/ws".into();
        let lifecycle = Lifecycle::build(config).unwrap();

        let err = wait_connected(lifecycle.hub(), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, HdError::Timeout(ref m) if m.contains("127.0.0.1:9")));
        lifecycle.shutdown().await;
    }
}
