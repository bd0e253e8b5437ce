//! Status command - show session, token schedule and connection settings.

use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, ContentArrangement, Table};
use console::style;
use serde_json::json;
use tracing::warn;

use hd_core::config::ConfigHandle;
use hd_core::error::HdResult;

use crate::OutputFormat;

/// Run the status command.
pub async fn run(config: ConfigHandle, format: OutputFormat) -> HdResult<()> {
    let lifecycle = super::create_lifecycle(&config).await?;
    if let Err(e) = lifecycle.restore().await {
        warn!("could not load the user profile: {e}");
    }
    let diag = lifecycle.diagnostics();
    let cfg = lifecycle.config().clone();
    let session_path = cfg.effective_session_path()?;
    lifecycle.shutdown().await;

    match format {
        OutputFormat::Json => super::print_json(&json!({
            "session": diag,
            "api_base_url": cfg.api_base_url()?,
            "session_path": session_path.display().to_string(),
            "realtime": cfg.realtime,
            "refresh_margin_secs": cfg.session.refresh_margin_secs,
            "logout_on_transient_refresh_error": cfg.session.logout_on_transient_refresh_error,
        })),
        OutputFormat::Text => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(vec!["Session", ""]);

            let signed_in = if diag.authenticated {
                style("signed in").green().to_string()
            } else {
                style("signed out").yellow().to_string()
            };
            table.add_row(vec!["State".to_string(), signed_in]);
            table.add_row(vec![
                "User".to_string(),
                match (&diag.username, diag.user_id) {
                    (Some(name), Some(id)) => format!("{name} (id {id})"),
                    _ => "-".to_string(),
                },
            ]);
            table.add_row(vec![
                "Token expires".to_string(),
                super::format_instant(diag.expires_at),
            ]);
            table.add_row(vec![
                "Next refresh".to_string(),
                super::format_instant(diag.next_refresh_at),
            ]);
            table.add_row(vec![
                "Refresh margin".to_string(),
                format!("{}s", cfg.session.refresh_margin_secs),
            ]);
            table.add_row(vec![
                "Refresh failure".to_string(),
                if cfg.session.logout_on_transient_refresh_error {
                    "always sign out".to_string()
                } else {
                    format!("retry after {}s while valid", cfg.session.transient_retry_secs)
                },
            ]);
            table.add_row(vec![
                "Stored at".to_string(),
                session_path.display().to_string(),
            ]);
            println!("{table}");

            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(vec!["Server", ""]);
            table.add_row(vec!["API".to_string(), cfg.api_base_url()?]);
            table.add_row(vec!["Broker".to_string(), diag.ws_url.clone()]);
            table.add_row(vec![
                "Reconnect delay".to_string(),
                if cfg.realtime.max_reconnect_delay_ms > cfg.realtime.reconnect_delay_ms {
                    format!(
                        "{}ms, backoff to {}ms",
                        cfg.realtime.reconnect_delay_ms, cfg.realtime.max_reconnect_delay_ms
                    )
                } else {
                    format!("{}ms", cfg.realtime.reconnect_delay_ms)
                },
            ]);
            table.add_row(vec![
                "Heart-beat".to_string(),
                format!(
                    "{},{}",
                    cfg.realtime.heartbeat_outgoing_ms, cfg.realtime.heartbeat_incoming_ms
                ),
            ]);
            println!("{table}");
        }
    }

    Ok(())
}
