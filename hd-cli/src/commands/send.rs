//! Send command - post a chat message to a ticket.

use std::sync::Arc;
use std::time::Duration;

use console::style;
use serde_json::json;

use hd_core::config::ConfigHandle;
use hd_core::error::{HdError, HdResult};
use hd_services::{Publisher, TicketChatAdapter, WatchScope};
use hd_socket::ConnectionCallbacks;

use crate::OutputFormat;

/// Run the send command.
pub async fn run(
    config: ConfigHandle,
    ticket_id: i64,
    content: String,
    internal: bool,
    format: OutputFormat,
) -> HdResult<()> {
    let content = content.trim().to_string();
    if content.is_empty() {
        return Err(HdError::Internal("message is empty".into()));
    }

    let lifecycle = super::create_lifecycle(&config).await?;
    if !lifecycle
        .startup(&WatchScope::default(), ConnectionCallbacks::new())
        .await?
    {
        lifecycle.shutdown().await;
        return Err(super::not_signed_in());
    }

    let connect_limit = {
        let cfg = config.read().await;
        Duration::from_millis(cfg.realtime.connect_timeout_ms)
    };
    let result = send(&lifecycle, ticket_id, &content, internal, connect_limit).await;
    lifecycle.shutdown().await;
    result?;

    match format {
        OutputFormat::Json => super::print_json(&json!({
            "ticket_id": ticket_id,
            "internal": internal,
            "sent": true,
        })),
        OutputFormat::Text => println!(
            "  {} Sent {}to ticket #{ticket_id}.",
            style("OK").green().bold(),
            if internal { "internal note " } else { "" }
        ),
    }
    Ok(())
}

async fn send(
    lifecycle: &hd_services::Lifecycle,
    ticket_id: i64,
    content: &str,
    internal: bool,
    connect_limit: Duration,
) -> HdResult<()> {
    let user = lifecycle.require_user()?;
    let hub = lifecycle.hub();
    super::wait_connected(hub, connect_limit).await?;

    let publisher: Arc<dyn Publisher> = hub.clone();
    let chat = TicketChatAdapter::new(
        hub.router().clone(),
        lifecycle.bus().clone(),
        publisher,
        ticket_id,
        user.id,
    );
    chat.send_message(content, internal)
}
