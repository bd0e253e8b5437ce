//! Listen command - stream realtime events to the terminal.

use console::style;
use tokio::sync::broadcast::error::RecvError;
use tracing::info;

use hd_core::config::ConfigHandle;
use hd_core::error::HdResult;
use hd_services::event_bus::event_label;
use hd_services::{AppEvent, ToastLevel, WatchScope};
use hd_socket::ConnectionCallbacks;

use crate::OutputFormat;

/// Run the listen command.
pub async fn run(
    config: ConfigHandle,
    tickets: Vec<i64>,
    lines: Vec<i64>,
    format: OutputFormat,
) -> HdResult<()> {
    let lifecycle = super::create_lifecycle(&config).await?;
    let mut rx = lifecycle.bus().subscribe();

    let scope = WatchScope {
        line_ids: lines,
        ticket_ids: tickets,
    };
    let callbacks = ConnectionCallbacks::new()
        .on_connect(|| info!("realtime connection established"))
        .on_disconnect(|| info!("realtime connection lost"));

    if !lifecycle.startup(&scope, callbacks).await? {
        lifecycle.shutdown().await;
        return Err(super::not_signed_in());
    }

    if format == OutputFormat::Text {
        let user = lifecycle.require_user()?;
        println!(
            "  {} Listening as {} on {} (Ctrl+C to stop)",
            style("OK").green().bold(),
            style(user.display_name()).bold(),
            lifecycle.hub().url()
        );
        for adapter in lifecycle.diagnostics().adapters {
            println!("  {} {}", style("+").dim(), adapter.name);
        }
        println!();
    }

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(ev) => {
                        let ended = matches!(ev, AppEvent::SessionEnded { .. });
                        match format {
                            OutputFormat::Json => {
                                println!("{}", serde_json::to_string(&ev).unwrap_or_default());
                            }
                            OutputFormat::Text => {
                                println!("  {} {}", style(format!("[{}]", event_label(&ev))).cyan(), render(&ev));
                            }
                        }
                        if ended {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        println!("  {} Missed {n} events (slow consumer)", style("WARN").yellow());
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\n  Disconnecting...");
                break;
            }
        }
    }

    lifecycle.shutdown().await;
    Ok(())
}

/// One-line text rendering of an event.
fn render(event: &AppEvent) -> String {
    match event {
        AppEvent::Toast { level, title, body } => {
            let title = match level {
                ToastLevel::Info => style(title.as_str()).bold(),
                ToastLevel::Success => style(title.as_str()).green().bold(),
                ToastLevel::Warning => style(title.as_str()).yellow().bold(),
                ToastLevel::Error => style(title.as_str()).red().bold(),
            };
            match body {
                Some(body) => format!("{title}: {body}"),
                None => title.to_string(),
            }
        }
        AppEvent::InvalidateQuery { key } => style(format!("stale: {key}")).dim().to_string(),
        AppEvent::StatusUpdated { status, .. } => format!("your status is now {}", status.label()),
        AppEvent::ChatMessageReceived { ticket_id, message } => {
            let note = if message.internal { " (internal)" } else { "" };
            format!(
                "#{ticket_id} {}{note}: {}",
                style(message.author_name()).bold(),
                message.content
            )
        }
        AppEvent::TypingChanged { ticket_id, name, typing, .. } => {
            if *typing {
                format!("#{ticket_id} {name} is typing...")
            } else {
                format!("#{ticket_id} {name} stopped typing")
            }
        }
        AppEvent::TicketCreated { ticket } => format!("#{} {}", ticket.id, ticket.title),
        AppEvent::TicketUpdated { ticket } => format!(
            "#{} {} [{}, {}]",
            ticket.id,
            ticket.title,
            ticket.status.label(),
            ticket.priority
        ),
        AppEvent::TicketDeleted { ticket_id } => format!("#{ticket_id} deleted"),
        AppEvent::TicketAccessLost { ticket_id, assignee } => {
            format!("#{ticket_id} now belongs to {assignee}")
        }
        AppEvent::ConnectionStateChanged { connected, message } => {
            if *connected {
                style(message.as_str()).green().to_string()
            } else {
                style(message.as_str()).yellow().to_string()
            }
        }
        AppEvent::SessionEnded { reason } => format!(
            "{} ({reason}). Run `helpdesk login` to sign in again.",
            style("session ended").red().bold()
        ),
    }
}
