//! Login command - sign in and store the session.

use std::path::PathBuf;

use console::style;
use dialoguer::{Input, Password};
use serde_json::json;
use tracing::error;

use hd_core::config::{AppConfig, ConfigHandle};
use hd_core::error::{HdError, HdResult};
use hd_services::WatchScope;
use hd_socket::ConnectionCallbacks;

use crate::OutputFormat;

/// Run the login command.
pub async fn run(
    config: ConfigHandle,
    username: Option<String>,
    password: Option<String>,
    server: Option<String>,
    save_to: Option<PathBuf>,
    format: OutputFormat,
) -> HdResult<()> {
    if let Some(address) = server {
        config.write().await.server.api_base_url = AppConfig::sanitize_server_address(&address);
    }
    let api_base = config.read().await.api_base_url()?;

    // Username: arg > interactive prompt
    let username = match username {
        Some(u) => u,
        None => Input::new()
            .with_prompt("Username")
            .interact_text()
            .map_err(|e| HdError::Internal(e.to_string()))?,
    };
    let password = match password {
        Some(p) => p,
        None => Password::new()
            .with_prompt("Password")
            .interact()
            .map_err(|e| HdError::Internal(e.to_string()))?,
    };
    if username.trim().is_empty() || password.is_empty() {
        return Err(HdError::Unauthorized("username and password are required".into()));
    }

    if format == OutputFormat::Text {
        println!(
            "{} Signing in to {api_base} as {}...",
            style("[1/2]").bold().dim(),
            style(&username).bold()
        );
    }

    let lifecycle = super::create_lifecycle(&config).await?;
    let user = match lifecycle
        .login(username.trim(), &password, &WatchScope::default(), ConnectionCallbacks::new())
        .await
    {
        Ok(user) => user,
        Err(e) => {
            error!("login failed: {e}");
            if format == OutputFormat::Text {
                println!("  {} {e}", style("FAIL").red().bold());
            }
            lifecycle.shutdown().await;
            return Err(e);
        }
    };

    if let Some(path) = &save_to {
        config.read().await.save_to_file(path)?;
    }

    let diag = lifecycle.diagnostics();
    lifecycle.shutdown().await;

    match format {
        OutputFormat::Json => super::print_json(&json!({
            "user": user,
            "expires_at": diag.expires_at,
            "next_refresh_at": diag.next_refresh_at,
            "config_saved": save_to.as_ref().map(|p| p.display().to_string()),
        })),
        OutputFormat::Text => {
            println!(
                "  {} Signed in as {} (id {}){}",
                style("OK").green().bold(),
                style(user.display_name()).bold(),
                user.id,
                if user.specialist { ", specialist" } else { "" }
            );
            println!("  Token expires: {}", super::format_instant(diag.expires_at));
            println!(
                "{} Session stored at {}",
                style("[2/2]").bold().dim(),
                config.read().await.effective_session_path()?.display()
            );
            if let Some(path) = save_to {
                println!("  {} Config saved to {}", style("OK").green(), path.display());
            }
        }
    }

    Ok(())
}
