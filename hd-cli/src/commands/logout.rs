//! Logout command - end the stored session.

use console::style;
use serde_json::json;

use hd_core::config::ConfigHandle;
use hd_core::error::HdResult;

use crate::OutputFormat;

/// Run the logout command.
pub async fn run(config: ConfigHandle, format: OutputFormat) -> HdResult<()> {
    let lifecycle = super::create_lifecycle(&config).await?;

    let Some(user) = lifecycle.restore().await? else {
        match format {
            OutputFormat::Json => super::print_json(&json!({ "signed_out": false })),
            OutputFormat::Text => println!("  Not signed in."),
        }
        lifecycle.shutdown().await;
        return Ok(());
    };

    lifecycle.logout().await;
    lifecycle.shutdown().await;

    match format {
        OutputFormat::Json => super::print_json(&json!({
            "signed_out": true,
            "user_id": user.id,
        })),
        OutputFormat::Text => println!(
            "  {} Signed out {}.",
            style("OK").green().bold(),
            style(user.display_name()).bold()
        ),
    }
    Ok(())
}
