//! Helpdesk CLI - terminal client for the helpdesk realtime channel.
//!
//! Signs in against the helpdesk API, keeps the session on disk, and
//! streams the realtime feed (notifications, presence, assignments, ticket
//! updates and chat) to the terminal.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use hd_core::config::{AppConfig, ConfigHandle};
use hd_core::error::HdResult;
use hd_core::logging;

/// Helpdesk - realtime support desk client.
#[derive(Parser)]
#[command(
    name = "helpdesk",
    version,
    about = "Helpdesk realtime client CLI",
    long_about = "A command-line client for the helpdesk dashboard.\n\
                   Sign in once, then listen to live ticket, chat and presence events."
)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (text, json).
    #[arg(short = 'f', long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    Text,
    /// JSON output for scripting.
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and store the session.
    Login {
        /// Username (prompted if omitted).
        #[arg(short, long)]
        username: Option<String>,
        /// Password (prompted if omitted).
        #[arg(short, long)]
        password: Option<String>,
        /// API base URL (overrides config).
        #[arg(short, long)]
        server: Option<String>,
        /// Save the server address to the config file.
        #[arg(long)]
        save: bool,
    },
    /// Sign out and remove the stored session.
    Logout,
    /// Show the session, token schedule and connection settings.
    Status,
    /// Connect and print realtime events until Ctrl+C.
    Listen {
        /// Ticket ids whose updates and chat to follow.
        #[arg(short, long = "ticket", value_delimiter = ',')]
        tickets: Vec<i64>,
        /// Support line ids whose presence changes to follow.
        #[arg(short, long = "line", value_delimiter = ',')]
        lines: Vec<i64>,
    },
    /// Post a chat message to a ticket.
    Send {
        /// Ticket id.
        ticket: i64,
        /// Message text.
        content: String,
        /// Post as an internal note (not visible to the requester).
        #[arg(long)]
        internal: bool,
    },
}

fn load_config(path: Option<&PathBuf>) -> HdResult<(AppConfig, PathBuf)> {
    let path = match path {
        Some(p) => p.clone(),
        None => AppConfig::default_config_path()?,
    };
    let config = if path.exists() {
        AppConfig::load_from_file(&path)?
    } else {
        AppConfig::default()
    };
    Ok((config, path))
}

#[tokio::main]
async fn main() -> HdResult<()> {
    let cli = Cli::parse();

    let (config, config_path) = load_config(cli.config.as_ref())?;

    let log_level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    let log_dir = config.effective_log_dir()?;
    let _guard = logging::init_logging(&log_level, &log_dir, config.logging.json_output)?;

    info!("Helpdesk CLI v{}", hd_core::constants::APP_VERSION);

    let config_handle = ConfigHandle::new(config);

    match cli.command {
        Commands::Login { username, password, server, save } => {
            let save_to = save.then_some(config_path);
            commands::login::run(config_handle, username, password, server, save_to, cli.format).await
        }
        Commands::Logout => commands::logout::run(config_handle, cli.format).await,
        Commands::Status => commands::status::run(config_handle, cli.format).await,
        Commands::Listen { tickets, lines } => {
            commands::listen::run(config_handle, tickets, lines, cli.format).await
        }
        Commands::Send { ticket, content, internal } => {
            commands::send::run(config_handle, ticket, content, internal, cli.format).await
        }
    }
}
