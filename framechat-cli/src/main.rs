//! framechat-cli - Command-line client for framechat
//!
//! Provides an interactive chat session and one-shot sends.

mod commands;
mod repl;

use clap::{Parser, Subcommand};
use colored::Colorize;
use framechat_client::{Client, ConnectionConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "framechat-cli")]
#[command(about = "Command-line client for the framechat server")]
#[command(version)]
struct Cli {
    /// Server address (host:port)
    #[arg(short, long, env = "FRAMECHAT_SERVER", default_value = "127.0.0.1:8080")]
    server: String,

    /// Directory for accepted attachments (defaults to ~/Downloads)
    #[arg(short, long, env = "FRAMECHAT_DOWNLOAD_DIR")]
    download_dir: Option<PathBuf>,

    /// Connection timeout in seconds
    #[arg(long, default_value = "10")]
    timeout: u64,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive chat session
    Chat,

    /// Send a single message
    Send {
        /// Message text
        #[arg(required = true)]
        text: Vec<String>,
    },

    /// Send a single file as an attachment
    Attach {
        /// File to send
        path: PathBuf,
    },
}

/// Returns `~/Downloads` when it exists, otherwise the working directory.
fn default_download_dir() -> PathBuf {
    home::home_dir()
        .map(|home| home.join("Downloads"))
        .filter(|dir| dir.is_dir())
        .unwrap_or_else(|| PathBuf::from("."))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let download_dir = cli.download_dir.unwrap_or_else(default_download_dir);
    let config = ConnectionConfig::from_address(&cli.server)
        .with_connect_timeout(Duration::from_secs(cli.timeout))
        .with_download_dir(download_dir);
    let address = config.address();
    let (client, events) = Client::new(config);

    match cli.command {
        Some(Commands::Chat) | None => {
            repl::run(client, events, &address).await?;
        }
        Some(cmd) => {
            client.connect().await.map_err(|e| {
                eprintln!("{}: {}", "Connection failed".red(), e);
                e
            })?;

            let result = commands::execute(&client, cmd).await;

            match result {
                Ok(output) => {
                    println!("{}", output);
                }
                Err(e) => {
                    eprintln!("{}: {}", "Error".red(), e);
                    client.close().await;
                    std::process::exit(1);
                }
            }

            client.close().await;
        }
    }

    Ok(())
}
