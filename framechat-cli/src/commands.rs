//! One-shot commands and event formatting.

use crate::Commands;
use colored::Colorize;
use framechat_client::{Client, ClientEvent};
use std::time::Duration;

/// How long a one-shot command waits for the server's descriptor.
const IDENTITY_WAIT: Duration = Duration::from_secs(5);

/// Executes a one-shot command and returns the formatted output.
pub async fn execute(client: &Client, cmd: Commands) -> Result<String, Box<dyn std::error::Error>> {
    let identity = client.wait_for_identity(IDENTITY_WAIT).await;
    let sender = match identity {
        Some(id) => format!("peer {}", id),
        None => "unknown peer".to_string(),
    };

    match cmd {
        Commands::Chat => unreachable!(),

        Commands::Send { text } => {
            let text = text.join(" ");
            client.send_message(&text).await?;
            Ok(format!(
                "{} message ({}) as {}",
                "Sent".green(),
                format_bytes(text.len() as u64),
                sender.cyan()
            ))
        }

        Commands::Attach { path } => {
            let size = tokio::fs::metadata(&path).await?.len();
            client.send_file(&path).await?;
            Ok(format!(
                "{} {} ({}) as {}",
                "Sent".green(),
                path.display().to_string().cyan(),
                format_bytes(size),
                sender.cyan()
            ))
        }
    }
}

/// Renders a client event for the terminal.
pub fn format_event(event: &ClientEvent) -> String {
    match event {
        ClientEvent::IdentityAssigned(id) => {
            format!("{} {}", "Assigned identity".green(), id.to_string().cyan())
        }
        ClientEvent::MessageReceived { text } => format!("{} {}", "server>".bold().cyan(), text),
        ClientEvent::AttachmentOffered(offer) => format!(
            "{} #{}: {} ({}). Use /accept {} [path] or /discard {}",
            "Attachment".yellow(),
            offer.id,
            offer.file_name.cyan(),
            format_bytes(offer.size),
            offer.id,
            offer.id
        ),
        ClientEvent::ConnectionError { kind, message } => {
            format!("{} ({}): {}", "Connection error".red(), kind, message)
        }
        ClientEvent::Disconnected => "Disconnected from server.".dimmed().to_string(),
    }
}

/// Formats bytes as human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes >= 1024 * 1024 * 1024 {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    } else if bytes >= 1024 * 1024 {
        format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.2} KB", bytes as f64 / 1024.0)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(10), "10 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.00 MB");
    }

    #[test]
    fn test_format_message_event() {
        colored::control::set_override(false);
        let event = ClientEvent::MessageReceived {
            text: "hello".to_string(),
        };
        assert_eq!(format_event(&event), "server> hello");
    }
}
