//! Operator console read from stdin.

use framechat_protocol::{Disposition, OfferId, PeerId, Resolution};
use framechat_server::{Destination, RouteReport, Server, ServerError, ServerEvent};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

const HELP_TEXT: &str = "\
Commands:
  peers                         List connected peers
  say <dest> <text>             Send a message (dest: peer id or 'broadcast')
  attach <dest> <path>          Send a file
  kick <id>                     Disconnect a peer
  accept <offer> [path]         Save a parked attachment
  discard <offer>               Drop a parked attachment
  help                          Show this help
  quit                          Stop the server";

#[derive(Debug, PartialEq, Eq)]
pub enum ConsoleCommand {
    Peers,
    Say { destination: Destination, text: String },
    Attach { destination: Destination, path: PathBuf },
    Kick(PeerId),
    Accept { offer: OfferId, path: Option<PathBuf> },
    Discard(OfferId),
    Help,
    Quit,
    Invalid(String),
}

fn split_word(s: &str) -> (&str, &str) {
    s.split_once(char::is_whitespace)
        .map(|(word, rest)| (word, rest.trim()))
        .unwrap_or((s, ""))
}

pub fn parse(line: &str) -> ConsoleCommand {
    let (name, args) = split_word(line.trim());

    match name.to_lowercase().as_str() {
        "peers" | "ls" => ConsoleCommand::Peers,
        "say" | "send" => {
            let (dest, text) = split_word(args);
            match dest.parse() {
                Ok(destination) if !text.is_empty() => ConsoleCommand::Say {
                    destination,
                    text: text.to_string(),
                },
                Ok(_) => ConsoleCommand::Invalid("Usage: say <dest> <text>".to_string()),
                Err(e) => ConsoleCommand::Invalid(e),
            }
        }
        "attach" => {
            let (dest, path) = split_word(args);
            match dest.parse() {
                Ok(destination) if !path.is_empty() => ConsoleCommand::Attach {
                    destination,
                    path: PathBuf::from(path),
                },
                Ok(_) => ConsoleCommand::Invalid("Usage: attach <dest> <path>".to_string()),
                Err(e) => ConsoleCommand::Invalid(e),
            }
        }
        "kick" => match args.parse() {
            Ok(id) => ConsoleCommand::Kick(id),
            Err(_) => ConsoleCommand::Invalid("Usage: kick <id>".to_string()),
        },
        "accept" => {
            let (offer, path) = split_word(args);
            match offer.parse() {
                Ok(offer) => ConsoleCommand::Accept {
                    offer,
                    path: (!path.is_empty()).then(|| PathBuf::from(path)),
                },
                Err(_) => ConsoleCommand::Invalid("Usage: accept <offer> [path]".to_string()),
            }
        }
        "discard" => match args.parse() {
            Ok(offer) => ConsoleCommand::Discard(offer),
            Err(_) => ConsoleCommand::Invalid("Usage: discard <offer>".to_string()),
        },
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        _ => ConsoleCommand::Invalid(format!("Unknown command: {}. Type 'help' for help.", name)),
    }
}

fn format_report(what: &str, report: &RouteReport) -> String {
    let mut output = format!("{} delivered to {} peer(s)", what, report.delivered.len());
    for failure in &report.failed {
        output.push_str(&format!("\n  failed for peer {}: {}", failure.peer, failure.error));
    }
    output
}

/// Runs a command. Returns `None` when the console should stop.
pub async fn execute(server: &Server, command: ConsoleCommand) -> Result<Option<String>, ServerError> {
    let output = match command {
        ConsoleCommand::Peers => {
            let peers = server.peers();
            if peers.is_empty() {
                "No peers connected".to_string()
            } else {
                peers
                    .iter()
                    .map(|p| {
                        format!(
                            "  {:>5}  {}  since {}",
                            p.id,
                            p.addr,
                            p.connected_at.format("%Y-%m-%d %H:%M:%S")
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
        ConsoleCommand::Say { destination, text } => {
            let report = server.send_message(destination, &text).await?;
            format_report("Message", &report)
        }
        ConsoleCommand::Attach { destination, path } => {
            let report = server.send_file(destination, &path).await?;
            format_report(&path.display().to_string(), &report)
        }
        ConsoleCommand::Kick(id) => {
            server.disconnect(id).await?;
            format!("Disconnected peer {}", id)
        }
        ConsoleCommand::Accept { offer, path } => {
            let pending = server
                .pending_offer(offer)
                .ok_or(framechat_protocol::ProtocolError::OfferNotFound(offer))?;
            let path = path.unwrap_or_else(|| server.save_path_for(&pending));
            match server.resolve_attachment(offer, Disposition::Accept(path)).await? {
                Resolution::Saved { path, bytes } => {
                    format!("Saved {} ({} bytes)", path.display(), bytes)
                }
                Resolution::Discarded => format!("Discarded #{}", offer),
            }
        }
        ConsoleCommand::Discard(offer) => {
            server.resolve_attachment(offer, Disposition::Discard).await?;
            format!("Discarded #{}", offer)
        }
        ConsoleCommand::Help => HELP_TEXT.to_string(),
        ConsoleCommand::Quit => return Ok(None),
        ConsoleCommand::Invalid(usage) => usage,
    };
    Ok(Some(output))
}

/// Renders a server event for the operator.
pub fn format_event(event: &ServerEvent) -> String {
    match event {
        ServerEvent::PeerJoined { id, addr } => format!("* peer {} joined from {}", id, addr),
        ServerEvent::PeerLeft { id } => format!("* peer {} left", id),
        ServerEvent::MessageReceived { from, text } => format!("<{}> {}", from, text),
        ServerEvent::AttachmentOffered(offer) => {
            let from = offer
                .from
                .map(|id| id.to_string())
                .unwrap_or_else(|| "?".to_string());
            format!(
                "* peer {} sent {} ({} bytes). Use 'accept {}' or 'discard {}'",
                from, offer.file_name, offer.size, offer.id, offer.id
            )
        }
        ServerEvent::AttachmentRejected {
            from,
            file_name,
            size,
        } => format!(
            "! peer {} sent {} ({} bytes) but has too many attachments waiting; dropped",
            from, file_name, size
        ),
        ServerEvent::ConnectionError { id, kind, message } => {
            format!("! peer {} error ({}): {}", id, kind, message)
        }
        ServerEvent::Disconnected { id } => format!("* peer {} disconnected", id),
    }
}

/// Reads commands from stdin until `quit`, then shuts the server down.
///
/// End of input stops the console but leaves the server running.
pub async fn run(server: Arc<Server>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::debug!("Console input closed");
                return;
            }
            Err(e) => {
                tracing::warn!("Console read error: {}", e);
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match execute(&server, parse(&line)).await {
            Ok(Some(output)) => println!("{}", output),
            Ok(None) => break,
            Err(e) => println!("Error: {}", e),
        }
    }

    tracing::info!("Shutdown requested from console");
    server.shutdown();
}
