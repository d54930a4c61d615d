//! Interactive chat session.

use crate::commands::{format_bytes, format_event};
use colored::Colorize;
use framechat_client::{Client, ClientEvent, ClientEventReceiver};
use framechat_protocol::{Disposition, OfferId, Resolution};
use parking_lot::Mutex;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};
use std::path::PathBuf;
use std::sync::Arc;

const HELP_TEXT: &str = r#"
Plain lines are sent as messages.

Commands:
  /attach <path>             Send a file
  /accept [offer] [path]     Save an attachment (latest offer by default)
  /discard [offer]           Drop an attachment
  /offers                    List pending attachments
  /id                        Show the identity the server assigned
  /help                      Show this help
  /quit                      Leave the chat
"#;

/// A parsed line of chat input.
#[derive(Debug, PartialEq, Eq)]
enum ChatCommand<'a> {
    Message(&'a str),
    Attach(PathBuf),
    Accept {
        offer: Option<OfferId>,
        path: Option<PathBuf>,
    },
    Discard(Option<OfferId>),
    Offers,
    Identity,
    Help,
    Quit,
    Invalid(String),
}

/// Splits an optional leading offer id off the arguments.
fn split_offer(args: &str) -> (Option<OfferId>, &str) {
    let (first, rest) = args.split_once(char::is_whitespace).unwrap_or((args, ""));
    match first.parse::<OfferId>() {
        Ok(id) => (Some(id), rest.trim()),
        Err(_) => (None, args),
    }
}

fn parse_line(line: &str) -> ChatCommand<'_> {
    let Some(command) = line.strip_prefix('/') else {
        return ChatCommand::Message(line);
    };
    // "//text" sends a message starting with a slash
    if command.starts_with('/') {
        return ChatCommand::Message(command);
    }

    let (name, args) = command
        .split_once(char::is_whitespace)
        .map(|(name, args)| (name, args.trim()))
        .unwrap_or((command, ""));

    match name.to_lowercase().as_str() {
        "attach" | "a" => {
            if args.is_empty() {
                ChatCommand::Invalid("Usage: /attach <path>".to_string())
            } else {
                ChatCommand::Attach(PathBuf::from(args))
            }
        }
        "accept" => {
            let (offer, rest) = split_offer(args);
            let path = (!rest.is_empty()).then(|| PathBuf::from(rest));
            ChatCommand::Accept { offer, path }
        }
        "discard" => match split_offer(args) {
            (offer, "") => ChatCommand::Discard(offer),
            _ => ChatCommand::Invalid("Usage: /discard [offer]".to_string()),
        },
        "offers" => ChatCommand::Offers,
        "id" | "whoami" => ChatCommand::Identity,
        "help" | "?" => ChatCommand::Help,
        "quit" | "exit" | "q" => ChatCommand::Quit,
        _ => ChatCommand::Invalid(format!(
            "Unknown command: /{}. Type /help for help.",
            name
        )),
    }
}

pub async fn run(
    client: Client,
    mut events: ClientEventReceiver,
    address: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "framechat".bold().cyan());
    println!("Connecting to {}...", address);

    client.connect().await?;
    println!("{}", "Connected!".green());

    // Offers in arrival order; the last one is the default target
    let offers: Arc<Mutex<Vec<OfferId>>> = Arc::new(Mutex::new(Vec::new()));

    let printer = {
        let offers = offers.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let ClientEvent::AttachmentOffered(offer) = &event {
                    offers.lock().push(offer.id);
                }
                println!("{}", format_event(&event));
            }
        })
    };

    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(config)?;

    let history_path = home::home_dir()
        .map(|home| home.join(".framechat_history"))
        .unwrap_or_else(|| ".framechat_history".into());
    let _ = rl.load_history(&history_path);

    println!("Type /help for available commands.\n");

    loop {
        let prompt = format!("{} ", "framechat>".cyan());
        // Keep the runtime's other workers free while waiting on the terminal
        match tokio::task::block_in_place(|| rl.readline(&prompt)) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match execute_chat_command(&client, &offers, parse_line(line)).await {
                    Ok(Some(output)) if output.is_empty() => {}
                    Ok(Some(output)) => println!("{}", output),
                    Ok(None) => break,
                    Err(e) => println!("{}: {}", "Error".red(), e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                println!("{}: {:?}", "Error".red(), err);
                break;
            }
        }
    }

    let _ = rl.save_history(&history_path);

    client.close().await;
    printer.abort();
    println!("{}", "Disconnected.".dimmed());

    Ok(())
}

/// Picks the requested offer, or the most recent one.
fn target_offer(offers: &Mutex<Vec<OfferId>>, requested: Option<OfferId>) -> Option<OfferId> {
    requested.or_else(|| offers.lock().last().copied())
}

async fn execute_chat_command(
    client: &Client,
    offers: &Mutex<Vec<OfferId>>,
    command: ChatCommand<'_>,
) -> Result<Option<String>, Box<dyn std::error::Error>> {
    match command {
        ChatCommand::Message(text) => {
            client.send_message(text).await?;
            Ok(Some(String::new()))
        }

        ChatCommand::Attach(path) => {
            client.send_file(&path).await?;
            Ok(Some(format!(
                "{} {}",
                "Sent".green(),
                path.display().to_string().cyan()
            )))
        }

        ChatCommand::Accept { offer, path } => {
            let Some(id) = target_offer(offers, offer) else {
                return Ok(Some("No pending attachments".yellow().to_string()));
            };
            let Some(pending) = client.pending_offer(id) else {
                return Ok(Some(format!("No pending attachment #{}", id)));
            };
            let path = path.unwrap_or_else(|| client.save_path_for(&pending));

            let resolution = client
                .resolve_attachment(id, Disposition::Accept(path))
                .await?;
            offers.lock().retain(|o| *o != id);
            match resolution {
                Resolution::Saved { path, bytes } => Ok(Some(format!(
                    "{} {} ({})",
                    "Saved".green(),
                    path.display().to_string().cyan(),
                    format_bytes(bytes as u64)
                ))),
                Resolution::Discarded => Ok(Some(format!("{} #{}", "Discarded".yellow(), id))),
            }
        }

        ChatCommand::Discard(offer) => {
            let Some(id) = target_offer(offers, offer) else {
                return Ok(Some("No pending attachments".yellow().to_string()));
            };
            client.resolve_attachment(id, Disposition::Discard).await?;
            offers.lock().retain(|o| *o != id);
            Ok(Some(format!("{} #{}", "Discarded".yellow(), id)))
        }

        ChatCommand::Offers => {
            let ids = offers.lock().clone();
            let mut output = String::new();
            for id in ids {
                if let Some(offer) = client.pending_offer(id) {
                    output.push_str(&format!(
                        "  #{} {} ({})\n",
                        id,
                        offer.file_name.cyan(),
                        format_bytes(offer.size)
                    ));
                }
            }
            if output.is_empty() {
                Ok(Some("No pending attachments".yellow().to_string()))
            } else {
                Ok(Some(output.trim_end().to_string()))
            }
        }

        ChatCommand::Identity => Ok(Some(match client.identity() {
            Some(id) => format!("You are peer {}", id.to_string().cyan()),
            None => "No identity assigned yet".yellow().to_string(),
        })),

        ChatCommand::Help => Ok(Some(HELP_TEXT.to_string())),

        ChatCommand::Quit => Ok(None),

        ChatCommand::Invalid(usage) => Ok(Some(usage)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_lines_are_messages() {
        assert_eq!(parse_line("hello there"), ChatCommand::Message("hello there"));
        assert_eq!(parse_line("//not a command"), ChatCommand::Message("/not a command"));
    }

    #[test]
    fn test_attach() {
        assert_eq!(
            parse_line("/attach my file.txt"),
            ChatCommand::Attach(PathBuf::from("my file.txt"))
        );
        assert!(matches!(parse_line("/attach"), ChatCommand::Invalid(_)));
    }

    #[test]
    fn test_accept_variants() {
        assert_eq!(
            parse_line("/accept"),
            ChatCommand::Accept {
                offer: None,
                path: None
            }
        );
        assert_eq!(
            parse_line("/accept #3"),
            ChatCommand::Accept {
                offer: Some(OfferId(3)),
                path: None
            }
        );
        assert_eq!(
            parse_line("/accept 3 /tmp/out.bin"),
            ChatCommand::Accept {
                offer: Some(OfferId(3)),
                path: Some(PathBuf::from("/tmp/out.bin"))
            }
        );
        assert_eq!(
            parse_line("/accept saved.txt"),
            ChatCommand::Accept {
                offer: None,
                path: Some(PathBuf::from("saved.txt"))
            }
        );
    }

    #[test]
    fn test_discard_and_misc() {
        assert_eq!(parse_line("/discard"), ChatCommand::Discard(None));
        assert_eq!(parse_line("/discard 7"), ChatCommand::Discard(Some(OfferId(7))));
        assert!(matches!(parse_line("/discard 7 extra"), ChatCommand::Invalid(_)));
        assert_eq!(parse_line("/ID"), ChatCommand::Identity);
        assert_eq!(parse_line("/quit"), ChatCommand::Quit);
        assert!(matches!(parse_line("/bogus"), ChatCommand::Invalid(_)));
    }

    #[test]
    fn test_target_offer_defaults_to_latest() {
        let offers = Mutex::new(vec![OfferId(1), OfferId(4)]);
        assert_eq!(target_offer(&offers, None), Some(OfferId(4)));
        assert_eq!(target_offer(&offers, Some(OfferId(1))), Some(OfferId(1)));
        assert_eq!(target_offer(&Mutex::new(Vec::new()), None), None);
    }
}
