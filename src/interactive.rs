//! Line-oriented chat loop with slash commands.

use crate::cli::{OutputFormat, model_listing, render_history, send_streaming, session_line};
use crate::provider::ModelApi;
use crate::session::ConversationStore;
use anyhow::Result;
use std::io::{self, Write};
use tokio::io::{AsyncBufReadExt, BufReader};

const HELP: &str = "\
Commands:
  /new                 start a new conversation
  /sessions            list conversations
  /switch <id>         switch to a conversation (id prefix is enough)
  /delete [id]         delete a conversation (default: current)
  /rename <title>      rename the current conversation
  /model [name]        show or select the model
  /models              list models installed on the server
  /history             show the current conversation
  /help                show this help
  /quit                exit

Ctrl-C cancels a reply in progress; at the prompt it exits.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommand {
    New,
    Sessions,
    Switch(String),
    Delete(Option<String>),
    Rename(String),
    Model(Option<String>),
    Models,
    History,
    Help,
    Quit,
}

impl SlashCommand {
    /// Parse a `/command args` line. `None` if the line is not a command.
    pub fn parse(line: &str) -> Option<Result<Self, String>> {
        let rest = line.trim().strip_prefix('/')?;
        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (rest, ""),
        };
        let arg = (!arg.is_empty()).then(|| arg.to_string());

        let command = match name.to_lowercase().as_str() {
            "new" => Self::New,
            "sessions" | "ls" => Self::Sessions,
            "switch" => match arg {
                Some(id) => Self::Switch(id),
                None => return Some(Err("Usage: /switch <id>".into())),
            },
            "delete" | "rm" => Self::Delete(arg),
            "rename" => match arg {
                Some(title) => Self::Rename(title),
                None => return Some(Err("Usage: /rename <title>".into())),
            },
            "model" => Self::Model(arg),
            "models" => Self::Models,
            "history" => Self::History,
            "help" | "?" => Self::Help,
            "quit" | "exit" | "q" => Self::Quit,
            other => return Some(Err(format!("Unknown command: /{other} (try /help)"))),
        };
        Some(Ok(command))
    }
}

/// Whether the loop should keep going after a command.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Apply a command to the store. Output goes to the returned text.
async fn execute(store: &mut ConversationStore, command: SlashCommand) -> (Flow, String) {
    let output = match command {
        SlashCommand::Quit => return (Flow::Quit, String::new()),
        SlashCommand::Help => HELP.to_string(),
        SlashCommand::New => {
            let session = store.create_session();
            format!("Started {}", session.short_id())
        }
        SlashCommand::Sessions => {
            let active = store.active_id().map(ToString::to_string);
            store
                .sessions()
                .iter()
                .map(|s| session_line(s, active.as_deref() == Some(&s.id)))
                .collect::<Vec<_>>()
                .join("\n")
        }
        SlashCommand::Switch(prefix) => match store.resolve_id(&prefix) {
            Ok(id) => {
                store.set_active(&id);
                match store.active_session() {
                    Some(session) => format!("Switched to {}", session.title),
                    None => format!("Switched to {id}"),
                }
            }
            Err(e) => e.to_string(),
        },
        SlashCommand::Delete(prefix) => {
            let target = match prefix {
                Some(prefix) => store.resolve_id(&prefix),
                None => store
                    .active_id()
                    .map(ToString::to_string)
                    .ok_or_else(|| crate::Error::Session("No active session".into())),
            };
            match target {
                Ok(id) => {
                    store.delete_session(&id);
                    format!("Deleted {id}")
                }
                Err(e) => e.to_string(),
            }
        }
        SlashCommand::Rename(title) => match store.active_id().map(ToString::to_string) {
            Some(id) => {
                store.update_title(&id, title.clone());
                format!("Renamed to {title}")
            }
            None => "No active session".to_string(),
        },
        SlashCommand::Model(None) => store.model().current().to_string(),
        SlashCommand::Model(Some(name)) => {
            store.model_mut().save(name);
            format!("Selected {}", store.model().current())
        }
        SlashCommand::Models => match store.api().list_models().await {
            Ok(models) if models.is_empty() => "No models installed".to_string(),
            Ok(models) => model_listing(&models, store.model()).join("\n"),
            Err(e) => format!("Failed to list models: {}", e.display_message()),
        },
        SlashCommand::History => match store.active_session() {
            Some(session) => render_history(session),
            None => "No active session".to_string(),
        },
    };
    (Flow::Continue, output)
}

fn prompt_marker() -> io::Result<()> {
    let mut stdout = io::stdout();
    write!(stdout, "> ")?;
    stdout.flush()
}

/// Run the interactive loop until `/quit`, end of input, or Ctrl-C at the prompt.
pub async fn run(mut store: ConversationStore) -> Result<()> {
    if let Some(session) = store.active_session() {
        println!(
            "nexus ({}, {:?} mode). Session: {}. Type /help for commands.",
            store.model().current(),
            store.mode(),
            session.title
        );
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        prompt_marker()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        };
        let Some(line) = line else {
            println!();
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match SlashCommand::parse(line) {
            Some(Ok(command)) => {
                let (flow, output) = execute(&mut store, command).await;
                if !output.is_empty() {
                    println!("{output}");
                }
                if flow == Flow::Quit {
                    break;
                }
            }
            Some(Err(message)) => println!("{message}"),
            None => {
                let (result, printed) = send_streaming(&mut store, line, OutputFormat::Text).await;
                match result {
                    Ok(reply) => {
                        if !printed {
                            print!("{reply}");
                        }
                        println!("\n");
                    }
                    Err(e) if e.is_cancelled() => println!("\n[cancelled]\n"),
                    Err(e) => {
                        if printed {
                            println!();
                        }
                        eprintln!("Error: {}\n", e.display_message());
                    }
                }
            }
        }
    }

    tracing::debug!("Interactive session ended");
    Ok(())
}
