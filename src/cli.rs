//! Command line surface: argument parsing, setup, and the one-shot commands.

use crate::config::Config;
use crate::model::ModelSelection;
use crate::provider::{ModelApi, OllamaClient, ReasoningFilter, StreamEvent};
use crate::session::{ConversationStore, PromptMode, SendOptions, Session};
use crate::storage::StorageFacade;
use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::io::{self, Read, Write};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Exit code for a request aborted with Ctrl-C.
const EXIT_CANCELLED: u8 = 3;

/// Chat with local Ollama models from the terminal
#[derive(Parser, Debug)]
#[command(name = "nexus", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Keep everything in memory for this run
    #[arg(long, global = true)]
    pub ephemeral: bool,

    /// Request style (overrides config)
    #[arg(long, value_enum, global = true)]
    pub mode: Option<PromptMode>,

    /// Debug logging to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send one message and print the reply
    Run(RunArgs),
    /// List models installed on the server
    Models,
    /// Show or set the selected model
    Model(ModelArgs),
    /// Inspect and manage saved conversations
    Sessions(SessionsArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// The message to send (use "-" to read from stdin)
    #[arg(required = true)]
    pub prompt: String,

    /// Start a new conversation instead of continuing the active one
    #[arg(long, conflicts_with = "session")]
    pub new: bool,

    /// Continue a specific conversation (id or unique prefix)
    #[arg(short, long)]
    pub session: Option<String>,

    /// Output format
    #[arg(short = 'o', long, default_value = "text", value_enum)]
    pub output_format: OutputFormat,
}

#[derive(Parser, Debug, Clone)]
pub struct ModelArgs {
    /// Model to select; prints the current one if omitted
    pub name: Option<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct SessionsArgs {
    #[command(subcommand)]
    pub action: Option<SessionsAction>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SessionsAction {
    /// List conversations, newest first
    List,
    /// Print a conversation's messages
    Show {
        /// Session id or unique prefix
        id: String,
    },
    /// Delete a conversation
    Delete {
        /// Session id or unique prefix
        id: String,
    },
    /// Rename a conversation
    Rename {
        /// Session id or unique prefix
        id: String,
        /// New title
        title: String,
    },
    /// Delete every conversation
    Clear,
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    StreamJson,
}

/// JSON output structure for json/stream-json modes
#[derive(Serialize)]
#[serde(tag = "type")]
enum JsonEvent {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },
    #[serde(rename = "done")]
    Done {
        session: String,
        model: String,
        response: String,
    },
    #[serde(rename = "error")]
    Error { message: String },
}

impl JsonEvent {
    fn from_error(e: &crate::Error) -> Self {
        Self::Error {
            message: e.display_message(),
        }
    }
}

/// Set up logging to stderr. `NEXUS_LOG` picks the filter; `-v` forces debug.
pub fn init_tracing(verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::new("nexus_chat=debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_env("NEXUS_LOG")
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Everything a command needs, built from config and global flags.
pub struct ChatContext {
    pub config: Config,
    pub client: Arc<OllamaClient>,
    pub store: ConversationStore,
}

impl ChatContext {
    pub fn open(cli: &Cli) -> Result<Self> {
        let config = Config::load()?;

        let storage = if cli.ephemeral {
            StorageFacade::in_memory()
        } else {
            StorageFacade::open(&config.state_db_path())?
        };

        let client = Arc::new(
            OllamaClient::new(&config.ollama_host)?
                .with_default_model(config.default_model.clone())
                .with_sampling(config.temperature, config.num_predict),
        );

        let model = ModelSelection::load_with_default(storage.clone(), &config.default_model);
        let store = ConversationStore::new(storage, client.clone(), model)
            .with_mode(cli.mode.unwrap_or(config.prompt_mode))
            .with_system_prompt(config.system_prompt.clone());

        tracing::debug!(
            host = %client.base_url(),
            model = store.model().current(),
            ephemeral = cli.ephemeral,
            "Context ready"
        );

        Ok(Self {
            config,
            client,
            store,
        })
    }
}

/// Cancel `token` on the first Ctrl-C. Abort the handle once the request ends.
pub(crate) fn cancel_on_ctrl_c(token: &CancellationToken) -> tokio::task::JoinHandle<()> {
    let token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    })
}

/// Trims streamed text the way the stored reply is trimmed.
///
/// Leading whitespace is dropped. Trailing whitespace is held until more
/// text follows it, so a stream that ends in blanks never prints them.
#[derive(Debug, Default)]
struct TrimmedOutput {
    started: bool,
    held: String,
}

impl TrimmedOutput {
    /// Feed visible text, returning the part that is safe to print.
    fn push(&mut self, text: &str) -> String {
        let text = if self.started { text } else { text.trim_start() };
        self.held.push_str(text);
        let keep = self.held.trim_end().len();
        if keep == 0 {
            return String::new();
        }
        self.started = true;
        self.held.drain(..keep).collect()
    }
}

/// Print text deltas as they arrive, hiding reasoning blocks.
///
/// Returns whether anything visible was printed.
pub(crate) async fn print_stream(
    mut rx: mpsc::Receiver<StreamEvent>,
    format: OutputFormat,
) -> io::Result<bool> {
    let mut filter = ReasoningFilter::new();
    let mut output = TrimmedOutput::default();

    while let Some(event) = rx.recv().await {
        let text = match event {
            StreamEvent::TextDelta(delta) => filter.push(&delta),
            StreamEvent::Done => filter.finish(),
        };
        let text = output.push(&text);
        if text.is_empty() {
            continue;
        }

        match format {
            OutputFormat::Text => {
                print!("{text}");
                io::stdout().flush()?;
            }
            OutputFormat::StreamJson => {
                let json = serde_json::to_string(&JsonEvent::TextDelta { text })
                .map_err(io::Error::other)?;
                println!("{json}");
            }
            OutputFormat::Json => {}
        }
    }

    Ok(output.started)
}

/// Send `content` in the active session, streaming according to `format`.
pub(crate) async fn send_streaming(
    store: &mut ConversationStore,
    content: &str,
    format: OutputFormat,
) -> (crate::Result<String>, bool) {
    let (tx, rx) = mpsc::channel(64);
    let printer = tokio::spawn(print_stream(rx, format));
    let token = CancellationToken::new();
    let watcher = cancel_on_ctrl_c(&token);

    let options = SendOptions {
        tx: Some(tx),
        cancel: Some(token),
    };
    let result = store.send_message_with(content, options).await;
    watcher.abort();

    let printed = match printer.await {
        Ok(Ok(printed)) => printed,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Failed writing streamed output");
            false
        }
        Err(e) => {
            tracing::warn!(error = %e, "Stream printer task failed");
            false
        }
    };
    (result, printed)
}

fn read_prompt(arg: &str) -> Result<String> {
    let prompt = if arg == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer.trim().to_string()
    } else {
        arg.trim().to_string()
    };

    if prompt.is_empty() {
        anyhow::bail!("Empty prompt");
    }
    Ok(prompt)
}

/// Run the one-shot `run` command
pub async fn run(cli: &Cli, args: RunArgs) -> ExitCode {
    match run_inner(cli, args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

async fn run_inner(cli: &Cli, args: RunArgs) -> Result<ExitCode> {
    let prompt = read_prompt(&args.prompt)?;
    let ChatContext { mut store, .. } = ChatContext::open(cli)?;

    if args.new {
        store.create_session();
    } else if let Some(ref prefix) = args.session {
        let id = store.resolve_id(prefix)?;
        store.set_active(&id);
    }

    let session = store.active_id().unwrap_or_default().to_string();
    let model = store.model().current().to_string();
    let format = args.output_format;

    let (result, printed) = send_streaming(&mut store, &prompt, format).await;

    match result {
        Ok(reply) => {
            match format {
                OutputFormat::Text => {
                    if !printed {
                        print!("{reply}");
                    }
                    println!();
                }
                OutputFormat::Json => {
                    let json = serde_json::to_string_pretty(&JsonEvent::Done {
                        session,
                        model,
                        response: reply,
                    })?;
                    println!("{json}");
                }
                OutputFormat::StreamJson => {
                    let json = serde_json::to_string(&JsonEvent::Done {
                        session,
                        model,
                        response: reply,
                    })?;
                    println!("{json}");
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            if printed && format == OutputFormat::Text {
                println!();
            }
            match format {
                OutputFormat::Text => eprintln!("Error: {}", e.display_message()),
                OutputFormat::Json | OutputFormat::StreamJson => {
                    let json = serde_json::to_string(&JsonEvent::from_error(&e))?;
                    println!("{json}");
                }
            }
            if e.is_cancelled() {
                Ok(ExitCode::from(EXIT_CANCELLED))
            } else {
                Ok(ExitCode::from(1))
            }
        }
    }
}

/// Model names with the effective one marked.
pub(crate) fn model_listing(models: &[String], selection: &ModelSelection) -> Vec<String> {
    let resolved = selection.resolve_available(models);
    models
        .iter()
        .map(|name| {
            let marker = if Some(name.as_str()) == resolved { "*" } else { " " };
            format!("{marker} {name}")
        })
        .collect()
}

/// Run the `models` command
pub async fn models(cli: &Cli) -> ExitCode {
    let ctx = match ChatContext::open(cli) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(1);
        }
    };

    if !ctx.client.is_available().await {
        eprintln!(
            "Ollama is not reachable at {}. Is `ollama serve` running?",
            ctx.config.ollama_host
        );
        return ExitCode::from(1);
    }

    match ctx.client.list_models().await {
        Ok(models) if models.is_empty() => {
            println!("No models installed. Try `ollama pull {}`.", ctx.store.model().current());
            ExitCode::SUCCESS
        }
        Ok(models) => {
            for line in model_listing(&models, ctx.store.model()) {
                println!("{line}");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Failed to list models: {}", e.display_message());
            ExitCode::from(1)
        }
    }
}

/// Run the `model` command
pub fn model(cli: &Cli, args: ModelArgs) -> ExitCode {
    let mut ctx = match ChatContext::open(cli) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(1);
        }
    };

    match args.name.map(|n| n.trim().to_string()) {
        None => println!("{}", ctx.store.model().current()),
        Some(name) if name.is_empty() => {
            eprintln!("Model name cannot be empty");
            return ExitCode::from(1);
        }
        Some(name) => {
            ctx.store.model_mut().save(name);
            println!("Selected {}", ctx.store.model().current());
        }
    }
    ExitCode::SUCCESS
}

/// One line per session for listings.
pub(crate) fn session_line(session: &Session, active: bool) -> String {
    let marker = if active { "*" } else { " " };
    format!(
        "{marker} {}  {}  {:>3} msgs  {}",
        session.short_id(),
        session.updated_at.format("%Y-%m-%d %H:%M"),
        session.messages.len(),
        session.title
    )
}

/// Transcript of a session for display.
pub(crate) fn render_history(session: &Session) -> String {
    if session.messages.is_empty() {
        return "(no messages)".to_string();
    }
    session
        .messages
        .iter()
        .map(|m| format!("[{}] {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Run the `sessions` command
pub fn sessions(cli: &Cli, args: SessionsArgs) -> ExitCode {
    match sessions_inner(cli, args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

fn sessions_inner(cli: &Cli, args: SessionsArgs) -> Result<()> {
    let ChatContext { mut store, .. } = ChatContext::open(cli)?;

    match args.action.unwrap_or(SessionsAction::List) {
        SessionsAction::List => {
            let active = store.active_id().map(ToString::to_string);
            for session in store.sessions() {
                println!("{}", session_line(session, active.as_deref() == Some(&session.id)));
            }
        }
        SessionsAction::Show { id } => {
            let id = store.resolve_id(&id)?;
            if let Some(session) = store.session(&id) {
                println!("{}\n", session.title);
                println!("{}", render_history(session));
            }
        }
        SessionsAction::Delete { id } => {
            let id = store.resolve_id(&id)?;
            store.delete_session(&id);
            println!("Deleted {id}");
        }
        SessionsAction::Rename { id, title } => {
            let id = store.resolve_id(&id)?;
            store.update_title(&id, title.trim());
            println!("Renamed {id}");
        }
        SessionsAction::Clear => {
            store.clear();
            println!("Cleared all sessions");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::strip_reasoning;
    use crate::provider::test_server::serve_once;
    use crate::session::Message;

    // --- CLI parsing tests ---

    #[test]
    fn test_parse_no_args() {
        let cli = Cli::try_parse_from(["nexus"]).unwrap();
        assert!(cli.command.is_none());
        assert!(!cli.ephemeral);
        assert!(cli.mode.is_none());
        assert!(!cli.verbose);
    }

    #[test]
    fn test_parse_global_flags() {
        let cli = Cli::try_parse_from(["nexus", "--ephemeral", "--mode", "chat", "-v"]).unwrap();
        assert!(cli.ephemeral);
        assert_eq!(cli.mode, Some(PromptMode::Chat));
        assert!(cli.verbose);
    }

    #[test]
    fn test_parse_invalid_mode() {
        assert!(Cli::try_parse_from(["nexus", "--mode", "stream"]).is_err());
    }

    // --- Run command tests ---

    #[test]
    fn test_parse_run_basic() {
        let cli = Cli::try_parse_from(["nexus", "run", "hello"]).unwrap();
        if let Some(Commands::Run(args)) = cli.command {
            assert_eq!(args.prompt, "hello");
            assert!(!args.new);
            assert!(args.session.is_none());
            assert_eq!(args.output_format, OutputFormat::Text);
        } else {
            panic!("Expected Run command");
        }
    }

    #[test]
    fn test_parse_run_with_output_format() {
        let cli = Cli::try_parse_from(["nexus", "run", "-o", "stream-json", "prompt"]).unwrap();
        if let Some(Commands::Run(args)) = cli.command {
            assert_eq!(args.output_format, OutputFormat::StreamJson);
        } else {
            panic!("Expected Run command");
        }
    }

    #[test]
    fn test_parse_run_new_and_session_conflict() {
        let result = Cli::try_parse_from(["nexus", "run", "--new", "-s", "abc", "prompt"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_run_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["nexus", "run", "prompt", "--ephemeral"]).unwrap();
        assert!(cli.ephemeral);
        assert!(cli.command.is_some());
    }

    #[test]
    fn test_parse_run_requires_prompt() {
        assert!(Cli::try_parse_from(["nexus", "run"]).is_err());
    }

    // --- Model and session command tests ---

    #[test]
    fn test_parse_model() {
        let cli = Cli::try_parse_from(["nexus", "model", "gemma3"]).unwrap();
        match cli.command {
            Some(Commands::Model(args)) => assert_eq!(args.name.as_deref(), Some("gemma3")),
            other => panic!("Expected Model command, got {other:?}"),
        }

        let cli = Cli::try_parse_from(["nexus", "model"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Model(ModelArgs { name: None }))));
    }

    #[test]
    fn test_parse_sessions_actions() {
        let cli = Cli::try_parse_from(["nexus", "sessions"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Sessions(SessionsArgs { action: None }))
        ));

        let cli = Cli::try_parse_from(["nexus", "sessions", "rename", "abc", "Trip plans"]).unwrap();
        match cli.command {
            Some(Commands::Sessions(SessionsArgs {
                action: Some(SessionsAction::Rename { id, title }),
            })) => {
                assert_eq!(id, "abc");
                assert_eq!(title, "Trip plans");
            }
            other => panic!("Expected Rename, got {other:?}"),
        }
    }

    // --- Output helpers ---

    #[test]
    fn test_json_event_shape() {
        let json = serde_json::to_value(JsonEvent::Done {
            session: "s1".into(),
            model: "llama3.1".into(),
            response: "Hello!".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "done");
        assert_eq!(json["response"], "Hello!");

        let json = serde_json::to_value(JsonEvent::TextDelta { text: "Hi".into() }).unwrap();
        assert_eq!(json["type"], "text_delta");
    }

    #[test]
    fn test_model_listing_marks_resolved() {
        let selection = ModelSelection::load(StorageFacade::in_memory());
        let models = vec!["gemma3".to_string(), "llama3.1:8b".to_string()];
        assert_eq!(
            model_listing(&models, &selection),
            vec!["  gemma3".to_string(), "* llama3.1:8b".to_string()]
        );
    }

    #[test]
    fn test_session_line() {
        let mut session = Session::new();
        session.title = "Rust questions".into();
        session.push(Message::user("hi"));

        let line = session_line(&session, true);
        assert!(line.starts_with("* "));
        assert!(line.contains(session.short_id()));
        assert!(line.contains("  1 msgs"));
        assert!(line.ends_with("Rust questions"));
        assert!(session_line(&session, false).starts_with("  "));
    }

    #[test]
    fn test_render_history() {
        let mut session = Session::new();
        assert_eq!(render_history(&session), "(no messages)");

        session.push(Message::user("Hi"));
        session.push(Message::assistant("Hello!"));
        assert_eq!(render_history(&session), "[user] Hi\n\n[assistant] Hello!");
    }

    #[tokio::test]
    async fn test_backend_error_body_is_unwrapped_for_display() {
        let (host, handle) = serve_once(404, r#"{"error":"model 'nope' not found"}"#);
        let storage = StorageFacade::in_memory();
        let client = Arc::new(OllamaClient::new(&host).unwrap());
        let mut store =
            ConversationStore::new(storage.clone(), client, ModelSelection::load(storage));

        let err = store.send_message("Hi").await.unwrap_err();
        handle.join().unwrap();

        assert_eq!(err.display_message(), "HTTP 404 Not Found: model 'nope' not found");

        let json = serde_json::to_value(JsonEvent::from_error(&err)).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["message"], "HTTP 404 Not Found: model 'nope' not found");
    }

    #[tokio::test]
    async fn test_print_stream_reports_visible_output() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(StreamEvent::TextDelta("<think>x</think>".into())).await.unwrap();
        tx.send(StreamEvent::Done).await.unwrap();
        drop(tx);
        assert!(!print_stream(rx, OutputFormat::Json).await.unwrap());

        let (tx, rx) = mpsc::channel(8);
        tx.send(StreamEvent::TextDelta("  Hello".into())).await.unwrap();
        drop(tx);
        assert!(print_stream(rx, OutputFormat::Json).await.unwrap());

        let (tx, rx) = mpsc::channel(8);
        tx.send(StreamEvent::TextDelta(" \n ".into())).await.unwrap();
        tx.send(StreamEvent::Done).await.unwrap();
        drop(tx);
        assert!(!print_stream(rx, OutputFormat::Json).await.unwrap());
    }

    fn trimmed(deltas: &[&str]) -> String {
        let mut output = TrimmedOutput::default();
        deltas.iter().map(|d| output.push(d)).collect()
    }

    #[test]
    fn test_trimmed_output_matches_stored_reply() {
        let deltas = ["  Hello", " world  ", "\n"];
        assert_eq!(trimmed(&deltas), "Hello world");
        assert_eq!(trimmed(&deltas), strip_reasoning(&deltas.concat()));
    }

    #[test]
    fn test_trimmed_output_releases_inner_whitespace() {
        assert_eq!(trimmed(&["Hi ", " there"]), "Hi  there");

        let mut output = TrimmedOutput::default();
        assert_eq!(output.push("a \n"), "a");
        assert_eq!(output.push("\t"), "");
        assert_eq!(output.push("b"), " \n\tb");
    }
}
