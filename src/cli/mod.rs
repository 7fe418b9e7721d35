//! Command-line interface parsing and handling
//!
//! This module handles parsing command-line arguments and executing the appropriate commands.

pub mod terminal;

use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::cli::terminal::TerminalTransport;
use crate::core::backend::build_backend;
use crate::core::config::data::path_display;
use crate::core::config::{Config, ConfigOrchestrator};
use crate::core::memory::ConversationStore;
use crate::core::message::ConversationId;
use crate::core::pipeline::{Pipeline, TurnOutcome};
use crate::core::transport::ChatTransport;
use crate::utils::logging::LoggingState;

#[derive(Parser)]
#[command(name = "chatrelay")]
#[command(version)]
#[command(about = "Relay chat turns to a local LLM server and stream the replies")]
#[command(
    long_about = "chatrelay keeps a conversation history, renders it through a prompt template, \
streams the reply from an LLM backend and shows it while it is being generated.\n\n\
Backends (set [backend] kind in the config file):\n\
  openai            OpenAI-compatible chat completions (SSE)\n\
  websocket, ooba   WebSocket streaming API\n\
  buffered          Non-streaming generate endpoint\n\
  cumulative        SSE with cumulative text payloads\n\n\
Chat commands:\n\
  /wipe             Clear the conversation history\n\
  /quit             Leave the chat\n\
  Ctrl+C            Stop the reply being generated"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to the config file (defaults to the platform config directory)
    #[arg(short = 'c', long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Append a transcript of the conversation to the specified file
    #[arg(short = 'l', long, global = true, value_name = "FILE")]
    pub log: Option<PathBuf>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Start an interactive chat (default)
    Chat,
    /// Send one message and print the reply
    Say {
        /// Message to send (multiple words are joined with spaces)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        prompt: Vec<String>,
    },
    /// List the available prompt templates
    Templates,
    /// Show the effective configuration
    Config,
}

/// What a line typed in the interactive chat asks for.
#[derive(Debug, PartialEq, Eq)]
pub enum ChatInput<'a> {
    Empty,
    Quit,
    Wipe,
    Message(&'a str),
}

pub fn parse_chat_input(line: &str) -> ChatInput<'_> {
    match line.trim() {
        "" => ChatInput::Empty,
        "/quit" | "/exit" => ChatInput::Quit,
        "/wipe" => ChatInput::Wipe,
        text => ChatInput::Message(text),
    }
}

pub fn main() -> Result<(), Box<dyn Error>> {
    tokio::runtime::Runtime::new()?.block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let config_path = match args.config {
        Some(path) => path,
        None => Config::default_path()?,
    };
    let orchestrator = ConfigOrchestrator::new(config_path);
    let config = orchestrator.load_with_cache()?;
    init_tracing(config.log_filter());

    match args.command.unwrap_or(Commands::Chat) {
        Commands::Chat => run_chat(&orchestrator, &config, args.log).await,
        Commands::Say { prompt } => run_say(&config, &prompt.join(" "), args.log).await,
        Commands::Templates => {
            print!("{}", format_template_list(&config));
            Ok(())
        }
        Commands::Config => {
            println!("Config file: {}", path_display(orchestrator.path()));
            config.print_all();
            Ok(())
        }
    }
}

fn init_tracing(default_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

/// Template names, one per line, with the active one marked.
pub fn format_template_list(config: &Config) -> String {
    let templates = config.template_set();
    let mut names: Vec<&str> = templates.names().collect();
    names.sort_unstable_by_key(|name| name.to_ascii_lowercase());

    let active = config.active_template();
    let mut out = String::new();
    for name in names {
        let marker = if name.eq_ignore_ascii_case(active) {
            '*'
        } else {
            ' '
        };
        out.push_str(&format!("{marker} {name}\n"));
    }
    out
}

fn build_pipeline(
    config: &Config,
    transport: Arc<dyn ChatTransport>,
    client: reqwest::Client,
) -> Result<Pipeline, Box<dyn Error>> {
    let store = Arc::new(ConversationStore::new(
        config.template_set(),
        config.active_template(),
    ));
    // Fail before the first turn rather than on it.
    store.active_template()?;
    let backend = build_backend(&config.backend, client);
    Ok(Pipeline::new(
        store,
        backend,
        transport,
        config.pipeline_settings(),
    ))
}

async fn run_turn<W: Write + Send>(
    pipeline: &Pipeline,
    transport: &TerminalTransport<W>,
    logging: &LoggingState,
    conversation_id: &ConversationId,
    text: &str,
) -> Result<TurnOutcome, Box<dyn Error>> {
    logging.log_user(text)?;

    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });
    let outcome = pipeline
        .handle_user_turn_until(conversation_id, text, &cancel)
        .await;
    interrupt.abort();
    transport.finish()?;

    match &outcome {
        TurnOutcome::Completed { text } => logging.log_reply(text)?,
        TurnOutcome::Cancelled => println!("(reply stopped)"),
        TurnOutcome::Failed { .. } => {}
    }
    Ok(outcome)
}

/// The next typed line, or `None` at end of input or when `interrupt` fires first.
///
/// Once a turn has listened for Ctrl+C the default SIGINT handler is gone, so
/// the prompt has to watch for it too.
async fn next_chat_line<R, F>(lines: &mut Lines<R>, interrupt: F) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
    F: std::future::Future<Output = io::Result<()>>,
{
    tokio::select! {
        biased;
        signal = interrupt => signal.map(|_| None),
        line = lines.next_line() => line,
    }
}

async fn run_chat(
    orchestrator: &ConfigOrchestrator,
    config: &Config,
    log: Option<PathBuf>,
) -> Result<(), Box<dyn Error>> {
    let client = reqwest::Client::new();
    let transport = Arc::new(TerminalTransport::new(io::stdout()));
    let pipeline = build_pipeline(config, transport.clone(), client.clone())?;
    let logging = LoggingState::new(log)?;
    let conversation_id = ConversationId::new("terminal");

    println!(
        "chatrelay: {} backend at {}, template {}",
        config.backend.kind,
        config.backend.endpoint,
        config.active_template()
    );
    if logging.is_active() {
        println!("Transcript: {}", logging.get_status_string());
    }
    println!("Type /wipe to clear the history, /quit to leave.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("you> ");
        io::stdout().flush()?;
        let Some(line) = next_chat_line(&mut lines, tokio::signal::ctrl_c()).await? else {
            println!();
            break;
        };

        match parse_chat_input(&line) {
            ChatInput::Empty => continue,
            ChatInput::Quit => break,
            ChatInput::Wipe => {
                if pipeline.wipe_history(&conversation_id) {
                    println!("History cleared.");
                } else {
                    println!("Nothing to clear.");
                }
            }
            ChatInput::Message(text) => {
                refresh_backend(orchestrator, &pipeline, &client);
                run_turn(&pipeline, &transport, &logging, &conversation_id, text).await?;
            }
        }
    }
    Ok(())
}

async fn run_say(config: &Config, prompt: &str, log: Option<PathBuf>) -> Result<(), Box<dyn Error>> {
    let transport = Arc::new(TerminalTransport::new(io::stdout()));
    let pipeline = build_pipeline(config, transport.clone(), reqwest::Client::new())?;
    let logging = LoggingState::new(log)?;

    let outcome = run_turn(
        &pipeline,
        &transport,
        &logging,
        &ConversationId::new("say"),
        prompt,
    )
    .await?;
    match outcome {
        TurnOutcome::Failed { error, .. } => Err(error.into()),
        _ => Ok(()),
    }
}

/// Rebuild the backend when the config file changed since it was last read.
fn refresh_backend(orchestrator: &ConfigOrchestrator, pipeline: &Pipeline, client: &reqwest::Client) {
    match orchestrator.reload_if_changed() {
        Ok(Some(config)) => pipeline.set_backend(build_backend(&config.backend, client.clone())),
        Ok(None) => {}
        Err(err) => warn!(%err, "config reload failed; keeping the current backend"),
    }
}
