//! dockline - watch a console chat session from the terminal.

use anyhow::Result;
use clap::Parser;
use dockline_cli::config::Config;
use dockline_cli::logging::{self, LogConfig, LogFormat};
use dockline_client::{ChatClient, ClientEvent};
use dockline_types::{ChatMessage, ChatRole, SessionId};
use std::path::PathBuf;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

/// Terminal watcher for the console's realtime chat channel.
#[derive(Parser, Debug)]
#[command(name = "dockline")]
#[command(about = "Watch a console chat session from the terminal")]
#[command(version)]
struct Cli {
    /// Path to config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override backend origin, e.g. ws://console.local:8080
    #[arg(short, long)]
    server: Option<String>,

    /// Override user id from config
    #[arg(short, long)]
    user: Option<String>,

    /// Session to watch; subscribed automatically on every (re)connect
    #[arg(long, value_name = "ID")]
    session: Option<SessionId>,

    /// Enable verbose logging (INFO level for most targets)
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging (DEBUG level, excludes ping traces)
    #[arg(short, long)]
    debug: bool,

    /// Enable trace logging (TRACE level for everything)
    #[arg(long)]
    trace: bool,

    /// Quiet mode (WARN and ERROR only)
    #[arg(short, long)]
    quiet: bool,

    /// Set log level for specific targets (e.g., "router=debug" or
    /// "ws::ping=trace"). Can be specified multiple times. Targets are
    /// prefixed with "dockline::" automatically.
    #[arg(long = "log", value_name = "TARGET=LEVEL")]
    log_overrides: Vec<String>,

    /// Log output format
    #[arg(long = "log-format", value_name = "FORMAT", default_value = "text")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = LogConfig::from_cli(
        cli.verbose,
        cli.debug,
        cli.trace,
        cli.quiet,
        cli.log_overrides,
        cli.log_format,
    );
    logging::init(&log_config);

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(server) = cli.server {
        config.server_url = server;
    }
    if let Some(user) = cli.user {
        config.user_id = user;
    }

    tracing::info!(
        target: "dockline::startup",
        "Watching {} as {}", config.server_url, config.user_id
    );

    let client = ChatClient::new(config.client_config());
    let mut events = BroadcastStream::new(client.subscribe_events());

    if let Some(session) = cli.session {
        client.set_active_session(Some(session));
    }

    if let Err(e) = client.connect(&config.user_id).await {
        tracing::warn!(
            target: "dockline::startup",
            "Initial connection failed: {} (retrying in background)", e
        );
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Some(event) = events.next() => match event {
                Ok(event) => print_event(event),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        target: "dockline::startup",
                        "Event stream lagged; skipped {} events", skipped
                    );
                }
            },
        }
    }

    client.disconnect();
    Ok(())
}

fn print_event(event: ClientEvent) {
    match event {
        ClientEvent::Connected { user_id } => println!("* connected as {user_id}"),
        ClientEvent::Disconnected { code } => println!("* disconnected (code {code})"),
        ClientEvent::Reconnecting { attempt, delay } => {
            println!("* reconnecting in {delay:?} (attempt {attempt})");
        }
        ClientEvent::ReconnectsExhausted => {
            println!("* gave up reconnecting; restart dockline to retry");
        }
        ClientEvent::MessageAdded(message) => print_message(&message),
        ClientEvent::StreamCompleted { message_id, text } => {
            println!("* response {message_id} complete ({} chars)", text.len());
        }
        ClientEvent::TypingChanged {
            user_id, is_typing, ..
        } => {
            if is_typing {
                println!("* {user_id} is typing...");
            }
        }
        ClientEvent::ReadReceiptRecorded { .. } => {}
        ClientEvent::TaskUpdated(task) => {
            println!(
                "* task {} [{:>3.0}%] {}",
                task.task_id, task.progress, task.message
            );
        }
    }
}

fn print_message(message: &ChatMessage) {
    let role = match message.role {
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
        ChatRole::System => "system",
    };
    println!(
        "[{}] {}: {}",
        message.timestamp.format("%H:%M:%S"),
        role,
        message.text
    );
}
