//! chatrelay - chat relay over an append-only log
//!
//! CLI entry point for running the relay server and talking to it.

use std::fs;
use std::path::Path;
use std::pin::pin;

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use futures::StreamExt;
use tracing::{debug, info, warn};

use chatrelay::cli::{Cli, Command, OutputFormat};
use chatrelay::config::Config;
use chatrelay::domain::Message;
use chatrelay::rpc::{RelayClient, RelayServer};
use chatrelay::service::RelayService;
use chatrelay::store::create_store;

fn parse_level(level_str: Option<&str>, default: tracing::Level) -> tracing::Level {
    match level_str.map(|s| s.to_uppercase()) {
        None => default,
        Some(s) => match s.as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to {}", s, default);
                default
            }
        },
    }
}

fn setup_logging(
    cli_log_level: Option<&str>,
    config_log_level: Option<&str>,
    log_file: Option<&Path>,
    default_level: tracing::Level,
) -> Result<()> {
    // Determine log level with priority: CLI --log-level > config file > default
    let level = parse_level(cli_log_level.or(config_log_level), default_level);
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());

    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                fs::create_dir_all(parent).context("Failed to create log directory")?;
            }
            let file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .context("Failed to open log file")?;
            tracing_subscriber::fmt()
                .with_writer(file)
                .with_ansi(false)
                .with_env_filter(filter)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_env_filter(filter)
                .init();
        }
    }

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Peek at the config for logging settings before full config load
    let early = Config::load_early(cli.config.as_ref());
    let config_log_level = early.as_ref().and_then(|c| c.log_level.clone());
    let log_file = early.as_ref().and_then(|c| c.log_file.clone());

    // Client commands print to the terminal, keep their logs quiet by default
    let default_level = if cli.command.is_server() {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };
    setup_logging(
        cli.log_level.as_deref(),
        config_log_level.as_deref(),
        log_file.as_deref(),
        default_level,
    )
    .context("Failed to setup logging")?;

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    let addr = cli.addr.clone().unwrap_or_else(|| config.server.listen.clone());
    let client = RelayClient::new(addr);

    // Dispatch command
    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Serve { listen } => {
            debug!(?listen, "main: matched Serve command");
            cmd_serve(&config, listen).await
        }
        Command::Send { name, message } => {
            debug!(%name, "main: matched Send command");
            cmd_send(&client, &name, &message).await
        }
        Command::History { format } => {
            debug!(%format, "main: matched History command");
            cmd_history(&client, format).await
        }
        Command::Watch { format } => {
            debug!(%format, "main: matched Watch command");
            cmd_watch(&client, format).await
        }
        Command::Count { format } => {
            debug!(%format, "main: matched Count command");
            cmd_count(&client, format).await
        }
    }
}

/// Run the relay server until SIGINT/SIGTERM
async fn cmd_serve(config: &Config, listen: Option<String>) -> Result<()> {
    debug!("cmd_serve: called");
    let store = create_store(&config.store)?;
    let service = RelayService::new(store, &config.store.stream, config.subscription.poll_settings());

    let listen = listen.unwrap_or_else(|| config.server.listen.clone());
    let server = RelayServer::bind(&listen, service).await?;
    let local_addr = server.local_addr()?;
    println!("{} Relay listening on {}", "✓".green(), local_addr.to_string().cyan());

    // Create shutdown channel for the server
    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run(shutdown_rx).await {
            tracing::error!(error = %e, "RelayServer error");
        }
    });

    info!("Relay running. Press Ctrl+C to stop.");

    // Set up signal handlers
    debug!("cmd_serve: setting up signal handlers");
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => {
                debug!("cmd_serve: SIGINT received, initiating shutdown");
                warn!("SIGINT received");
            }
            _ = sigterm.recv() => {
                debug!("cmd_serve: SIGTERM received, initiating shutdown");
                warn!("SIGTERM received");
            }
        }
    }

    #[cfg(not(unix))]
    {
        debug!("cmd_serve: waiting for ctrl_c (non-Unix)");
        tokio::signal::ctrl_c().await?;
        debug!("cmd_serve: ctrl_c received, initiating shutdown");
    }

    info!("Relay shutting down...");
    let _ = shutdown_tx.send(()).await;
    let _ = server_handle.await;
    debug!("cmd_serve: shutdown complete");
    Ok(())
}

/// Publish one message
async fn cmd_send(client: &RelayClient, name: &str, message: &str) -> Result<()> {
    debug!(%name, "cmd_send: called");
    client.publish(name, message).await?;
    println!("{} Sent as {}", "✓".green(), name.cyan());
    Ok(())
}

/// Print the whole backlog
async fn cmd_history(client: &RelayClient, format: OutputFormat) -> Result<()> {
    debug!("cmd_history: called");
    let messages = client.read_backlog().await?;
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&messages)?);
        }
        OutputFormat::Text => {
            if messages.is_empty() {
                println!("No messages yet");
            }
            for message in &messages {
                print_message(message);
            }
        }
    }
    Ok(())
}

/// Stream new messages until Ctrl-C or the server ends the subscription
async fn cmd_watch(client: &RelayClient, format: OutputFormat) -> Result<()> {
    debug!("cmd_watch: called");
    let subscription = client.subscribe().await?;
    if format == OutputFormat::Text {
        println!("Watching {} (Ctrl+C to stop)", client.addr().cyan());
    }

    let mut batches = pin!(subscription.into_stream());
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                debug!("cmd_watch: ctrl_c received");
                break;
            }
            batch = batches.next() => {
                match batch {
                    Some(Ok(messages)) => {
                        for message in &messages {
                            match format {
                                OutputFormat::Json => println!("{}", serde_json::to_string(message)?),
                                OutputFormat::Text => print_message(message),
                            }
                        }
                    }
                    Some(Err(e)) => return Err(e),
                    None => {
                        warn!("Server closed the subscription");
                        break;
                    }
                }
            }
        }
    }
    Ok(())
}

/// Print the number of live subscriptions
async fn cmd_count(client: &RelayClient, format: OutputFormat) -> Result<()> {
    debug!("cmd_count: called");
    let count = client.active_subscription_count().await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::json!({ "count": count })),
        OutputFormat::Text => println!("Active subscriptions: {}", count.to_string().bold()),
    }
    Ok(())
}

fn print_message(message: &Message) {
    println!("{}: {}", message.sender.cyan(), message.body);
}
