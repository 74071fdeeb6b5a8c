//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

/// chatrelay - relay chat messages through an append-only log
#[derive(Parser)]
#[command(
    name = "cr",
    about = "Publish, replay and stream chat messages through an append-only log",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Relay server address for client commands (overrides config)
    #[arg(short, long, global = true, help = "Relay server address (host:port)")]
    pub addr: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the relay server until SIGINT/SIGTERM
    Serve {
        /// Address to listen on (overrides config)
        #[arg(long)]
        listen: Option<String>,
    },

    /// Publish a message
    Send {
        /// Sender name
        name: String,

        /// Message body
        message: String,
    },

    /// Print every message in the log
    History {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Stream new messages until Ctrl-C
    Watch {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show the number of live subscriptions
    Count {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

impl Command {
    /// Whether this command runs the server (as opposed to a client call)
    pub fn is_server(&self) -> bool {
        matches!(self, Command::Serve { .. })
    }
}

/// Output format for client commands
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}
