//! chatrelay configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::subscription::PollSettings;

/// Default address the server listens on and clients connect to
pub const DEFAULT_LISTEN: &str = "127.0.0.1:50051";

/// Main chatrelay configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,

    /// Log store configuration
    pub store: StoreConfig,

    /// Subscription polling configuration
    pub subscription: SubscriptionConfig,

    /// Log level (trace, debug, info, warn, error)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Write logs to this file instead of stderr
    #[serde(rename = "log-file")]
    pub log_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: ./chatrelay.yml
        let local_config = PathBuf::from("chatrelay.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/chatrelay/chatrelay.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("chatrelay").join("chatrelay.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read the config before logging is set up
    ///
    /// Follows the same fallback chain as [`Config::load`] but never fails
    /// and never logs. Used to pick up `log-level` and `log-file`.
    pub fn load_early(config_path: Option<&PathBuf>) -> Option<Self> {
        let candidates = match config_path {
            Some(path) => vec![path.clone()],
            None => {
                let mut paths = vec![PathBuf::from("chatrelay.yml")];
                if let Some(config_dir) = dirs::config_dir() {
                    paths.push(config_dir.join("chatrelay").join("chatrelay.yml"));
                }
                paths
            }
        };

        candidates
            .into_iter()
            .filter_map(|path| fs::read_to_string(path).ok())
            .find_map(|content| serde_yaml::from_str::<Self>(&content).ok())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
        }
    }
}

/// Which log store backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Sqlite,
}

/// Log store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Backend kind
    pub backend: StoreBackend,

    /// Database file for the sqlite backend
    pub path: PathBuf,

    /// Stream key messages are appended to
    pub stream: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        // Use XDG data directory (~/.local/share/chatrelay on Linux)
        let path = dirs::data_dir()
            .map(|d| d.join("chatrelay"))
            .unwrap_or_else(|| PathBuf::from(".chatrelay"))
            .join("chat.db");

        Self {
            backend: StoreBackend::Sqlite,
            path,
            stream: "chat".to_string(),
        }
    }
}

/// Subscription polling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    /// Time between polls in milliseconds
    #[serde(rename = "poll-interval-ms")]
    pub poll_interval_ms: u64,

    /// Time a single poll may wait in the store in milliseconds
    #[serde(rename = "block-timeout-ms")]
    pub block_timeout_ms: u64,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            block_timeout_ms: 1,
        }
    }
}

impl SubscriptionConfig {
    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            // A zero period would make the ticker panic
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            block_timeout: Duration::from_millis(self.block_timeout_ms),
        }
    }
}
