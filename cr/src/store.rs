//! Log store construction from configuration

use std::sync::Arc;

use eyre::{Context, Result};
use logstore::{LogStore, MemoryLogStore, SqliteLogStore};
use tracing::info;

use crate::config::{StoreBackend, StoreConfig};

/// Open the configured log store
pub fn create_store(config: &StoreConfig) -> Result<Arc<dyn LogStore>> {
    match config.backend {
        StoreBackend::Memory => {
            info!("Using in-memory log store");
            Ok(Arc::new(MemoryLogStore::new()))
        }
        StoreBackend::Sqlite => {
            let store = SqliteLogStore::open(&config.path)
                .context(format!("Failed to open log store at {}", config.path.display()))?;
            info!(path = %config.path.display(), "Using sqlite log store");
            Ok(Arc::new(store))
        }
    }
}
