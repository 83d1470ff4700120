//! Aggregate configuration for a collaboration process.
//!
//! Every field has a default, so a config file only names what it changes:
//!
//! ```json
//! { "disk": { "debounceMs": 500 }, "manager": { "historyLimit": 1000 } }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::client::ClientConfig;
use crate::disk::DiskConfig;
use crate::manager::ManagerConfig;
use crate::storage::StoreConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Configuration of every component, loadable from JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CollabConfig {
    pub disk: DiskConfig,
    pub manager: ManagerConfig,
    pub client: ClientConfig,
    /// RocksDB settings. `None` keeps documents in memory.
    pub store: Option<StoreConfig>,
}

impl CollabConfig {
    pub fn for_testing() -> Self {
        Self {
            disk: DiskConfig::for_testing(),
            manager: ManagerConfig::for_testing(),
            client: ClientConfig::for_testing(),
            store: None,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }
}
