//! Configuration
//!
//! JSON configuration for the feed engine. Every field has a default, so an empty
//! object is a valid configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::classifier::DEFAULT_SUMMARY_LENGTH;
use crate::ledger::{expand_path, NodeConfig};
use crate::store::{CacheError, MemoryStore, PersistentStore, RedbStore, RedisStore, DEFAULT_NAMESPACE};

/// Default location of the redb cache file
pub const DEFAULT_CACHE_PATH: &str = "~/.lifefeed/cache.redb";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Persistent layer behind the local cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CacheBackend {
    Memory,
    Redb { path: String },
    Redis { url: String, namespace: String },
}

impl Default for CacheBackend {
    fn default() -> Self {
        CacheBackend::Redb {
            path: DEFAULT_CACHE_PATH.to_string(),
        }
    }
}

impl CacheBackend {
    /// Open the configured store, creating parent directories for redb files
    pub async fn open(&self) -> Result<Arc<dyn PersistentStore>, CacheError> {
        match self {
            CacheBackend::Memory => Ok(Arc::new(MemoryStore::new())),
            CacheBackend::Redb { path } => {
                let path = PathBuf::from(expand_path(path));
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| CacheError::Storage(e.to_string()))?;
                }
                Ok(Arc::new(RedbStore::open(&path)?))
            }
            CacheBackend::Redis { url, namespace } => {
                let namespace = if namespace.is_empty() {
                    DEFAULT_NAMESPACE
                } else {
                    namespace.as_str()
                };
                Ok(Arc::new(RedisStore::connect(url, namespace).await?))
            }
        }
    }
}

/// Sources merged into the home feed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Following {
    pub users: Vec<Address>,
    pub topics: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FeedConfig {
    pub node: NodeConfig,
    /// LifeChain contract; logs from other contracts are ignored when set
    pub contract_address: Option<Address>,
    pub cache: CacheBackend,
    /// Summary budget in characters
    pub summary_length: usize,
    pub following: Following,
    /// Account whose notifications are shown
    pub account: Option<Address>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            node: NodeConfig::default(),
            contract_address: None,
            cache: CacheBackend::default(),
            summary_length: DEFAULT_SUMMARY_LENGTH,
            following: Following::default(),
            account: None,
        }
    }
}

impl FeedConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load from a JSON file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_json(&json)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }
}
