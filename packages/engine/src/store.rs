//! Persistent Stores
//!
//! Backends behind `LocalCache`. Entries are JSON encodings of `RawTransaction` keyed
//! by `TxIdentity::storage_key`. The memory store serves tests and ephemeral sessions,
//! redb keeps a local file across sessions, and Redis shares one hash per namespace.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition, TableError};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use thiserror::Error;
use tracing::{debug, info};

use crate::types::RawTransaction;

const TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("transactions");

/// Default Redis hash holding cached transactions
pub const DEFAULT_NAMESPACE: &str = "lifefeed:transactions";

/// Errors that can occur in the cache layers
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Cache left inconsistent: {0}")]
    Inconsistent(String),
}

impl CacheError {
    /// A partially observed clear; never recoverable
    pub fn is_fatal(&self) -> bool {
        matches!(self, CacheError::Inconsistent(_))
    }
}

/// Durable layer of the local cache
#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<RawTransaction>, CacheError>;

    async fn store(&self, key: &str, tx: &RawTransaction) -> Result<(), CacheError>;

    /// Remove every entry
    async fn clear(&self) -> Result<(), CacheError>;

    async fn is_empty(&self) -> Result<bool, CacheError>;
}

/// Process-local store
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, RawTransaction>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, RawTransaction>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn load(&self, key: &str) -> Result<Option<RawTransaction>, CacheError> {
        Ok(self.entries().get(key).cloned())
    }

    async fn store(&self, key: &str, tx: &RawTransaction) -> Result<(), CacheError> {
        self.entries().insert(key.to_string(), tx.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.entries().clear();
        Ok(())
    }

    async fn is_empty(&self) -> Result<bool, CacheError> {
        Ok(self.entries().is_empty())
    }
}

fn storage_err(e: impl std::fmt::Display) -> CacheError {
    CacheError::Storage(e.to_string())
}

/// Embedded redb file store
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open or create a redb database at the given path
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        let db = Database::create(path).map_err(storage_err)?;

        let write_txn = db.begin_write().map_err(storage_err)?;
        {
            let _table = write_txn.open_table(TABLE).map_err(storage_err)?;
        }
        write_txn.commit().map_err(storage_err)?;

        info!(path = %path.display(), "Opened redb cache store");
        Ok(Self { db: Arc::new(db) })
    }

    /// Run a blocking redb operation off the async runtime
    async fn blocking<T, F>(&self, op: F) -> Result<T, CacheError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, CacheError> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || op(&db))
            .await
            .map_err(storage_err)?
    }
}

#[async_trait]
impl PersistentStore for RedbStore {
    async fn load(&self, key: &str) -> Result<Option<RawTransaction>, CacheError> {
        let key = key.to_string();
        let bytes = self
            .blocking(move |db| {
                let read_txn = db.begin_read().map_err(storage_err)?;
                let table = match read_txn.open_table(TABLE) {
                    Ok(table) => table,
                    Err(TableError::TableDoesNotExist(_)) => return Ok(None),
                    Err(e) => return Err(storage_err(e)),
                };
                let value = table.get(key.as_str()).map_err(storage_err)?;
                Ok(value.map(|guard| guard.value().to_vec()))
            })
            .await?;

        match bytes {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn store(&self, key: &str, tx: &RawTransaction) -> Result<(), CacheError> {
        let key = key.to_string();
        let bytes = serde_json::to_vec(tx)?;
        self.blocking(move |db| {
            let write_txn = db.begin_write().map_err(storage_err)?;
            {
                let mut table = write_txn.open_table(TABLE).map_err(storage_err)?;
                table.insert(key.as_str(), bytes.as_slice()).map_err(storage_err)?;
            }
            write_txn.commit().map_err(storage_err)
        })
        .await
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.blocking(|db| {
            let write_txn = db.begin_write().map_err(storage_err)?;
            write_txn.delete_table(TABLE).map_err(storage_err)?;
            {
                let _table = write_txn.open_table(TABLE).map_err(storage_err)?;
            }
            write_txn.commit().map_err(storage_err)
        })
        .await?;
        debug!("Cleared redb cache store");
        Ok(())
    }

    async fn is_empty(&self) -> Result<bool, CacheError> {
        self.blocking(|db| {
            let read_txn = db.begin_read().map_err(storage_err)?;
            match read_txn.open_table(TABLE) {
                Ok(table) => Ok(table.len().map_err(storage_err)? == 0),
                Err(TableError::TableDoesNotExist(_)) => Ok(true),
                Err(e) => Err(storage_err(e)),
            }
        })
        .await
    }
}

/// Redis store: one hash per namespace
pub struct RedisStore {
    connection: MultiplexedConnection,
    namespace: String,
}

impl RedisStore {
    /// Create a store over an established connection
    ///
    /// # Arguments
    /// * `connection` - An established Redis multiplexed connection
    /// * `namespace` - Hash key holding the entries
    pub fn new(connection: MultiplexedConnection, namespace: impl Into<String>) -> Self {
        Self {
            connection,
            namespace: namespace.into(),
        }
    }

    /// Connect to `url` and use `namespace` as the hash key
    pub async fn connect(url: &str, namespace: impl Into<String>) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let connection = client.get_multiplexed_async_connection().await?;
        let namespace = namespace.into();
        info!(url = %url, namespace = %namespace, "Connected redis cache store");
        Ok(Self::new(connection, namespace))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

#[async_trait]
impl PersistentStore for RedisStore {
    async fn load(&self, key: &str) -> Result<Option<RawTransaction>, CacheError> {
        let mut connection = self.connection.clone();
        let json: Option<String> = connection.hget(&self.namespace, key).await?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn store(&self, key: &str, tx: &RawTransaction) -> Result<(), CacheError> {
        let json = serde_json::to_string(tx)?;
        let mut connection = self.connection.clone();
        let _: () = connection.hset(&self.namespace, key, json).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let mut connection = self.connection.clone();
        let _: () = connection.del(&self.namespace).await?;
        Ok(())
    }

    async fn is_empty(&self) -> Result<bool, CacheError> {
        let mut connection = self.connection.clone();
        let len: usize = connection.hlen(&self.namespace).await?;
        Ok(len == 0)
    }
}
