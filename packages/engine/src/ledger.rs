//! Ledger Client
//!
//! Network collaborator for the feed engine: fetches transactions with their receipt
//! logs and reads chain heads from the LifeChain registry. `IpcLedger` talks to a node
//! over its Unix IPC socket and reconnects with exponential backoff.

use std::collections::HashMap;
use std::future::IntoFuture;
use std::path::Path;
use std::time::Duration;

use alloy::consensus::Transaction as _;
use alloy::eips::BlockId;
use alloy::primitives::{Address, TxHash};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::pubsub::PubSubFrontend;
use alloy::rpc::types::{BlockNumberOrTag, BlockTransactionsKind, Transaction, TransactionReceipt};
use alloy::sol;
use alloy::transports::ipc::IpcConnect;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::types::{LogicalKey, RawLog, RawTransaction};

/// Default IPC socket paths to try
pub const DEFAULT_IPC_PATHS: &[&str] = &[
    "/tmp/anvil.ipc",
    "~/.foundry/anvil.ipc",
    "/var/run/geth.ipc",
    "~/.ethereum/geth.ipc",
];

/// Maximum number of reconnection attempts before giving up
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Initial backoff delay for reconnection
pub const INITIAL_BACKOFF_MS: u64 = 100;

/// Maximum backoff delay for reconnection
pub const MAX_BACKOFF_MS: u64 = 30000;

/// Request timeout in milliseconds
pub const REQUEST_TIMEOUT_MS: u64 = 5000;

sol! {
    #[sol(rpc)]
    interface LifeChainRegistry {
        function getCurrentFeedInfo(address user) external view returns (uint256);
        function getCurrentTagInfoByTrend(string tag) external view returns (uint256);
    }
}

/// Errors that can occur while talking to the ledger
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("IPC socket not found at path: {0}")]
    SocketNotFound(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Max reconnection attempts ({0}) exceeded")]
    MaxReconnectAttemptsExceeded(u32),

    #[error("Invalid IPC path: {0}")]
    InvalidPath(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("Not found on ledger: {0}")]
    NotFound(String),

    #[error("Invalid node response: {0}")]
    InvalidResponse(String),

    #[error("No registry contract configured")]
    RegistryNotConfigured,
}

impl LedgerError {
    /// Network-layer failures a caller may retry
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LedgerError::Transport(_) | LedgerError::Timeout(_) | LedgerError::ConnectionFailed(_)
        )
    }
}

/// Ledger operations the feed engine depends on
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Fetch one transaction with its receipt logs
    async fn fetch_transaction(&self, hash: TxHash) -> Result<RawTransaction, LedgerError>;

    /// Fetch every transaction of a block, in block order, with receipt logs
    async fn fetch_block_transactions(&self, block_number: u64) -> Result<Vec<RawTransaction>, LedgerError>;

    /// Block number of the newest item in a key's chain, `0` when the chain is empty
    async fn current_head(&self, key: &LogicalKey) -> Result<u64, LedgerError>;
}

/// Configuration for the node connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NodeConfig {
    /// Path to the IPC socket
    pub socket_path: String,
    /// Maximum reconnection attempts
    pub max_reconnect_attempts: u32,
    /// Initial backoff delay in milliseconds
    pub initial_backoff_ms: u64,
    /// Maximum backoff delay in milliseconds
    pub max_backoff_ms: u64,
    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            socket_path: DEFAULT_IPC_PATHS[0].to_string(),
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            initial_backoff_ms: INITIAL_BACKOFF_MS,
            max_backoff_ms: MAX_BACKOFF_MS,
            timeout_ms: REQUEST_TIMEOUT_MS,
        }
    }
}

impl NodeConfig {
    /// Create a new config with the specified socket path
    pub fn with_path(socket_path: impl Into<String>) -> Self {
        Self {
            socket_path: socket_path.into(),
            ..Default::default()
        }
    }

    /// Calculate backoff delay for a given attempt number
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay_ms = self.initial_backoff_ms * 2u64.pow(attempt.min(10));
        Duration::from_millis(delay_ms.min(self.max_backoff_ms))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Check if an IPC socket exists at the given path
pub fn socket_exists(path: &str) -> bool {
    Path::new(&expand_path(path)).exists()
}

/// Expand a leading `~/` to the home directory
pub fn expand_path(path: &str) -> String {
    if path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return path.replacen("~", &home.to_string_lossy(), 1);
        }
    }
    path.to_string()
}

/// Reject empty paths, warn on paths that do not look like sockets
pub fn validate_ipc_path(path: &str) -> Result<(), LedgerError> {
    if path.is_empty() {
        return Err(LedgerError::InvalidPath("Path cannot be empty".to_string()));
    }

    let expanded = expand_path(path);
    if !expanded.ends_with(".ipc") && !expanded.contains("geth") && !expanded.contains("anvil") {
        warn!("IPC path '{}' may not be a valid socket path", path);
    }

    Ok(())
}

/// IPC connection manager with reconnection support
pub struct IpcConnection {
    config: NodeConfig,
    reconnect_attempts: u32,
}

impl IpcConnection {
    pub fn new(config: NodeConfig) -> Self {
        Self {
            config,
            reconnect_attempts: 0,
        }
    }

    pub fn socket_path(&self) -> &str {
        &self.config.socket_path
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    /// Calculate delay before next reconnection attempt
    pub fn next_backoff_delay(&self) -> Duration {
        self.config.backoff_delay(self.reconnect_attempts)
    }

    /// Attempt to connect to the IPC socket
    pub async fn connect(&mut self) -> Result<RootProvider<PubSubFrontend>, LedgerError> {
        let expanded_path = expand_path(&self.config.socket_path);

        if !Path::new(&expanded_path).exists() {
            return Err(LedgerError::SocketNotFound(expanded_path));
        }

        info!("Connecting to IPC socket at {}", expanded_path);

        let ipc: IpcConnect<String> = IpcConnect::new(expanded_path);
        let provider = ProviderBuilder::new()
            .on_ipc(ipc)
            .await
            .map_err(|e| LedgerError::ConnectionFailed(e.to_string()))?;

        self.reconnect_attempts = 0;
        info!("Connected to IPC socket");

        Ok(provider)
    }

    /// Attempt to reconnect with exponential backoff
    pub async fn reconnect(&mut self) -> Result<RootProvider<PubSubFrontend>, LedgerError> {
        while self.reconnect_attempts < self.config.max_reconnect_attempts {
            let delay = self.next_backoff_delay();
            warn!(
                "Attempting to reconnect (attempt {}/{}), waiting {:?}",
                self.reconnect_attempts + 1,
                self.config.max_reconnect_attempts,
                delay
            );

            sleep(delay).await;
            self.reconnect_attempts += 1;

            match self.connect().await {
                Ok(provider) => return Ok(provider),
                Err(e) => {
                    error!("Reconnection attempt {} failed: {}", self.reconnect_attempts, e);
                }
            }
        }

        Err(LedgerError::MaxReconnectAttemptsExceeded(self.config.max_reconnect_attempts))
    }
}

/// Ledger client over a node's IPC socket
pub struct IpcLedger {
    provider: RootProvider<PubSubFrontend>,
    registry: Option<Address>,
    timeout: Duration,
}

impl IpcLedger {
    /// Connect, falling back to backoff reconnection when the first attempt fails
    ///
    /// # Arguments
    /// * `config` - Node connection settings
    /// * `registry` - LifeChain contract holding chain heads
    pub async fn connect(config: &NodeConfig, registry: Option<Address>) -> Result<Self, LedgerError> {
        validate_ipc_path(&config.socket_path)?;
        let mut connection = IpcConnection::new(config.clone());
        let provider = match connection.connect().await {
            Ok(provider) => provider,
            Err(e) => {
                warn!("Initial connection failed: {}", e);
                connection.reconnect().await?
            }
        };

        Ok(Self {
            provider,
            registry,
            timeout: config.request_timeout(),
        })
    }

    async fn timed<F, T, E>(&self, request: F) -> Result<T, LedgerError>
    where
        F: IntoFuture<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        match timeout(self.timeout, request.into_future()).await {
            Ok(result) => result.map_err(|e| LedgerError::Transport(e.to_string())),
            Err(_) => Err(LedgerError::Timeout(self.timeout.as_millis() as u64)),
        }
    }

    fn registry(&self) -> Result<Address, LedgerError> {
        self.registry.ok_or(LedgerError::RegistryNotConfigured)
    }
}

fn receipt_logs(receipt: &TransactionReceipt) -> Vec<RawLog> {
    receipt
        .inner
        .logs()
        .iter()
        .map(|log| RawLog {
            address: log.inner.address,
            topics: log.inner.data.topics().to_vec(),
            data: log.inner.data.data.clone(),
        })
        .collect()
}

fn raw_transaction(tx: &Transaction, logs: Vec<RawLog>) -> Result<RawTransaction, LedgerError> {
    let hash = *tx.inner.tx_hash();
    let block_number = tx
        .block_number
        .ok_or_else(|| LedgerError::InvalidResponse(format!("transaction {:#x} is pending", hash)))?;

    Ok(RawTransaction {
        hash,
        block_number,
        from: tx.from,
        input: tx.inner.input().clone(),
        logs,
    })
}

#[async_trait]
impl LedgerClient for IpcLedger {
    async fn fetch_transaction(&self, hash: TxHash) -> Result<RawTransaction, LedgerError> {
        let tx = self
            .timed(self.provider.get_transaction_by_hash(hash))
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("transaction {:#x}", hash)))?;

        let receipt = self
            .timed(self.provider.get_transaction_receipt(hash))
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("receipt {:#x}", hash)))?;

        debug!(hash = %hash, logs = receipt.inner.logs().len(), "Fetched transaction");
        raw_transaction(&tx, receipt_logs(&receipt))
    }

    async fn fetch_block_transactions(&self, block_number: u64) -> Result<Vec<RawTransaction>, LedgerError> {
        let block = self
            .timed(
                self.provider
                    .get_block_by_number(BlockNumberOrTag::Number(block_number), BlockTransactionsKind::Full),
            )
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("block {}", block_number)))?;

        let receipts = self
            .timed(self.provider.get_block_receipts(BlockId::number(block_number)))
            .await?
            .unwrap_or_default();

        let mut logs_by_hash: HashMap<TxHash, Vec<RawLog>> = receipts
            .iter()
            .map(|receipt| (receipt.transaction_hash, receipt_logs(receipt)))
            .collect();

        let transactions = block.transactions.as_transactions().ok_or_else(|| {
            LedgerError::InvalidResponse(format!("block {} returned without transaction bodies", block_number))
        })?;

        debug!(block = block_number, count = transactions.len(), "Fetched block transactions");
        transactions
            .iter()
            .map(|tx| {
                let logs = logs_by_hash.remove(tx.inner.tx_hash()).unwrap_or_default();
                raw_transaction(tx, logs)
            })
            .collect()
    }

    async fn current_head(&self, key: &LogicalKey) -> Result<u64, LedgerError> {
        let registry = LifeChainRegistry::new(self.registry()?, self.provider.clone());
        let head = match key {
            LogicalKey::User(address) => self.timed(registry.getCurrentFeedInfo(*address).call()).await?._0,
            LogicalKey::Topic(tag) => {
                self.timed(registry.getCurrentTagInfoByTrend(tag.clone()).call())
                    .await?
                    ._0
            }
        };

        let head = u64::try_from(head).map_err(|_| {
            LedgerError::InvalidResponse(format!("head block for {} exceeds u64: {}", key, head))
        })?;
        debug!(key = %key, head, "Read chain head");
        Ok(head)
    }
}
