//! Feed errors surfaced to callers of the walker, merger and pagination layers

use alloy::primitives::TxHash;
use thiserror::Error;

use crate::decoder::DecodeError;
use crate::ledger::LedgerError;
use crate::store::CacheError;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Malformed payload in transaction {hash:#x}: {source}")]
    MalformedPayload {
        hash: TxHash,
        #[source]
        source: DecodeError,
    },

    #[error("No transaction for {key} in block {block_number}")]
    OrphanFrontier { key: String, block_number: u64 },

    #[error("Transient fetch failure: {0}")]
    TransientFetch(#[source] LedgerError),

    #[error("Ledger error: {0}")]
    Ledger(#[source] LedgerError),

    #[error("Transaction not found: {0:#x}")]
    TransactionNotFound(TxHash),

    #[error("Invalid transaction {hash:#x}: {reason}")]
    InvalidTransaction { hash: TxHash, reason: String },

    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    #[error("No account configured")]
    MissingAccount,

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

impl From<LedgerError> for FeedError {
    fn from(e: LedgerError) -> Self {
        if e.is_transient() {
            FeedError::TransientFetch(e)
        } else {
            FeedError::Ledger(e)
        }
    }
}

impl FeedError {
    /// Whether retrying the same request may succeed without losing position
    pub fn is_retryable(&self) -> bool {
        matches!(self, FeedError::TransientFetch(_))
    }

    /// Invariant violations that must stop the process from trusting the cache
    pub fn is_fatal(&self) -> bool {
        matches!(self, FeedError::Cache(e) if e.is_fatal())
    }
}
