//! LifeFeed Engine Library
//!
//! This crate rebuilds reverse-chronological social feeds from LifeChain ledger data.
//! Items are transactions whose receipt events point back at the previous item of the
//! same author or tag; the engine walks those chains, merges them by block number, and
//! pages the merged stream into a view, memoizing fetched transactions in a local cache.

pub mod cache;
pub mod classifier;
pub mod config;
pub mod decoder;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod merger;
pub mod pagination;
pub mod schema;
pub mod store;
pub mod types;
pub mod walker;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use cache::LocalCache;
pub use classifier::{FeedClassifier, FeedItem, FeedKind, Summary};
pub use config::{CacheBackend, FeedConfig};
pub use decoder::{DecodeError, DecodedTransaction, TransactionDecoder};
pub use engine::FeedEngine;
pub use error::FeedError;
pub use ledger::{IpcLedger, LedgerClient, LedgerError, NodeConfig};
pub use merger::FrontierMerger;
pub use pagination::{FeedSnapshot, FeedStatus, PaginationController, RequestOutcome};
pub use schema::Schema;
pub use store::{CacheError, PersistentStore};
pub use types::{Frontier, LogicalKey, RawLog, RawTransaction, TxIdentity};
pub use walker::{ChainWalker, FeedContext, ScanObserver};
