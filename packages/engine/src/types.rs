//! Ledger Types
//!
//! Raw ledger records and the addressing types shared by the walker, merger and cache.
//! Chains are addressed by block number, never by reference: a `Frontier` is an index
//! into the ledger, and cached records are immutable once written.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use alloy::primitives::{Address, Bytes, TxHash, B256};
use serde::{Deserialize, Serialize};

/// Block number used as the "no previous item" sentinel
pub const GENESIS_BLOCK: u64 = 0;

/// Identity owning one backward-linked chain on the ledger
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogicalKey {
    /// Author chain, linked by `SavePreviousFeedInfoEvent`
    User(Address),
    /// Tag chain (already normalized), linked by `SavePreviousTagInfoEvent`
    Topic(String),
}

impl LogicalKey {
    pub fn user(address: Address) -> Self {
        LogicalKey::User(address)
    }

    /// Topic key with the tag normalized through [`format_tag`]
    pub fn topic(tag: &str) -> Self {
        LogicalKey::Topic(format_tag(tag))
    }

    /// Tag chain carrying the items that mention an account
    pub fn mentions(account: Address) -> Self {
        LogicalKey::Topic(format!("{:#x}", account))
    }

    /// Tag chain carrying the replies to a transaction
    pub fn replies(parent: TxHash) -> Self {
        LogicalKey::Topic(format!("{:#x}", parent))
    }

    /// Stable fragment used to build cache keys
    pub fn storage_fragment(&self) -> String {
        match self {
            LogicalKey::User(address) => format!("user:{:#x}", address),
            LogicalKey::Topic(tag) => format!("topic:{}", tag),
        }
    }
}

impl fmt::Display for LogicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalKey::User(address) => write!(f, "user {:#x}", address),
            LogicalKey::Topic(tag) => write!(f, "#{}", tag),
        }
    }
}

/// Normalize a tag: trim, lowercase, and join whitespace-separated words with `-`
pub fn format_tag(tag: &str) -> String {
    tag.split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .to_lowercase()
}

/// Next unread position in one chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frontier {
    pub key: LogicalKey,
    /// Block holding the next unread item, `GENESIS_BLOCK` once the chain is exhausted
    pub block_number: u64,
    /// Client-observed millisecond timestamp, only used to order equal block numbers
    pub creation: i64,
}

impl Frontier {
    pub fn new(key: LogicalKey, block_number: u64, creation: i64) -> Self {
        Self {
            key,
            block_number,
            creation,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.block_number == GENESIS_BLOCK
    }

    /// Merge ordering key: block number first, creation as tie-break
    pub fn position(&self) -> (u64, i64) {
        (self.block_number, self.creation)
    }
}

/// Event log emitted by a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
}

/// Transaction as fetched from the ledger, together with its receipt logs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTransaction {
    pub hash: TxHash,
    pub block_number: u64,
    pub from: Address,
    pub input: Bytes,
    pub logs: Vec<RawLog>,
}

/// Cache identity: lookups arrive by hash (tx pages, reply parents) or by chain position
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TxIdentity {
    Hash(TxHash),
    Position { block_number: u64, key: LogicalKey },
}

impl TxIdentity {
    pub fn position(block_number: u64, key: LogicalKey) -> Self {
        TxIdentity::Position { block_number, key }
    }

    pub fn storage_key(&self) -> String {
        match self {
            TxIdentity::Hash(hash) => format!("tx:{:#x}", hash),
            TxIdentity::Position { block_number, key } => {
                format!("at:{}:{}", block_number, key.storage_fragment())
            }
        }
    }
}

/// Current wall-clock time in milliseconds
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or_default()
}
