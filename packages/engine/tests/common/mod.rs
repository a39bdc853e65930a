//! Shared fixtures for integration tests: an in-memory ledger and calldata builders

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::primitives::{address, Address, Bytes, TxHash, B256, U256};
use alloy::sol_types::{SolCall, SolEvent};
use async_trait::async_trait;

use lifefeed_engine::cache::LocalCache;
use lifefeed_engine::classifier::FeedClassifier;
use lifefeed_engine::decoder::TransactionDecoder;
use lifefeed_engine::ledger::{LedgerClient, LedgerError};
use lifefeed_engine::types::{LogicalKey, RawLog, RawTransaction};
use lifefeed_engine::walker::FeedContext;

mod abi {
    alloy::sol! {
        function post(string message) external;
        function reply(string message, bytes32 parentTransactionHash) external;
        function setMetaData(string metaData) external;

        event SavePreviousFeedInfoEvent(uint256 previousFeedInfoBN);
        event SavePreviousTagInfoEvent(string tag, uint256 previousTagInfoBN);
    }
}

pub const LIFECHAIN: Address = address!("5FbDB2315678afecb367f032d93F642f64180aa3");
pub const ALICE: Address = address!("a11ce00000000000000000000000000000000000");
pub const BOB: Address = address!("b0b0000000000000000000000000000000000000");
pub const CAROL: Address = address!("ca201000000000000000000000000000000000ff");

pub fn tx_hash(n: u64) -> TxHash {
    B256::left_padding_from(&n.to_be_bytes())
}

pub fn post_input(message: &str) -> Vec<u8> {
    abi::postCall {
        message: message.to_string(),
    }
    .abi_encode()
}

pub fn reply_input(message: &str, parent: TxHash) -> Vec<u8> {
    abi::replyCall {
        message: message.to_string(),
        parentTransactionHash: parent,
    }
    .abi_encode()
}

pub fn metadata_input(metadata: &str) -> Vec<u8> {
    abi::setMetaDataCall {
        metaData: metadata.to_string(),
    }
    .abi_encode()
}

pub fn feed_pointer(previous: u64) -> RawLog {
    let data = abi::SavePreviousFeedInfoEvent {
        previousFeedInfoBN: U256::from(previous),
    }
    .encode_log_data();
    RawLog {
        address: LIFECHAIN,
        topics: data.topics().to_vec(),
        data: data.data,
    }
}

pub fn tag_pointer(tag: &str, previous: u64) -> RawLog {
    let data = abi::SavePreviousTagInfoEvent {
        tag: tag.to_string(),
        previousTagInfoBN: U256::from(previous),
    }
    .encode_log_data();
    RawLog {
        address: LIFECHAIN,
        topics: data.topics().to_vec(),
        data: data.data,
    }
}

/// A transaction unrelated to any followed chain
pub fn noise(n: u64, block_number: u64) -> RawTransaction {
    RawTransaction {
        hash: tx_hash(n),
        block_number,
        from: CAROL,
        input: Bytes::from(vec![0xa9, 0x05, 0x9c, 0xbb]),
        logs: vec![],
    }
}

pub fn tx(n: u64, block_number: u64, from: Address, input: Vec<u8>, logs: Vec<RawLog>) -> RawTransaction {
    RawTransaction {
        hash: tx_hash(n),
        block_number,
        from,
        input: Bytes::from(input),
        logs,
    }
}

/// In-memory ledger with injectable latency and transient failures
#[derive(Default)]
pub struct FakeLedger {
    blocks: Mutex<BTreeMap<u64, Vec<RawTransaction>>>,
    heads: Mutex<HashMap<LogicalKey, u64>>,
    fail_next: Mutex<usize>,
    block_fetches: AtomicUsize,
    delay: Option<Duration>,
}

impl FakeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Append a transaction to its block
    pub fn add(&self, tx: RawTransaction) {
        self.blocks
            .lock()
            .unwrap()
            .entry(tx.block_number)
            .or_default()
            .push(tx);
    }

    pub fn set_head(&self, key: LogicalKey, block_number: u64) {
        self.heads.lock().unwrap().insert(key, block_number);
    }

    /// Fail the next `count` block fetches with a timeout
    pub fn fail_next(&self, count: usize) {
        *self.fail_next.lock().unwrap() = count;
    }

    pub fn block_fetches(&self) -> usize {
        self.block_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerClient for FakeLedger {
    async fn fetch_transaction(&self, hash: TxHash) -> Result<RawTransaction, LedgerError> {
        self.blocks
            .lock()
            .unwrap()
            .values()
            .flatten()
            .find(|tx| tx.hash == hash)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("transaction {:#x}", hash)))
    }

    async fn fetch_block_transactions(&self, block_number: u64) -> Result<Vec<RawTransaction>, LedgerError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        {
            let mut fail_next = self.fail_next.lock().unwrap();
            if *fail_next > 0 {
                *fail_next -= 1;
                return Err(LedgerError::Timeout(5000));
            }
        }
        self.block_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .blocks
            .lock()
            .unwrap()
            .get(&block_number)
            .cloned()
            .unwrap_or_default())
    }

    async fn current_head(&self, key: &LogicalKey) -> Result<u64, LedgerError> {
        Ok(self.heads.lock().unwrap().get(key).copied().unwrap_or(0))
    }
}

pub fn context(ledger: Arc<FakeLedger>, cache: Arc<LocalCache>) -> FeedContext {
    FeedContext::new(
        ledger,
        cache,
        Arc::new(TransactionDecoder::default()),
        Arc::new(FeedClassifier::default()),
    )
}
