//! Chain Walker
//!
//! Follows one backward-linked chain on the ledger. Each step resolves the transaction
//! at the current frontier (from the cache or by scanning the frontier's block),
//! classifies it, and moves the frontier to the block named by the transaction's
//! previous-pointer event. Pointers must strictly decrease; anything else ends the walk,
//! so a walk visits each block at most once.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cache::LocalCache;
use crate::classifier::{FeedClassifier, FeedItem};
use crate::decoder::{DecodeError, DecodedEvent, TransactionDecoder, Value};
use crate::error::FeedError;
use crate::ledger::{LedgerClient, LedgerError};
use crate::schema::{FEED_POINTER_EVENT, FEED_POINTER_FIELD, TAG_FIELD, TAG_POINTER_EVENT, TAG_POINTER_FIELD};
use crate::types::{format_tag, now_millis, Frontier, LogicalKey, RawTransaction, TxIdentity, GENESIS_BLOCK};

/// Scan index reported when the frontier resolved from the cache
pub const CACHE_HIT_INDEX: i64 = -1;

/// Receives block-scan progress as `(block_number, scan_index, scan_total)`
pub trait ScanObserver: Send + Sync {
    fn on_scan(&self, block_number: u64, index: i64, total: i64);
}

impl<F> ScanObserver for F
where
    F: Fn(u64, i64, i64) + Send + Sync,
{
    fn on_scan(&self, block_number: u64, index: i64, total: i64) {
        self(block_number, index, total)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ScanObserver for NoopObserver {
    fn on_scan(&self, _block_number: u64, _index: i64, _total: i64) {}
}

/// Shared collaborators every walker needs
#[derive(Clone)]
pub struct FeedContext {
    pub ledger: Arc<dyn LedgerClient>,
    pub cache: Arc<LocalCache>,
    pub decoder: Arc<TransactionDecoder>,
    pub classifier: Arc<FeedClassifier>,
}

impl FeedContext {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        cache: Arc<LocalCache>,
        decoder: Arc<TransactionDecoder>,
        classifier: Arc<FeedClassifier>,
    ) -> Self {
        Self {
            ledger,
            cache,
            decoder,
            classifier,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkerState {
    Active(Frontier),
    Exhausted,
}

/// Result of resolving a single frontier
#[derive(Debug)]
pub enum WalkOutcome {
    /// A feed item was produced and the frontier moved on
    Item(FeedItem),
    /// A non-content transaction was passed over and the frontier moved on
    Skipped,
    Exhausted,
}

pub struct ChainWalker {
    key: LogicalKey,
    state: WalkerState,
    context: FeedContext,
}

impl ChainWalker {
    /// Start from an explicit frontier; a genesis frontier starts exhausted
    pub fn new(context: FeedContext, frontier: Frontier) -> Self {
        let key = frontier.key.clone();
        let state = if frontier.is_exhausted() {
            WalkerState::Exhausted
        } else {
            WalkerState::Active(frontier)
        };
        Self { key, state, context }
    }

    /// Start from a chain head read from the registry
    pub fn from_head(context: FeedContext, key: LogicalKey, head: u64, creation: i64) -> Self {
        Self::new(context, Frontier::new(key, head, creation))
    }

    pub fn key(&self) -> &LogicalKey {
        &self.key
    }

    pub fn state(&self) -> &WalkerState {
        &self.state
    }

    pub fn frontier(&self) -> Option<&Frontier> {
        match &self.state {
            WalkerState::Active(frontier) => Some(frontier),
            WalkerState::Exhausted => None,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self.state, WalkerState::Exhausted)
    }

    /// Produce the next feed item, passing over non-content transactions
    ///
    /// Returns `Ok(None)` once the chain is exhausted, on every call thereafter.
    pub async fn step(&mut self, observer: &Arc<dyn ScanObserver>) -> Result<Option<FeedItem>, FeedError> {
        loop {
            match self.advance(observer).await? {
                WalkOutcome::Item(item) => return Ok(Some(item)),
                WalkOutcome::Skipped => continue,
                WalkOutcome::Exhausted => return Ok(None),
            }
        }
    }

    /// Resolve exactly one frontier
    ///
    /// Retryable fetch failures leave the frontier untouched. Any other failure
    /// exhausts the walker before it is returned.
    pub async fn advance(&mut self, observer: &Arc<dyn ScanObserver>) -> Result<WalkOutcome, FeedError> {
        let frontier = match &self.state {
            WalkerState::Active(frontier) => frontier.clone(),
            WalkerState::Exhausted => return Ok(WalkOutcome::Exhausted),
        };

        match self.resolve_and_interpret(&frontier, observer).await {
            Ok((item, pointer)) => {
                self.follow(&frontier, pointer);
                Ok(match item {
                    Some(item) => WalkOutcome::Item(item),
                    None => WalkOutcome::Skipped,
                })
            }
            Err(e) if e.is_retryable() => {
                warn!(key = %self.key, block = frontier.block_number, error = %e, "Fetch failed, frontier kept");
                Err(e)
            }
            Err(e) => {
                warn!(key = %self.key, block = frontier.block_number, error = %e, "Walker stopped");
                self.state = WalkerState::Exhausted;
                Err(e)
            }
        }
    }

    async fn resolve_and_interpret(
        &self,
        frontier: &Frontier,
        observer: &Arc<dyn ScanObserver>,
    ) -> Result<(Option<FeedItem>, Option<u64>), FeedError> {
        let raw = self.resolve(frontier, observer).await?;
        let malformed = |source: DecodeError| FeedError::MalformedPayload { hash: raw.hash, source };

        match self.context.decoder.decode(&raw) {
            Ok(decoded) => {
                let pointer = previous_pointer(&decoded.events, &self.key).map_err(malformed)?;
                match self.context.classifier.classify(decoded) {
                    Ok(item) => Ok((item, pointer)),
                    Err(e) => {
                        warn!(hash = %raw.hash, error = %e, "Unclassifiable content, following pointer");
                        Ok((None, pointer))
                    }
                }
            }
            Err(decode_error) => {
                let events = self.context.decoder.decode_events(&raw).map_err(malformed)?;
                let pointer = previous_pointer(&events, &self.key).map_err(malformed)?;
                debug!(hash = %raw.hash, error = %decode_error, "Undecodable method, following pointer");
                Ok((None, pointer))
            }
        }
    }

    fn follow(&mut self, from: &Frontier, pointer: Option<u64>) {
        self.state = match pointer {
            Some(previous) if previous < from.block_number => {
                debug!(key = %self.key, from = from.block_number, to = previous, "Following previous pointer");
                WalkerState::Active(Frontier::new(self.key.clone(), previous, now_millis()))
            }
            Some(previous) => {
                warn!(
                    key = %self.key,
                    block = from.block_number,
                    pointer = previous,
                    "Rejected non-decreasing pointer, ending chain"
                );
                WalkerState::Exhausted
            }
            None => {
                info!(key = %self.key, "Reached start of chain");
                WalkerState::Exhausted
            }
        };
    }

    async fn resolve(
        &self,
        frontier: &Frontier,
        observer: &Arc<dyn ScanObserver>,
    ) -> Result<Arc<RawTransaction>, FeedError> {
        let identity = TxIdentity::position(frontier.block_number, self.key.clone());
        if let Some(raw) = self.context.cache.load(&identity).await? {
            observer.on_scan(frontier.block_number, CACHE_HIT_INDEX, 0);
            return Ok(raw);
        }

        // The scan runs as its own task so an abandoned view still lets it fill the cache.
        let scan = tokio::spawn(scan_block(
            self.context.clone(),
            frontier.block_number,
            self.key.clone(),
            observer.clone(),
        ));
        scan.await.map_err(|e| {
            FeedError::from(LedgerError::Transport(format!("block scan task failed: {}", e)))
        })?
    }
}

async fn scan_block(
    context: FeedContext,
    block_number: u64,
    key: LogicalKey,
    observer: Arc<dyn ScanObserver>,
) -> Result<Arc<RawTransaction>, FeedError> {
    debug!(key = %key, block = block_number, "Cache miss, scanning block");
    let transactions = context.ledger.fetch_block_transactions(block_number).await?;
    let total = transactions.len() as i64;

    for (index, tx) in transactions.into_iter().enumerate() {
        observer.on_scan(block_number, index as i64, total);

        let events = match context.decoder.decode_events(&tx) {
            Ok(events) => events,
            Err(e) => {
                debug!(hash = %tx.hash, error = %e, "Skipping transaction with undecodable logs");
                continue;
            }
        };
        if !carries_key(&tx, &events, &key) {
            continue;
        }

        // Hash entry is best-effort; only the position entry is required to continue.
        if let Err(e) = context.cache.put(&TxIdentity::Hash(tx.hash), tx.clone()).await {
            warn!(hash = %tx.hash, error = %e, "Failed to cache transaction by hash");
        }
        let raw = context
            .cache
            .put(&TxIdentity::position(block_number, key.clone()), tx)
            .await?;
        debug!(key = %key, block = block_number, index, total, "Resolved frontier");
        return Ok(raw);
    }

    Err(FeedError::OrphanFrontier {
        key: key.to_string(),
        block_number,
    })
}

fn event_tag(event: &DecodedEvent) -> Option<String> {
    event.field(TAG_FIELD).and_then(Value::as_str).map(format_tag)
}

fn pointer_event<'a>(events: &'a [DecodedEvent], key: &LogicalKey) -> Option<&'a DecodedEvent> {
    match key {
        LogicalKey::User(_) => events.iter().find(|event| event.name == FEED_POINTER_EVENT),
        LogicalKey::Topic(tag) => events
            .iter()
            .find(|event| event.name == TAG_POINTER_EVENT && event_tag(event).as_deref() == Some(tag.as_str())),
    }
}

/// Block number of the previous item in `key`'s chain, `None` at genesis
pub fn previous_pointer(events: &[DecodedEvent], key: &LogicalKey) -> Result<Option<u64>, DecodeError> {
    let Some(event) = pointer_event(events, key) else {
        return Ok(None);
    };
    let field = match key {
        LogicalKey::User(_) => FEED_POINTER_FIELD,
        LogicalKey::Topic(_) => TAG_POINTER_FIELD,
    };
    let block = event
        .field(field)
        .ok_or_else(|| DecodeError::MissingField(field.to_string()))?
        .as_u64(field)?;
    Ok((block != GENESIS_BLOCK).then_some(block))
}

/// Whether a transaction belongs to `key`'s chain
pub fn carries_key(raw: &RawTransaction, events: &[DecodedEvent], key: &LogicalKey) -> bool {
    let linked = pointer_event(events, key).is_some();
    match key {
        LogicalKey::User(address) => linked && raw.from == *address,
        LogicalKey::Topic(_) => linked,
    }
}
