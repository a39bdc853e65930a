//! Feed Engine
//!
//! Owns the collaborators shared by every view (ledger client, local cache, decoder,
//! classifier) and opens feed views over them. Each view gets its own
//! `PaginationController`; only the cache is shared between views.

use std::sync::Arc;

use alloy::primitives::{Address, TxHash};
use tracing::{debug, info};

use crate::cache::LocalCache;
use crate::classifier::{FeedClassifier, FeedItem, FeedKind};
use crate::config::FeedConfig;
use crate::decoder::TransactionDecoder;
use crate::error::FeedError;
use crate::ledger::{LedgerClient, LedgerError};
use crate::merger::FrontierMerger;
use crate::pagination::PaginationController;
use crate::schema::Schema;
use crate::types::{format_tag, LogicalKey, RawTransaction, TxIdentity};
use crate::walker::{FeedContext, ScanObserver};

pub struct FeedEngine {
    context: FeedContext,
    following: Vec<LogicalKey>,
    account: Option<Address>,
}

impl FeedEngine {
    /// Build an engine from configuration, opening the configured cache backend
    pub async fn from_config(config: &FeedConfig, ledger: Arc<dyn LedgerClient>) -> Result<Self, FeedError> {
        let schema = match config.contract_address {
            Some(address) => Schema::lifechain().with_contract(address),
            None => Schema::lifechain(),
        };
        info!(
            functions = schema.function_count(),
            events = schema.event_count(),
            contract = ?schema.contract(),
            "Loaded LifeChain schema"
        );
        let store = config.cache.open().await?;
        let context = FeedContext::new(
            ledger,
            Arc::new(LocalCache::new(store)),
            Arc::new(TransactionDecoder::new(schema)),
            Arc::new(FeedClassifier::new(config.summary_length)),
        );

        let following = config
            .following
            .users
            .iter()
            .map(|user| LogicalKey::user(*user))
            .chain(config.following.topics.iter().map(|topic| LogicalKey::topic(topic)))
            .collect();

        Ok(Self::with_context(context, following, config.account))
    }

    pub fn with_context(context: FeedContext, following: Vec<LogicalKey>, account: Option<Address>) -> Self {
        Self {
            context,
            following,
            account,
        }
    }

    pub fn context(&self) -> &FeedContext {
        &self.context
    }

    pub fn cache(&self) -> &Arc<LocalCache> {
        &self.context.cache
    }

    /// Open a merged view over `keys`
    pub async fn open_feed(&self, keys: Vec<LogicalKey>) -> Result<PaginationController, FeedError> {
        let merger = FrontierMerger::open(self.context.clone(), keys).await?;
        Ok(PaginationController::new(merger))
    }

    /// Open a merged view, forwarding block-scan progress to `observer`
    pub async fn open_feed_with_observer(
        &self,
        keys: Vec<LogicalKey>,
        observer: Arc<dyn ScanObserver>,
    ) -> Result<PaginationController, FeedError> {
        let merger = FrontierMerger::open(self.context.clone(), keys).await?;
        Ok(PaginationController::with_observer(merger, observer))
    }

    /// Every followed user and topic
    pub async fn home_feed(&self) -> Result<PaginationController, FeedError> {
        info!(sources = self.following.len(), "Opening home feed");
        self.open_feed(self.following.clone()).await
    }

    /// One author's chain
    pub async fn user_feed(&self, user: Address) -> Result<PaginationController, FeedError> {
        self.open_feed(vec![LogicalKey::user(user)]).await
    }

    /// One tag chain; address-like tags are rejected
    pub async fn topic_feed(&self, topic: &str) -> Result<PaginationController, FeedError> {
        let key = topic_key(topic)?;
        self.open_feed(vec![key]).await
    }

    /// Items mentioning `account`, or the configured account
    pub async fn notifications_feed(&self, account: Option<Address>) -> Result<PaginationController, FeedError> {
        let account = account.or(self.account).ok_or(FeedError::MissingAccount)?;
        self.open_feed(vec![LogicalKey::mentions(account)]).await
    }

    /// Replies to a transaction
    pub async fn replies_feed(&self, parent: TxHash) -> Result<PaginationController, FeedError> {
        self.open_feed(vec![LogicalKey::replies(parent)]).await
    }

    /// Look up a single transaction as a feed item
    pub async fn transaction_item(&self, hash: TxHash) -> Result<FeedItem, FeedError> {
        let raw = self.load_transaction(hash).await?;
        let decoded = self
            .context
            .decoder
            .decode(&raw)
            .map_err(|e| FeedError::InvalidTransaction {
                hash,
                reason: e.to_string(),
            })?;
        match self.context.classifier.classify(decoded) {
            Ok(Some(item)) => Ok(item),
            Ok(None) => Err(FeedError::InvalidTransaction {
                hash,
                reason: "not a content transaction".to_string(),
            }),
            Err(e) => Err(FeedError::InvalidTransaction {
                hash,
                reason: e.to_string(),
            }),
        }
    }

    /// The replied-to or reposted item, `None` for posts
    pub async fn resolve_parent(&self, item: &FeedItem) -> Result<Option<FeedItem>, FeedError> {
        match (item.kind, item.parent_ref) {
            (FeedKind::Reply | FeedKind::Repost, Some(parent)) => self.transaction_item(parent).await.map(Some),
            _ => Ok(None),
        }
    }

    /// Drop every cached transaction from memory and the persistent store
    pub async fn clear_local_data(&self) -> Result<(), FeedError> {
        self.context.cache.clear().await?;
        Ok(())
    }

    async fn load_transaction(&self, hash: TxHash) -> Result<Arc<RawTransaction>, FeedError> {
        let identity = TxIdentity::Hash(hash);
        if let Some(raw) = self.context.cache.load(&identity).await? {
            return Ok(raw);
        }

        debug!(hash = %hash, "Transaction cache miss");
        let raw = match self.context.ledger.fetch_transaction(hash).await {
            Ok(raw) => raw,
            Err(LedgerError::NotFound(_)) => return Err(FeedError::TransactionNotFound(hash)),
            Err(e) => return Err(e.into()),
        };
        Ok(self.context.cache.put(&identity, raw).await?)
    }
}

/// Normalize a user-entered topic, rejecting empty and address-like input
pub fn topic_key(topic: &str) -> Result<LogicalKey, FeedError> {
    let tag = format_tag(topic);
    if tag.is_empty() || tag.parse::<Address>().is_ok() {
        return Err(FeedError::InvalidTopic(topic.to_string()));
    }
    Ok(LogicalKey::Topic(tag))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MockLedgerClient;
    use crate::pagination::RequestOutcome;
    use crate::test_support::*;
    use alloy::primitives::address;

    const ALICE: Address = address!("a11ce00000000000000000000000000000000000");

    fn engine(ledger: MockLedgerClient) -> FeedEngine {
        let context = FeedContext::new(
            Arc::new(ledger),
            Arc::new(LocalCache::in_memory()),
            Arc::new(TransactionDecoder::default()),
            Arc::new(FeedClassifier::default()),
        );
        FeedEngine::with_context(context, vec![LogicalKey::user(ALICE)], None)
    }

    // ==================== topic_key tests ====================

    #[test]
    fn test_topic_key_normalizes() {
        assert_eq!(topic_key(" Rust Lang ").unwrap(), LogicalKey::Topic("rust-lang".into()));
    }

    #[test]
    fn test_topic_key_rejects_addresses_and_empty() {
        assert!(matches!(
            topic_key("0x70997970C51812dc3A010C7d01b50e0d17dc79C8"),
            Err(FeedError::InvalidTopic(_))
        ));
        assert!(matches!(topic_key("   "), Err(FeedError::InvalidTopic(_))));
    }

    // ==================== transaction_item tests ====================

    #[tokio::test]
    async fn test_transaction_item_fetches_once_then_caches() {
        let mut ledger = MockLedgerClient::new();
        ledger
            .expect_fetch_transaction()
            .times(1)
            .returning(|hash| {
                let mut tx = raw_tx(5, 12, ALICE, post_input("hello"), vec![feed_pointer_log(0)]);
                tx.hash = hash;
                Ok(tx)
            });
        let engine = engine(ledger);

        let item = engine.transaction_item(tx_hash(5)).await.unwrap();
        assert_eq!(item.kind, FeedKind::Post);
        let again = engine.transaction_item(tx_hash(5)).await.unwrap();
        assert_eq!(again.hash(), item.hash());
    }

    #[tokio::test]
    async fn test_transaction_item_not_found() {
        let mut ledger = MockLedgerClient::new();
        ledger
            .expect_fetch_transaction()
            .returning(|hash| Err(LedgerError::NotFound(format!("{:#x}", hash))));
        let engine = engine(ledger);
        assert!(matches!(
            engine.transaction_item(tx_hash(1)).await,
            Err(FeedError::TransactionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_transaction_item_rejects_non_content() {
        let mut ledger = MockLedgerClient::new();
        ledger
            .expect_fetch_transaction()
            .returning(|_| Ok(raw_tx(1, 12, ALICE, metadata_input("{}"), vec![])));
        let engine = engine(ledger);
        assert!(matches!(
            engine.transaction_item(tx_hash(1)).await,
            Err(FeedError::InvalidTransaction { .. })
        ));
    }

    #[tokio::test]
    async fn test_resolve_parent_of_reply() {
        let mut ledger = MockLedgerClient::new();
        ledger.expect_fetch_transaction().returning(|hash| {
            if hash == tx_hash(1) {
                Ok(raw_tx(1, 10, ALICE, post_input("parent"), vec![]))
            } else {
                Ok(raw_tx(2, 11, ALICE, reply_input("child", tx_hash(1)), vec![]))
            }
        });
        let engine = engine(ledger);

        let reply = engine.transaction_item(tx_hash(2)).await.unwrap();
        let parent = engine.resolve_parent(&reply).await.unwrap().unwrap();
        assert_eq!(parent.hash(), tx_hash(1));
        assert!(engine.resolve_parent(&parent).await.unwrap().is_none());
    }

    // ==================== feed tests ====================

    #[tokio::test]
    async fn test_notifications_without_account_fails() {
        let engine = engine(MockLedgerClient::new());
        assert!(matches!(engine.notifications_feed(None).await, Err(FeedError::MissingAccount)));
    }

    #[tokio::test]
    async fn test_home_feed_walks_followed_users() {
        let mut ledger = MockLedgerClient::new();
        ledger.expect_current_head().returning(|_| Ok(8));
        ledger
            .expect_fetch_block_transactions()
            .returning(|_| Ok(vec![raw_tx(1, 8, ALICE, post_input("hi"), vec![feed_pointer_log(0)])]));
        let engine = engine(ledger);

        let feed = engine.home_feed().await.unwrap();
        assert_eq!(feed.request_more().await.unwrap(), RequestOutcome::Appended(tx_hash(1)));
        assert_eq!(feed.request_more().await.unwrap(), RequestOutcome::Exhausted);
    }

    #[tokio::test]
    async fn test_clear_local_data_empties_cache() {
        let mut ledger = MockLedgerClient::new();
        ledger
            .expect_fetch_transaction()
            .returning(|_| Ok(raw_tx(1, 12, ALICE, post_input("x"), vec![])));
        let engine = engine(ledger);
        engine.transaction_item(tx_hash(1)).await.unwrap();
        assert!(!engine.cache().is_empty());

        engine.clear_local_data().await.unwrap();
        assert!(engine.cache().is_empty());
    }
}
