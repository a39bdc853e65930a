//! Frontier Merger
//!
//! Interleaves several chain walkers into one stream ordered by `(block_number, creation)`
//! descending. The merger re-selects after every single hop, so a walker passing over
//! non-content transactions never jumps ahead of a walker with a later frontier.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::classifier::FeedItem;
use crate::error::FeedError;
use crate::types::{now_millis, Frontier, LogicalKey};
use crate::walker::{ChainWalker, FeedContext, ScanObserver, WalkOutcome};

pub struct FrontierMerger {
    walkers: BTreeMap<LogicalKey, ChainWalker>,
}

impl FrontierMerger {
    pub fn new(walkers: impl IntoIterator<Item = ChainWalker>) -> Self {
        Self {
            walkers: walkers
                .into_iter()
                .map(|walker| (walker.key().clone(), walker))
                .collect(),
        }
    }

    /// Seed one walker per key from the registry heads, read once
    ///
    /// Each frontier's creation is stamped when its head is learned.
    pub async fn open(context: FeedContext, keys: impl IntoIterator<Item = LogicalKey>) -> Result<Self, FeedError> {
        let mut walkers = Vec::new();
        for key in keys {
            let head = context.ledger.current_head(&key).await?;
            let creation = now_millis();
            debug!(key = %key, head, "Seeded walker");
            walkers.push(ChainWalker::from_head(context.clone(), key, head, creation));
        }
        let merger = Self::new(walkers);
        info!(sources = merger.source_count(), "Opened merge session");
        Ok(merger)
    }

    /// Active frontiers by key
    pub fn frontiers(&self) -> BTreeMap<LogicalKey, Frontier> {
        self.walkers
            .iter()
            .filter_map(|(key, walker)| walker.frontier().map(|f| (key.clone(), f.clone())))
            .collect()
    }

    pub fn is_exhausted(&self) -> bool {
        self.walkers.values().all(ChainWalker::is_exhausted)
    }

    pub fn source_count(&self) -> usize {
        self.walkers.len()
    }

    /// Key of the latest frontier; the first key in order wins a full tie
    fn select(&self) -> Option<LogicalKey> {
        let mut best: Option<&Frontier> = None;
        for frontier in self.walkers.values().filter_map(ChainWalker::frontier) {
            if best.map_or(true, |b| frontier.position() > b.position()) {
                best = Some(frontier);
            }
        }
        best.map(|frontier| frontier.key.clone())
    }

    /// Next item across all sources, `Ok(None)` once every source is exhausted
    ///
    /// An error from one walker is returned as is; the failing walker has already
    /// stopped if the error is not retryable, and the other sources continue on the
    /// next call.
    pub async fn next(&mut self, observer: &Arc<dyn ScanObserver>) -> Result<Option<FeedItem>, FeedError> {
        while let Some(key) = self.select() {
            let Some(walker) = self.walkers.get_mut(&key) else {
                break;
            };
            match walker.advance(observer).await? {
                WalkOutcome::Item(item) => {
                    debug!(key = %key, block = item.block_number(), hash = %item.hash(), "Merged item");
                    return Ok(Some(item));
                }
                WalkOutcome::Skipped | WalkOutcome::Exhausted => continue,
            }
        }
        Ok(None)
    }
}
