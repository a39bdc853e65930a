//! Pagination Controller
//!
//! Drives a merge session on demand. `request_more` is the single mutator of a view's
//! `MergedFeedState`; the loading flag doubles as the mutual-exclusion guard, so
//! overlapping triggers cannot start a second walk.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use alloy::primitives::TxHash;
use tracing::{debug, info, warn};

use crate::classifier::FeedItem;
use crate::error::FeedError;
use crate::merger::FrontierMerger;
use crate::types::{Frontier, LogicalKey};
use crate::walker::{ScanObserver, CACHE_HIT_INDEX};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    Idle,
    Loading,
    Exhausted,
}

/// Status line shown under the feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedStatus {
    Idle,
    Loading { message: String },
    NoMoreItems,
    Failed { message: String, retryable: bool },
}

impl std::fmt::Display for FeedStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedStatus::Idle => write!(f, "idle"),
            FeedStatus::Loading { message } => write!(f, "{}", message),
            FeedStatus::NoMoreItems => write!(f, "no more items"),
            FeedStatus::Failed { message, retryable: true } => write!(f, "error: {} (retry)", message),
            FeedStatus::Failed { message, retryable: false } => write!(f, "error: {}", message),
        }
    }
}

/// Per-view merge state
#[derive(Debug)]
pub struct MergedFeedState {
    pub frontiers: BTreeMap<LogicalKey, Frontier>,
    pub emitted: Vec<FeedItem>,
    pub loading: bool,
    pub exhausted: bool,
    pub status: FeedStatus,
    seen: HashSet<TxHash>,
}

impl MergedFeedState {
    fn new(frontiers: BTreeMap<LogicalKey, Frontier>) -> Self {
        Self {
            frontiers,
            emitted: Vec::new(),
            loading: false,
            exhausted: false,
            status: FeedStatus::Idle,
            seen: HashSet::new(),
        }
    }

    pub fn page_state(&self) -> PageState {
        if self.exhausted {
            PageState::Exhausted
        } else if self.loading {
            PageState::Loading
        } else {
            PageState::Idle
        }
    }
}

/// Read-only projection for rendering
#[derive(Debug, Clone)]
pub struct FeedSnapshot {
    pub items: Vec<FeedItem>,
    pub loading: bool,
    pub exhausted: bool,
    pub status: FeedStatus,
}

/// What a `request_more` call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Appended(TxHash),
    /// Produced an item already present in the view
    Duplicate(TxHash),
    Exhausted,
    /// Another request was in flight; nothing happened
    Busy,
}

fn lock(state: &Mutex<MergedFeedState>) -> MutexGuard<'_, MergedFeedState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Writes scan progress into the view's status, then forwards it
struct ProgressRecorder {
    state: Weak<Mutex<MergedFeedState>>,
    forward: Option<Arc<dyn ScanObserver>>,
}

impl ScanObserver for ProgressRecorder {
    fn on_scan(&self, block_number: u64, index: i64, total: i64) {
        // A closed view has nowhere to record progress.
        if let Some(state) = self.state.upgrade() {
            let message = if index == CACHE_HIT_INDEX {
                format!("syncing block {} from local cache", block_number)
            } else {
                format!("syncing block {} ({}/{})", block_number, index + 1, total)
            };
            let mut state = lock(&state);
            if state.loading {
                state.status = FeedStatus::Loading { message };
            }
        }
        if let Some(forward) = &self.forward {
            forward.on_scan(block_number, index, total);
        }
    }
}

/// Resets the loading flag if a request is dropped mid-walk
struct LoadingGuard {
    state: Arc<Mutex<MergedFeedState>>,
    armed: bool,
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        if self.armed {
            let mut state = lock(&self.state);
            state.loading = false;
            state.status = FeedStatus::Idle;
            debug!("Request cancelled, view back to idle");
        }
    }
}

pub struct PaginationController {
    merger: tokio::sync::Mutex<FrontierMerger>,
    state: Arc<Mutex<MergedFeedState>>,
    observer: Arc<dyn ScanObserver>,
}

impl PaginationController {
    pub fn new(merger: FrontierMerger) -> Self {
        Self::build(merger, None)
    }

    /// Also forward raw scan progress to `observer`
    pub fn with_observer(merger: FrontierMerger, observer: Arc<dyn ScanObserver>) -> Self {
        Self::build(merger, Some(observer))
    }

    fn build(merger: FrontierMerger, forward: Option<Arc<dyn ScanObserver>>) -> Self {
        let mut initial = MergedFeedState::new(merger.frontiers());
        if merger.is_exhausted() {
            initial.exhausted = true;
            initial.status = FeedStatus::NoMoreItems;
        }
        let state = Arc::new(Mutex::new(initial));
        let observer: Arc<dyn ScanObserver> = Arc::new(ProgressRecorder {
            state: Arc::downgrade(&state),
            forward,
        });
        Self {
            merger: tokio::sync::Mutex::new(merger),
            state,
            observer,
        }
    }

    pub fn page_state(&self) -> PageState {
        lock(&self.state).page_state()
    }

    /// Pull one item from the merge session into the view
    ///
    /// No-op unless the view is idle. Errors are recorded in the status and returned;
    /// a retryable error leaves every frontier where it was.
    pub async fn request_more(&self) -> Result<RequestOutcome, FeedError> {
        {
            let mut state = lock(&self.state);
            match state.page_state() {
                PageState::Exhausted => return Ok(RequestOutcome::Exhausted),
                PageState::Loading => return Ok(RequestOutcome::Busy),
                PageState::Idle => {}
            }
            state.loading = true;
            state.status = FeedStatus::Loading {
                message: "loading".to_string(),
            };
        }
        let mut guard = LoadingGuard {
            state: self.state.clone(),
            armed: true,
        };

        let (result, frontiers) = {
            let mut merger = self.merger.lock().await;
            let result = merger.next(&self.observer).await;
            (result, merger.frontiers())
        };

        guard.armed = false;
        let mut state = lock(&self.state);
        state.loading = false;
        state.frontiers = frontiers;

        match result {
            Ok(Some(item)) => {
                let hash = item.hash();
                state.status = FeedStatus::Idle;
                if state.seen.insert(hash) {
                    state.emitted.push(item);
                    Ok(RequestOutcome::Appended(hash))
                } else {
                    debug!(hash = %hash, "Dropped duplicate item");
                    Ok(RequestOutcome::Duplicate(hash))
                }
            }
            Ok(None) => {
                state.exhausted = true;
                state.status = FeedStatus::NoMoreItems;
                info!(items = state.emitted.len(), "Feed exhausted");
                Ok(RequestOutcome::Exhausted)
            }
            Err(e) => {
                warn!(error = %e, retryable = e.is_retryable(), "Feed request failed");
                state.status = FeedStatus::Failed {
                    message: e.to_string(),
                    retryable: e.is_retryable(),
                };
                Err(e)
            }
        }
    }

    /// Request until `count` new items were appended or the feed ends
    ///
    /// Stops at the first error. Returns the number of items appended.
    pub async fn load_page(&self, count: usize) -> Result<usize, FeedError> {
        let mut appended = 0;
        while appended < count {
            match self.request_more().await? {
                RequestOutcome::Appended(_) => appended += 1,
                RequestOutcome::Duplicate(_) => {}
                RequestOutcome::Exhausted | RequestOutcome::Busy => break,
            }
        }
        Ok(appended)
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        let state = lock(&self.state);
        FeedSnapshot {
            items: state.emitted.clone(),
            loading: state.loading,
            exhausted: state.exhausted,
            status: state.status.clone(),
        }
    }

    /// Frontiers as of the last completed request
    pub fn frontiers(&self) -> BTreeMap<LogicalKey, Frontier> {
        lock(&self.state).frontiers.clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.state).emitted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
