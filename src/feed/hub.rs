//! Shared fetch hub
//!
//! Many tasks may poll the same feed (one task per subscriber). The hub
//! collapses their fetches into one upstream call per freshness window:
//! a per-feed mutex serializes fetches, and whichever task arrives while
//! the cached result is still fresh gets the cached result instead of a
//! new upstream call. Errors are cached like successes so that every task
//! observes the same failing tick and counts it against its own error
//! threshold.

use crate::feed::client::FeedSource;
use crate::feed::types::{FeedError, RoundSnapshot};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

struct CacheSlot {
    fetched_at: Instant,
    result: Result<RoundSnapshot, FeedError>,
}

/// Single-flight, freshness-cached front for a `FeedSource`
pub struct FeedHub {
    source: Arc<dyn FeedSource>,
    freshness: Duration,
    slots: RwLock<HashMap<String, Arc<Mutex<Option<CacheSlot>>>>>,
}

impl FeedHub {
    pub fn new(source: Arc<dyn FeedSource>, freshness: Duration) -> Self {
        Self {
            source,
            freshness,
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch the latest snapshot for a feed, served from cache when fresh
    pub async fn fetch(&self, feed: &str) -> Result<RoundSnapshot, FeedError> {
        let slot = self.slot_for(feed).await;

        // Holding the slot lock across the upstream call is what makes
        // concurrent callers single-flight: the second caller waits here
        // and then finds a fresh cache entry.
        let mut guard = slot.lock().await;

        if let Some(cached) = guard.as_ref() {
            if cached.fetched_at.elapsed() < self.freshness {
                return cached.result.clone();
            }
        }

        let result = self.source.fetch(feed).await;
        *guard = Some(CacheSlot {
            fetched_at: Instant::now(),
            result: result.clone(),
        });

        result
    }

    async fn slot_for(&self, feed: &str) -> Arc<Mutex<Option<CacheSlot>>> {
        {
            let slots = self.slots.read().await;
            if let Some(slot) = slots.get(feed) {
                return Arc::clone(slot);
            }
        }

        let mut slots = self.slots.write().await;
        Arc::clone(
            slots
                .entry(feed.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(None))),
        )
    }
}
