//! Bounded per-feed history of observed rounds
//!
//! The history is the input to prediction and pattern display. Appends are
//! de-duplicated by session id (a feed is polled far more often than it
//! produces rounds) and monotonic: an id at or below the newest stored one
//! is ignored. Capacity is fixed; the oldest record is evicted first.

use crate::feed::{Outcome, RoundSnapshot};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

/// Rounds kept per feed
pub const HISTORY_CAPACITY: usize = 30;

/// Trailing rounds summarized for pattern display
pub const PATTERN_WINDOW: usize = 8;

/// One observed round
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionRecord {
    pub session_id: u64,
    pub outcome: Outcome,
    pub dice: Option<[u8; 3]>,
    pub total: Option<u8>,
    pub observed_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn from_snapshot(snapshot: &RoundSnapshot) -> Self {
        Self {
            session_id: snapshot.session_id,
            outcome: snapshot.outcome,
            dice: snapshot.dice,
            total: snapshot.total,
            observed_at: Utc::now(),
        }
    }
}

/// Where the recent window is leaning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Trend {
    Strongly(Outcome),
    Leaning(Outcome),
    Balanced,
}

impl Trend {
    /// Phrase used in notification text
    pub fn describe(&self) -> String {
        match self {
            Trend::Strongly(o) => format!("strongly favoring {}", o.label()),
            Trend::Leaning(o) => format!("leaning {}", o.label()),
            Trend::Balanced => "balanced".to_string(),
        }
    }
}

/// Tally of the trailing window, used by notification rendering and the
/// pattern endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatternSummary {
    /// Number of rounds actually summarized (≤ PATTERN_WINDOW)
    pub window: usize,
    pub over: usize,
    pub under: usize,
    /// Oldest-first symbol string, e.g. "OOUOUUOO"
    pub symbols: String,
    pub trend: Trend,
}

/// Shared history of recent rounds, one ring per feed
pub struct SessionHistory {
    capacity: usize,
    feeds: RwLock<HashMap<String, VecDeque<SessionRecord>>>,
}

impl SessionHistory {
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            feeds: RwLock::new(HashMap::new()),
        }
    }

    /// Append a record unless its session id repeats or precedes the
    /// newest stored one
    ///
    /// Returns whether the record was new for this feed. With several
    /// tasks polling the same feed, exactly one of them sees `true` per
    /// session; that task is the one that publishes the broadcast.
    pub async fn append(&self, feed: &str, record: SessionRecord) -> bool {
        let mut feeds = self.feeds.write().await;
        let ring = feeds.entry(feed.to_string()).or_default();

        if let Some(last) = ring.back() {
            if record.session_id <= last.session_id {
                return false;
            }
        }

        ring.push_back(record);
        if ring.len() > self.capacity {
            ring.pop_front();
        }
        true
    }

    /// Trailing outcomes, most recent last, at most `n`
    pub async fn recent(&self, feed: &str, n: usize) -> Vec<Outcome> {
        let feeds = self.feeds.read().await;
        match feeds.get(feed) {
            Some(ring) => {
                let skip = ring.len().saturating_sub(n);
                ring.iter().skip(skip).map(|r| r.outcome).collect()
            }
            None => Vec::new(),
        }
    }

    /// All stored outcomes for a feed, oldest first
    pub async fn outcomes(&self, feed: &str) -> Vec<Outcome> {
        self.recent(feed, self.capacity).await
    }

    /// Number of stored rounds for a feed
    pub async fn len(&self, feed: &str) -> usize {
        let feeds = self.feeds.read().await;
        feeds.get(feed).map_or(0, |ring| ring.len())
    }

    /// Tally the trailing `PATTERN_WINDOW` rounds
    pub async fn pattern_summary(&self, feed: &str) -> PatternSummary {
        let tail = self.recent(feed, PATTERN_WINDOW).await;

        let over = tail.iter().filter(|o| **o == Outcome::Over).count();
        let under = tail.len() - over;
        let symbols: String = tail.iter().map(|o| o.symbol()).collect();

        let trend = if over > under {
            if over > 6 {
                Trend::Strongly(Outcome::Over)
            } else if over - under <= 1 {
                Trend::Balanced
            } else {
                Trend::Leaning(Outcome::Over)
            }
        } else if under > over {
            if under > 6 {
                Trend::Strongly(Outcome::Under)
            } else if under - over <= 1 {
                Trend::Balanced
            } else {
                Trend::Leaning(Outcome::Under)
            }
        } else {
            Trend::Balanced
        };

        PatternSummary {
            window: tail.len(),
            over,
            under,
            symbols,
            trend,
        }
    }
}

impl Default for SessionHistory {
    fn default() -> Self {
        Self::new()
    }
}
