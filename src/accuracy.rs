//! Accuracy tracker
//!
//! Scores published predictions against the round that follows them. Each
//! (feed, subscriber) pair holds at most one pending prediction; recording a
//! new one overwrites whatever was still open, so a skipped round is simply
//! never scored. Resolved counters persist across restarts, pending
//! predictions do not.

use crate::db;
use crate::error::Result;
use crate::feed::Outcome;
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy)]
struct PendingPrediction {
    session_id: u64,
    outcome: Outcome,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AccuracyCounter {
    pub correct: u64,
    pub total: u64,
}

impl AccuracyCounter {
    /// Fraction of scored predictions that were correct, 0 when none were.
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }
}

type TrackerKey = (String, i64);

/// Per-subscriber prediction scoring, backed by the accuracy table.
pub struct AccuracyTracker {
    pool: SqlitePool,
    pending: RwLock<HashMap<TrackerKey, PendingPrediction>>,
    counters: RwLock<HashMap<TrackerKey, AccuracyCounter>>,
}

impl AccuracyTracker {
    /// Load resolved counters from the database. Pending predictions always
    /// start empty.
    pub async fn load(pool: SqlitePool) -> Result<Self> {
        let rows = db::accuracy::load_all(&pool).await?;

        let mut counters = HashMap::with_capacity(rows.len());
        for row in rows {
            counters.insert(
                (row.feed, row.subscriber_id),
                AccuracyCounter {
                    correct: row.correct as u64,
                    total: row.total as u64,
                },
            );
        }

        Ok(Self {
            pool,
            pending: RwLock::new(HashMap::new()),
            counters: RwLock::new(counters),
        })
    }

    /// Store the prediction published after round `session_id`, replacing
    /// any unresolved one for the same (feed, subscriber).
    pub async fn record_prediction(
        &self,
        feed: &str,
        subscriber: i64,
        session_id: u64,
        outcome: Outcome,
    ) {
        let mut pending = self.pending.write().await;
        pending.insert(
            (feed.to_string(), subscriber),
            PendingPrediction {
                session_id,
                outcome,
            },
        );
    }

    /// Score the pending prediction against the freshly observed round.
    /// Returns the verdict when a prediction from an earlier round was open,
    /// `None` when there was nothing to score. A wrong call still counts
    /// toward the total.
    pub async fn resolve(
        &self,
        feed: &str,
        subscriber: i64,
        new_session_id: u64,
        actual: Outcome,
    ) -> Result<Option<bool>> {
        let key = (feed.to_string(), subscriber);

        let resolved = {
            let mut pending = self.pending.write().await;
            match pending.get(&key) {
                Some(p) if p.session_id < new_session_id => {
                    let p = *p;
                    pending.remove(&key);
                    p
                }
                // The open prediction is for this round or later; leave it.
                _ => return Ok(None),
            }
        };

        let was_correct = resolved.outcome == actual;

        let mut counters = self.counters.write().await;
        let counter = counters.entry(key.clone()).or_default();
        let updated = AccuracyCounter {
            correct: counter.correct + u64::from(was_correct),
            total: counter.total + 1,
        };

        db::accuracy::upsert_counter(
            &self.pool,
            feed,
            subscriber,
            updated.correct as i64,
            updated.total as i64,
        )
        .await?;
        *counter = updated;

        Ok(Some(was_correct))
    }

    /// Correct/total ratio for one subscriber on one feed, 0 when nothing
    /// has been scored yet.
    pub async fn accuracy(&self, feed: &str, subscriber: i64) -> f64 {
        self.stats(feed, subscriber).await.ratio()
    }

    pub async fn stats(&self, feed: &str, subscriber: i64) -> AccuracyCounter {
        let counters = self.counters.read().await;
        counters
            .get(&(feed.to_string(), subscriber))
            .copied()
            .unwrap_or_default()
    }

    /// Combined counters across every subscriber on `feed`.
    pub async fn feed_stats(&self, feed: &str) -> AccuracyCounter {
        let counters = self.counters.read().await;
        let mut combined = AccuracyCounter::default();
        for ((f, _), counter) in counters.iter() {
            if f == feed {
                combined.correct += counter.correct;
                combined.total += counter.total;
            }
        }
        combined
    }

    /// Every counter, keyed by (feed, subscriber), for the admin API.
    pub async fn all_stats(&self) -> Vec<(String, i64, AccuracyCounter)> {
        let counters = self.counters.read().await;
        let mut stats: Vec<(String, i64, AccuracyCounter)> = counters
            .iter()
            .map(|((feed, subscriber), counter)| (feed.clone(), *subscriber, *counter))
            .collect();
        stats.sort_by(|a, b| (&a.0, a.1).cmp(&(&b.0, b.1)));
        stats
    }
}
