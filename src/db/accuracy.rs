//! Accuracy table access
//!
//! Resolved prediction counters per (feed, subscriber). Pending predictions
//! are kept in memory only; a prediction outstanding at shutdown is simply
//! never scored.

use crate::error::Result;
use sqlx::SqlitePool;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AccuracyRow {
    pub feed: String,
    pub subscriber_id: i64,
    pub correct: i64,
    pub total: i64,
}

pub async fn load_all(pool: &SqlitePool) -> Result<Vec<AccuracyRow>> {
    let rows: Vec<AccuracyRow> = sqlx::query_as(
        "SELECT feed, subscriber_id, correct, total FROM accuracy ORDER BY rowid",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Write the current counter values for one (feed, subscriber) pair.
pub async fn upsert_counter(
    pool: &SqlitePool,
    feed: &str,
    subscriber_id: i64,
    correct: i64,
    total: i64,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO accuracy (feed, subscriber_id, correct, total)
         VALUES (?, ?, ?, ?)
         ON CONFLICT(feed, subscriber_id)
         DO UPDATE SET correct = excluded.correct, total = excluded.total",
    )
    .bind(feed)
    .bind(subscriber_id)
    .bind(correct)
    .bind(total)
    .execute(pool)
    .await?;

    Ok(())
}
