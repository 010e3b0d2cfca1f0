//! Subscription table access

use crate::error::Result;
use sqlx::SqlitePool;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SubscriptionRow {
    pub subscriber_id: i64,
    pub feed: String,
    pub active: bool,
    pub license_id: Option<String>,
}

pub async fn load_all(pool: &SqlitePool) -> Result<Vec<SubscriptionRow>> {
    let rows: Vec<SubscriptionRow> = sqlx::query_as(
        "SELECT subscriber_id, feed, active, license_id FROM subscriptions ORDER BY rowid",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Insert or update a subscription keyed by (subscriber, feed).
pub async fn upsert(pool: &SqlitePool, row: &SubscriptionRow) -> Result<()> {
    sqlx::query(
        "INSERT INTO subscriptions (subscriber_id, feed, active, license_id)
         VALUES (?, ?, ?, ?)
         ON CONFLICT(subscriber_id, feed)
         DO UPDATE SET active = excluded.active, license_id = excluded.license_id",
    )
    .bind(row.subscriber_id)
    .bind(&row.feed)
    .bind(row.active)
    .bind(&row.license_id)
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init::init_schema;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory pool");
        init_schema(&pool).await.expect("Schema init failed");
        pool
    }

    #[tokio::test]
    async fn test_upsert_inserts_and_loads() {
        let pool = test_pool().await;

        let row = SubscriptionRow {
            subscriber_id: 42,
            feed: "sicbo-a".to_string(),
            active: true,
            license_id: Some("GOLD-1".to_string()),
        };
        upsert(&pool, &row).await.expect("Upsert failed");

        let rows = load_all(&pool).await.expect("Load failed");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].subscriber_id, 42);
        assert_eq!(rows[0].feed, "sicbo-a");
        assert!(rows[0].active);
        assert_eq!(rows[0].license_id.as_deref(), Some("GOLD-1"));
    }

    #[tokio::test]
    async fn test_upsert_updates_existing() {
        let pool = test_pool().await;

        let mut row = SubscriptionRow {
            subscriber_id: 42,
            feed: "sicbo-a".to_string(),
            active: true,
            license_id: Some("GOLD-1".to_string()),
        };
        upsert(&pool, &row).await.expect("Upsert failed");

        row.active = false;
        upsert(&pool, &row).await.expect("Upsert failed");

        let rows = load_all(&pool).await.expect("Load failed");
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].active);
    }
}
