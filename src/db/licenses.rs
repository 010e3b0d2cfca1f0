//! License table access
//!
//! Rows for the licenses and license_uses tables. The license store loads
//! everything at startup and writes through on every mutation.

use crate::error::Result;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LicenseRow {
    pub id: String,
    pub max_uses: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub active: bool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LicenseUseRow {
    pub license_id: String,
    pub subscriber_id: i64,
}

/// Load all licenses (in creation order) and all recorded redemptions.
pub async fn load_all(pool: &SqlitePool) -> Result<(Vec<LicenseRow>, Vec<LicenseUseRow>)> {
    let licenses: Vec<LicenseRow> = sqlx::query_as(
        "SELECT id, max_uses, created_at, expires_at, active FROM licenses ORDER BY rowid",
    )
    .fetch_all(pool)
    .await?;

    let uses: Vec<LicenseUseRow> = sqlx::query_as(
        "SELECT license_id, subscriber_id FROM license_uses ORDER BY rowid",
    )
    .fetch_all(pool)
    .await?;

    Ok((licenses, uses))
}

pub async fn insert(pool: &SqlitePool, row: &LicenseRow) -> Result<()> {
    sqlx::query(
        "INSERT INTO licenses (id, max_uses, created_at, expires_at, active)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&row.id)
    .bind(row.max_uses)
    .bind(row.created_at)
    .bind(row.expires_at)
    .bind(row.active)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn set_active(pool: &SqlitePool, id: &str, active: bool) -> Result<()> {
    sqlx::query("UPDATE licenses SET active = ? WHERE id = ?")
        .bind(active)
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn insert_use(
    pool: &SqlitePool,
    license_id: &str,
    subscriber_id: i64,
    redeemed_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO license_uses (license_id, subscriber_id, redeemed_at) VALUES (?, ?, ?)",
    )
    .bind(license_id)
    .bind(subscriber_id)
    .bind(redeemed_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Delete a license and its recorded redemptions atomically.
pub async fn delete(pool: &SqlitePool, id: &str) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM license_uses WHERE license_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    sqlx::query("DELETE FROM licenses WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(())
}

/// Delete every license and every recorded redemption. Returns the number of
/// licenses removed.
pub async fn purge_all(pool: &SqlitePool) -> Result<u64> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM license_uses")
        .execute(&mut *tx)
        .await?;

    let result = sqlx::query("DELETE FROM licenses").execute(&mut *tx).await?;

    tx.commit().await?;

    Ok(result.rows_affected())
}
