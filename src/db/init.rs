//! Database initialization
//!
//! Opens (or creates) the SQLite database and brings the schema up to date.
//! All tables are created with IF NOT EXISTS so initialization is safe to
//! run on every startup.

use crate::error::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Open the database at `path`, creating the file and parent directory if
/// needed, and initialize the schema.
pub async fn init_database(path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Some(Duration::from_secs(60)))
        .connect(&format!("sqlite:{}?mode=rwc", path.display()))
        .await?;

    init_schema(&pool).await?;
    init_settings_defaults(&pool).await?;

    info!("Database initialized at {}", path.display());
    Ok(pool)
}

/// Create all tables if they do not exist.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS licenses (
            id TEXT PRIMARY KEY,
            max_uses INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            expires_at TEXT,
            active INTEGER NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS license_uses (
            license_id TEXT NOT NULL,
            subscriber_id INTEGER NOT NULL,
            redeemed_at TEXT NOT NULL,
            PRIMARY KEY (license_id, subscriber_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS subscriptions (
            subscriber_id INTEGER NOT NULL,
            feed TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 0,
            license_id TEXT,
            PRIMARY KEY (subscriber_id, feed)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS accuracy (
            feed TEXT NOT NULL,
            subscriber_id INTEGER NOT NULL,
            correct INTEGER NOT NULL DEFAULT 0,
            total INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (feed, subscriber_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Insert default settings for any keys not already present. Existing values
/// are never overwritten.
pub async fn init_settings_defaults(pool: &SqlitePool) -> Result<()> {
    let defaults = vec![
        (
            "poll_interval_secs",
            crate::config::DEFAULT_POLL_INTERVAL_SECS.to_string(),
        ),
        (
            "error_backoff_secs",
            crate::config::DEFAULT_ERROR_BACKOFF_SECS.to_string(),
        ),
        (
            "max_consecutive_errors",
            crate::config::DEFAULT_MAX_CONSECUTIVE_ERRORS.to_string(),
        ),
        (
            "feed_freshness_ms",
            crate::config::DEFAULT_FEED_FRESHNESS_MS.to_string(),
        ),
        (
            "send_spacing_ms",
            crate::config::DEFAULT_SEND_SPACING_MS.to_string(),
        ),
    ];

    for (key, value) in defaults {
        let exists: Option<(String,)> =
            sqlx::query_as("SELECT key FROM settings WHERE key = ?")
                .bind(key)
                .fetch_optional(pool)
                .await?;

        if exists.is_none() {
            sqlx::query("INSERT INTO settings (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(value)
                .execute(pool)
                .await?;
        }
    }

    Ok(())
}
