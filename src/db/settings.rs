//! Settings table access
//!
//! Typed get/set over the key-value settings table. Values are stored as
//! TEXT and parsed on read.

use crate::error::{Error, Result};
use sqlx::SqlitePool;
use std::fmt::Display;
use std::str::FromStr;
use tracing::warn;

/// Read a setting and parse it into `T`. Returns `Ok(None)` when the key is
/// absent, and an error when the stored value does not parse.
pub async fn get_setting<T>(pool: &SqlitePool, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;

    match row {
        Some((value,)) => value
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::Config(format!("Invalid value for setting '{}': {}", key, e))),
        None => Ok(None),
    }
}

/// Read a setting, falling back to `default` when the key is absent or the
/// stored value does not parse.
pub async fn get_setting_or<T>(pool: &SqlitePool, key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: Display,
{
    match get_setting(pool, key).await {
        Ok(Some(value)) => value,
        Ok(None) => default,
        Err(e) => {
            warn!("Falling back to default for setting '{}': {}", key, e);
            default
        }
    }
}

/// Write a setting, replacing any existing value.
pub async fn set_setting<T: ToString>(pool: &SqlitePool, key: &str, value: T) -> Result<()> {
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value.to_string())
    .execute(pool)
    .await?;

    Ok(())
}
