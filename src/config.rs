//! Configuration loading
//!
//! Transport settings (database path, bind address, upstream URLs) resolve
//! once at startup with the priority order: command-line argument, then
//! environment variable, then TOML config file, then compiled default.
//! Timing knobs live in the settings table so they survive restarts; a
//! value given on the command line or in the file overrides the table and
//! is written back to it.

use crate::db;
use crate::error::{Error, Result};
use clap::Parser;
use serde::Deserialize;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_DB_PATH: &str = "tipcast.db";
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:5750";
pub const DEFAULT_FEED_BASE_URL: &str = "http://127.0.0.1:8900";
pub const DEFAULT_PUSH_URL: &str = "http://127.0.0.1:8901/notify";

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 4;
pub const DEFAULT_ERROR_BACKOFF_SECS: u64 = 5;
pub const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 3;
pub const DEFAULT_FEED_FRESHNESS_MS: u64 = 2000;
pub const DEFAULT_SEND_SPACING_MS: u64 = 100;

/// Command-line arguments. Every flag can also come from the environment.
#[derive(Parser, Debug, Default)]
#[command(name = "tipcast", version, about = "Session-gated prediction broadcast daemon")]
pub struct Args {
    /// Path to a TOML config file
    #[arg(long, env = "TIPCAST_CONFIG")]
    pub config: Option<PathBuf>,

    /// SQLite database path
    #[arg(long, env = "TIPCAST_DB")]
    pub db_path: Option<PathBuf>,

    /// Bind address for the admin API
    #[arg(long, env = "TIPCAST_BIND")]
    pub bind_addr: Option<String>,

    /// Base URL of the upstream round feed
    #[arg(long, env = "TIPCAST_FEED_URL")]
    pub feed_base_url: Option<String>,

    /// URL of the outbound push gateway
    #[arg(long, env = "TIPCAST_PUSH_URL")]
    pub push_url: Option<String>,
}

/// Optional values read from the TOML config file.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    db_path: Option<PathBuf>,
    bind_addr: Option<String>,
    feed_base_url: Option<String>,
    push_url: Option<String>,
    poll_interval_secs: Option<u64>,
    error_backoff_secs: Option<u64>,
    max_consecutive_errors: Option<u32>,
    feed_freshness_ms: Option<u64>,
    send_spacing_ms: Option<u64>,
}

impl FileConfig {
    fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        toml::from_str(&content).map_err(|e| {
            Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
        })
    }
}

/// Resolved startup configuration. Timing fields stay `None` unless the
/// operator pinned them; the effective values come from [`load_timings`].
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub bind_addr: String,
    pub feed_base_url: String,
    pub push_url: String,
    pub poll_interval_secs: Option<u64>,
    pub error_backoff_secs: Option<u64>,
    pub max_consecutive_errors: Option<u32>,
    pub feed_freshness_ms: Option<u64>,
    pub send_spacing_ms: Option<u64>,
}

impl Config {
    pub fn resolve(args: &Args) -> Result<Self> {
        let file = match &args.config {
            Some(path) => FileConfig::load(path)?,
            None => {
                let default_path = Path::new("tipcast.toml");
                if default_path.exists() {
                    FileConfig::load(default_path)?
                } else {
                    FileConfig::default()
                }
            }
        };

        Ok(Self {
            db_path: args
                .db_path
                .clone()
                .or(file.db_path)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH)),
            bind_addr: args
                .bind_addr
                .clone()
                .or(file.bind_addr)
                .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            feed_base_url: args
                .feed_base_url
                .clone()
                .or(file.feed_base_url)
                .unwrap_or_else(|| DEFAULT_FEED_BASE_URL.to_string()),
            push_url: args
                .push_url
                .clone()
                .or(file.push_url)
                .unwrap_or_else(|| DEFAULT_PUSH_URL.to_string()),
            poll_interval_secs: file.poll_interval_secs,
            error_backoff_secs: file.error_backoff_secs,
            max_consecutive_errors: file.max_consecutive_errors,
            feed_freshness_ms: file.feed_freshness_ms,
            send_spacing_ms: file.send_spacing_ms,
        })
    }
}

/// Effective timing values after merging config overrides with the
/// settings table.
#[derive(Debug, Clone, Copy)]
pub struct Timings {
    pub poll_interval: Duration,
    pub error_backoff: Duration,
    pub max_consecutive_errors: u32,
    pub feed_freshness: Duration,
    pub send_spacing: Duration,
}

/// Merge the config's pinned timing values with the settings table. A
/// pinned value is written back so the table always shows what is running.
pub async fn load_timings(pool: &SqlitePool, config: &Config) -> Result<Timings> {
    let poll_interval_secs = effective_setting(
        pool,
        "poll_interval_secs",
        config.poll_interval_secs,
        DEFAULT_POLL_INTERVAL_SECS,
    )
    .await?;
    let error_backoff_secs = effective_setting(
        pool,
        "error_backoff_secs",
        config.error_backoff_secs,
        DEFAULT_ERROR_BACKOFF_SECS,
    )
    .await?;
    let max_consecutive_errors = effective_setting(
        pool,
        "max_consecutive_errors",
        config.max_consecutive_errors,
        DEFAULT_MAX_CONSECUTIVE_ERRORS,
    )
    .await?;
    let feed_freshness_ms = effective_setting(
        pool,
        "feed_freshness_ms",
        config.feed_freshness_ms,
        DEFAULT_FEED_FRESHNESS_MS,
    )
    .await?;
    let send_spacing_ms = effective_setting(
        pool,
        "send_spacing_ms",
        config.send_spacing_ms,
        DEFAULT_SEND_SPACING_MS,
    )
    .await?;

    Ok(Timings {
        poll_interval: Duration::from_secs(poll_interval_secs),
        error_backoff: Duration::from_secs(error_backoff_secs),
        max_consecutive_errors,
        feed_freshness: Duration::from_millis(feed_freshness_ms),
        send_spacing: Duration::from_millis(send_spacing_ms),
    })
}

async fn effective_setting<T>(
    pool: &SqlitePool,
    key: &str,
    pinned: Option<T>,
    default: T,
) -> Result<T>
where
    T: std::str::FromStr + ToString + Copy,
    T::Err: std::fmt::Display,
{
    match pinned {
        Some(value) => {
            db::settings::set_setting(pool, key, value.to_string()).await?;
            Ok(value)
        }
        None => Ok(db::settings::get_setting_or(pool, key, default).await),
    }
}
