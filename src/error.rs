//! Error types for tipcast
//!
//! One thiserror enum per concern, folded into the crate-wide `Error`.

use crate::feed::FeedError;
use crate::licensing::LicenseError;
use thiserror::Error;

/// Main error type for the tipcast daemon
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database connection or query errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// HTTP server errors
    #[error("HTTP server error: {0}")]
    Http(String),

    /// License store errors (creation, redemption, revocation)
    #[error(transparent)]
    License(#[from] LicenseError),

    /// Feed fetch errors
    #[error(transparent)]
    Feed(#[from] FeedError),

    /// Task supervisor errors
    #[error("Task error: {0}")]
    Task(String),

    /// No valid license covers the (subscriber, feed) pair
    #[error("Subscriber {subscriber} holds no valid license for feed '{feed}'")]
    Unlicensed { subscriber: i64, feed: String },

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience Result type using the tipcast Error
pub type Result<T> = std::result::Result<T, Error>;
