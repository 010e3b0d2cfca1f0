//! HTTP feed client
//!
//! One fetch per call, no internal retry: retry and backoff policy belong
//! to the task supervisor.

use crate::feed::types::{FeedError, RawRound, RoundSnapshot};
use async_trait::async_trait;
use std::time::Duration;

const USER_AGENT: &str = concat!("tipcast/", env!("CARGO_PKG_VERSION"));
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Source of round snapshots for a feed
///
/// The production implementation is `HttpFeedClient`; tests substitute
/// scripted sources.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch the latest round snapshot for the given feed
    async fn fetch(&self, feed: &str) -> Result<RoundSnapshot, FeedError>;
}

/// Feed client querying `{base_url}/{feed}/latest`
pub struct HttpFeedClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpFeedClient {
    pub fn new(base_url: &str) -> Result<Self, FeedError> {
        Self::with_timeout(base_url, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, FeedError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| FeedError::BadPayload(format!("client build failed: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl FeedSource for HttpFeedClient {
    async fn fetch(&self, feed: &str) -> Result<RoundSnapshot, FeedError> {
        let url = format!("{}/{}/latest", self.base_url, feed);

        tracing::debug!(feed = %feed, url = %url, "Fetching round snapshot");

        let response = self.http_client.get(&url).send().await.map_err(|e| {
            // Transport failures (refused connections included) fold into
            // the timeout bucket; the underlying cause stays in the log.
            tracing::warn!(feed = %feed, error = %e, "Feed request failed");
            FeedError::Timeout
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::BadStatus(status.as_u16()));
        }

        let raw: RawRound = response
            .json()
            .await
            .map_err(|e| FeedError::BadPayload(e.to_string()))?;

        raw.validate()
    }
}
