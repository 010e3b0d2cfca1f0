//! Broadcast dispatcher
//!
//! Fans a composed payload out to every active subscriber on a feed. The
//! license gate runs immediately before each send; a subscriber whose
//! license lapsed is deactivated here, told so once, and dropped from the
//! batch. Sink failures are logged and never abort the batch.

use crate::events::{EngineEvent, EventBus};
use crate::registry::SubscriberRegistry;
use crate::render;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Clone, Error)]
pub enum SinkError {
    #[error("Delivery to subscriber {0} failed: {1}")]
    Delivery(i64, String),
}

/// Outbound delivery channel for rendered notification text.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, recipient: i64, text: &str) -> Result<(), SinkError>;
}

/// Counts for one publish batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReport {
    /// Payload deliveries that the sink accepted
    pub sent: u32,
    /// Subscribers inactive by the time their turn came
    pub skipped: u32,
    /// Subscribers deactivated by the pre-send license gate
    pub deactivated: u32,
    /// Payload deliveries the sink rejected
    pub failed: u32,
}

/// Fan-out of one payload to a feed's active subscribers.
pub struct Dispatcher {
    registry: Arc<SubscriberRegistry>,
    sink: Arc<dyn NotificationSink>,
    bus: EventBus,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<SubscriberRegistry>,
        sink: Arc<dyn NotificationSink>,
        bus: EventBus,
    ) -> Self {
        Self {
            registry,
            sink,
            bus,
        }
    }

    /// Send `payload` to every subscriber active on `feed`. The active set
    /// is snapshotted once; each member is re-gated just before their send.
    pub async fn publish(&self, feed: &str, payload: &str) -> PublishReport {
        let mut report = PublishReport::default();

        for subscriber in self.registry.list_active(feed).await {
            if self
                .registry
                .deactivate_if_license_invalid(subscriber, feed)
                .await
            {
                report.deactivated += 1;
                if let Err(e) = self.sink.deliver(subscriber, render::EXPIRED_NOTICE).await {
                    warn!("Access-ended notice not delivered: {}", e);
                }
                self.bus.emit_lossy(EngineEvent::SubscriberDeactivated {
                    subscriber,
                    feed: feed.to_string(),
                    timestamp: Utc::now(),
                });
                continue;
            }

            if !self.registry.is_active(subscriber, feed).await {
                report.skipped += 1;
                continue;
            }

            match self.sink.deliver(subscriber, payload).await {
                Ok(()) => report.sent += 1,
                Err(e) => {
                    warn!("Broadcast delivery failed, continuing batch: {}", e);
                    report.failed += 1;
                }
            }
        }

        debug!(
            "Broadcast for '{}': {} sent, {} skipped, {} deactivated, {} failed",
            feed, report.sent, report.skipped, report.deactivated, report.failed
        );
        self.bus.emit_lossy(EngineEvent::BroadcastCompleted {
            feed: feed.to_string(),
            report,
            timestamp: Utc::now(),
        });

        report
    }
}

/// Minimum-spacing gate shared by all sends through one sink.
pub struct SendPacer {
    last_send: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl SendPacer {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            last_send: Mutex::new(None),
            min_interval,
        }
    }

    /// Wait until at least `min_interval` has passed since the previous
    /// send, then claim the current slot.
    pub async fn pace(&self) {
        let mut last = self.last_send.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

const USER_AGENT: &str = concat!("tipcast/", env!("CARGO_PKG_VERSION"));
const DEFAULT_SEND_TIMEOUT_SECS: u64 = 10;

/// Delivers notifications as JSON posts to an HTTP push gateway.
pub struct HttpPushSink {
    client: reqwest::Client,
    push_url: String,
    pacer: SendPacer,
}

impl HttpPushSink {
    pub fn new(push_url: &str, send_spacing: Duration) -> crate::error::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(DEFAULT_SEND_TIMEOUT_SECS))
            .build()
            .map_err(|e| crate::error::Error::Http(e.to_string()))?;

        Ok(Self {
            client,
            push_url: push_url.trim_end_matches('/').to_string(),
            pacer: SendPacer::new(send_spacing),
        })
    }
}

#[async_trait]
impl NotificationSink for HttpPushSink {
    async fn deliver(&self, recipient: i64, text: &str) -> Result<(), SinkError> {
        self.pacer.pace().await;

        let body = serde_json::json!({
            "recipient": recipient,
            "text": text,
        });

        let response = self
            .client
            .post(&self.push_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| SinkError::Delivery(recipient, e.to_string()))?;

        if !response.status().is_success() {
            return Err(SinkError::Delivery(
                recipient,
                format!("gateway returned {}", response.status()),
            ));
        }

        Ok(())
    }
}
