//! Event types and event bus for the tipcast engine
//!
//! Every observable state change in the engine is published as an
//! `EngineEvent` on the `EventBus`, which the SSE endpoint streams to
//! connected admin clients.

use crate::dispatch::PublishReport;
use crate::feed::Outcome;
use crate::supervisor::TaskState;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Engine event types
///
/// Events are broadcast via EventBus and can be serialized for SSE
/// transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    /// A new round was observed on a feed
    ///
    /// Emitted once per feed per session, by the task that first appended
    /// the round to the shared history.
    RoundObserved {
        /// Feed identifier
        feed: String,
        /// Session identifier of the new round
        session_id: u64,
        /// Observed outcome
        outcome: Outcome,
        /// When the round was observed
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A prediction was composed and handed to the dispatcher
    PredictionPublished {
        /// Feed identifier
        feed: String,
        /// Session the prediction was made at
        session_id: u64,
        /// Predicted outcome for the next round
        prediction: Outcome,
        /// Bounded confidence percentage
        confidence: u8,
        /// When the prediction was published
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A poll task changed lifecycle state
    ///
    /// Triggers:
    /// - SSE: update task dashboards
    /// - Logs: lifecycle audit trail
    TaskStateChanged {
        /// Subscriber the task belongs to
        subscriber: i64,
        /// Feed the task polls
        feed: String,
        /// New lifecycle state
        state: TaskState,
        /// When the transition happened
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A license was created by an admin
    LicenseCreated {
        /// License id
        id: String,
        /// Maximum distinct redeemers
        max_uses: u32,
        /// Expiry, if the license ever expires
        expires_at: Option<chrono::DateTime<chrono::Utc>>,
        /// When the license was created
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A license was revoked by an admin
    LicenseRevoked {
        /// License id
        id: String,
        /// When the license was revoked
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A subscriber was deactivated because their license lapsed
    SubscriberDeactivated {
        /// Subscriber that lost access
        subscriber: i64,
        /// Feed the subscription covered
        feed: String,
        /// When the deactivation happened
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A broadcast batch finished
    BroadcastCompleted {
        /// Feed the payload was published for
        feed: String,
        /// Delivery counts for the batch
        report: PublishReport,
        /// When the batch finished
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl EngineEvent {
    /// Get event type as string for SSE event naming and filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            EngineEvent::RoundObserved { .. } => "RoundObserved",
            EngineEvent::PredictionPublished { .. } => "PredictionPublished",
            EngineEvent::TaskStateChanged { .. } => "TaskStateChanged",
            EngineEvent::LicenseCreated { .. } => "LicenseCreated",
            EngineEvent::LicenseRevoked { .. } => "LicenseRevoked",
            EngineEvent::SubscriberDeactivated { .. } => "SubscriberDeactivated",
            EngineEvent::BroadcastCompleted { .. } => "BroadcastCompleted",
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Central distribution point for engine-wide events
///
/// Backed by tokio::broadcast: emits never block on slow consumers, any
/// number of receivers can subscribe, a receiver that falls behind sees a
/// Lagged error rather than stalling the sender, and dropped receivers
/// clean themselves up.
///
/// # Examples
///
/// ```
/// use tipcast::events::EventBus;
///
/// let bus = EventBus::new(100);
/// let mut rx = bus.subscribe();
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Anything emitted before the subscription exists is missed.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists,
    /// `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: EngineEvent,
    ) -> Result<usize, broadcast::error::SendError<EngineEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring whether anyone is listening
    ///
    /// Used for events where it is acceptable that no component is
    /// currently subscribed (the SSE stream may have no clients).
    pub fn emit_lossy(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
