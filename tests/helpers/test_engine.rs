//! Test engine wrapper for integration tests
//!
//! Builds the whole engine against an in-memory database, with a scripted
//! feed source and a recording sink standing in for the two HTTP edges.
//! Poll timing is compressed so lifecycle transitions happen within
//! milliseconds instead of seconds.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::Router;
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use tokio::sync::broadcast;

use tipcast::accuracy::AccuracyTracker;
use tipcast::api::{create_router, AppContext};
use tipcast::db::init_schema;
use tipcast::dispatch::{Dispatcher, NotificationSink, SinkError};
use tipcast::events::{EngineEvent, EventBus};
use tipcast::feed::{FeedError, FeedHub, FeedSource, Outcome, RoundSnapshot};
use tipcast::history::SessionHistory;
use tipcast::licensing::LicenseStore;
use tipcast::registry::SubscriberRegistry;
use tipcast::supervisor::{Supervisor, SupervisorConfig, TaskContext, TaskState};

/// Feed source whose current answer is set by the test
///
/// Every fetch returns the most recently posted round (or failure), the
/// same way a real feed keeps answering with the latest closed round until
/// the next session lands.
pub struct ScriptedFeed {
    current: Mutex<Result<RoundSnapshot, FeedError>>,
    fetches: AtomicUsize,
}

impl ScriptedFeed {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(Ok(RoundSnapshot {
                session_id: 1,
                outcome: Outcome::Over,
                dice: None,
                total: None,
            })),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Every poll from now on observes this round
    pub fn post_round(&self, session_id: u64, outcome: Outcome) {
        *self.current.lock().unwrap() = Ok(RoundSnapshot {
            session_id,
            outcome,
            dice: None,
            total: None,
        });
    }

    /// Like `post_round`, with dice detail for message content checks
    pub fn post_round_with_dice(&self, session_id: u64, outcome: Outcome, dice: [u8; 3]) {
        let total: u8 = dice.iter().sum();
        *self.current.lock().unwrap() = Ok(RoundSnapshot {
            session_id,
            outcome,
            dice: Some(dice),
            total: Some(total),
        });
    }

    /// Every poll from now on fails with this error
    pub fn post_failure(&self, error: FeedError) {
        *self.current.lock().unwrap() = Err(error);
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeedSource for ScriptedFeed {
    async fn fetch(&self, _feed: &str) -> Result<RoundSnapshot, FeedError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.current.lock().unwrap().clone()
    }
}

/// Notification sink that records deliveries instead of sending them
pub struct RecordingSink {
    deliveries: Mutex<Vec<(i64, String)>>,
    failing: Mutex<Vec<i64>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            deliveries: Mutex::new(Vec::new()),
            failing: Mutex::new(Vec::new()),
        }
    }

    /// Reject every delivery to `recipient` from now on
    pub fn fail_recipient(&self, recipient: i64) {
        self.failing.lock().unwrap().push(recipient);
    }

    pub fn deliveries(&self) -> Vec<(i64, String)> {
        self.deliveries.lock().unwrap().clone()
    }

    /// Texts delivered to one recipient, in delivery order
    pub fn texts_for(&self, recipient: i64) -> Vec<String> {
        self.deliveries
            .lock()
            .unwrap()
            .iter()
            .filter(|(r, _)| *r == recipient)
            .map(|(_, t)| t.clone())
            .collect()
    }

    /// Poll until a delivery to `recipient` contains `needle`
    pub async fn wait_for_text(
        &self,
        recipient: i64,
        needle: &str,
        timeout: Duration,
    ) -> Option<String> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(text) = self
                .texts_for(recipient)
                .into_iter()
                .find(|t| t.contains(needle))
            {
                return Some(text);
            }
            if Instant::now() > deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn deliver(&self, recipient: i64, text: &str) -> Result<(), SinkError> {
        if self.failing.lock().unwrap().contains(&recipient) {
            return Err(SinkError::Delivery(recipient, "scripted failure".to_string()));
        }
        self.deliveries
            .lock()
            .unwrap()
            .push((recipient, text.to_string()));
        Ok(())
    }
}

/// Full engine instance wired to a scripted feed and a recording sink
pub struct TestEngine {
    router: Router,
    pub supervisor: Arc<Supervisor>,
    pub licenses: Arc<LicenseStore>,
    pub registry: Arc<SubscriberRegistry>,
    pub accuracy: Arc<AccuracyTracker>,
    pub history: Arc<SessionHistory>,
    pub bus: EventBus,
    pub feed: Arc<ScriptedFeed>,
    pub sink: Arc<RecordingSink>,
    pub db_pool: Pool<Sqlite>,
}

impl TestEngine {
    /// Start an engine against an in-memory database with fast poll timing
    pub async fn start() -> Result<Self, Box<dyn std::error::Error>> {
        let db_pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        init_schema(&db_pool).await?;

        let licenses = Arc::new(LicenseStore::load(db_pool.clone()).await?);
        let registry =
            Arc::new(SubscriberRegistry::load(db_pool.clone(), Arc::clone(&licenses)).await?);
        let accuracy = Arc::new(AccuracyTracker::load(db_pool.clone()).await?);
        let history = Arc::new(SessionHistory::new());

        let feed = Arc::new(ScriptedFeed::new());
        let hub = Arc::new(FeedHub::new(
            Arc::clone(&feed) as Arc<dyn FeedSource>,
            Duration::from_millis(1),
        ));

        let sink = Arc::new(RecordingSink::new());
        let bus = EventBus::new(256);
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&sink) as Arc<dyn NotificationSink>,
            bus.clone(),
        ));

        let supervisor = Arc::new(Supervisor::new(
            TaskContext {
                licenses: Arc::clone(&licenses),
                registry: Arc::clone(&registry),
                hub,
                history: Arc::clone(&history),
                accuracy: Arc::clone(&accuracy),
                dispatcher,
                sink: Arc::clone(&sink) as Arc<dyn NotificationSink>,
                bus: bus.clone(),
            },
            SupervisorConfig {
                poll_interval: Duration::from_millis(5),
                error_backoff: Duration::from_millis(5),
                max_consecutive_errors: 3,
            },
        ));

        let router = create_router(AppContext {
            licenses: Arc::clone(&licenses),
            supervisor: Arc::clone(&supervisor),
            accuracy: Arc::clone(&accuracy),
            history: Arc::clone(&history),
            bus: bus.clone(),
        });

        Ok(TestEngine {
            router,
            supervisor,
            licenses,
            registry,
            accuracy,
            history,
            bus,
            feed,
            sink,
            db_pool,
        })
    }

    /// Subscribe to engine events
    pub fn subscribe_events(&self) -> EventStream {
        EventStream {
            receiver: self.bus.subscribe(),
        }
    }

    /// Make an HTTP request against the engine's router
    pub async fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<Value>,
    ) -> Result<(axum::http::StatusCode, Option<Value>), Box<dyn std::error::Error>> {
        use axum::body::Body;
        use axum::http::{Method, Request};
        use tower::Service;

        let method = match method {
            "GET" => Method::GET,
            "POST" => Method::POST,
            "DELETE" => Method::DELETE,
            _ => return Err(format!("Unsupported method: {}", method).into()),
        };

        let mut builder = Request::builder().method(method).uri(path);
        if body.is_some() {
            builder = builder.header("content-type", "application/json");
        }

        let request = match body {
            Some(json_body) => builder.body(Body::from(json_body.to_string()))?,
            None => builder.body(Body::empty())?,
        };

        let response = self.router.clone().call(request).await?;
        let status = response.status();

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        let json_body = if bytes.is_empty() {
            None
        } else {
            Some(serde_json::from_slice(&bytes)?)
        };

        Ok((status, json_body))
    }

    /// Poll until the task for (subscriber, feed) reaches `expected`
    pub async fn wait_for_task_state(
        &self,
        subscriber: i64,
        feed: &str,
        expected: TaskState,
        timeout: Duration,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.supervisor.state_of(subscriber, feed).await == Some(expected) {
                return true;
            }
            if Instant::now() > deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

/// Engine event stream wrapper
pub struct EventStream {
    pub receiver: broadcast::Receiver<EngineEvent>,
}

impl EventStream {
    /// Wait for the next event with a timeout
    pub async fn next_timeout(&mut self, timeout: Duration) -> Option<EngineEvent> {
        tokio::time::timeout(timeout, self.receiver.recv())
            .await
            .ok()
            .and_then(|r| r.ok())
    }

    /// Wait for the next event of a specific type
    pub async fn wait_for(&mut self, event_type: &str, timeout: Duration) -> Option<EngineEvent> {
        let deadline = Instant::now() + timeout;

        loop {
            if Instant::now() > deadline {
                return None;
            }

            let remaining = deadline.duration_since(Instant::now());
            if let Some(event) = self.next_timeout(remaining).await {
                if event.event_type() == event_type {
                    return Some(event);
                }
            } else {
                return None;
            }
        }
    }

    /// Collect `count` events matching a type
    pub async fn take_matching(
        &mut self,
        event_type: &str,
        count: usize,
        timeout: Duration,
    ) -> Option<Vec<EngineEvent>> {
        let mut events = Vec::new();
        let deadline = Instant::now() + timeout;

        while events.len() < count {
            if Instant::now() > deadline {
                return None;
            }

            let remaining = deadline.duration_since(Instant::now());
            if let Some(event) = self.next_timeout(remaining).await {
                if event.event_type() == event_type {
                    events.push(event);
                }
            } else {
                return None;
            }
        }

        Some(events)
    }
}
