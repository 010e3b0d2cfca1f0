//! Task supervisor
//!
//! Owns one poll task per (subscriber, feed) pair and the lifecycle state
//! machine each task moves through: Stopped -> Running -> (Stopped | Expired
//! | Failed). Stopping is cooperative; the caller flips a flag and the loop
//! exits at its next wake-up, within one poll interval.

mod task;

use crate::accuracy::AccuracyTracker;
use crate::dispatch::{Dispatcher, NotificationSink};
use crate::error::{Error, Result};
use crate::events::{EngineEvent, EventBus};
use crate::feed::FeedHub;
use crate::history::SessionHistory;
use crate::licensing::{LicenseError, LicenseStore};
use crate::registry::SubscriberRegistry;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Lifecycle states of a poll task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Stopped,
    Running,
    /// The subscriber's license stopped being valid mid-run.
    Expired,
    /// The feed kept erroring until the task gave up.
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Stopped => "Stopped",
            TaskState::Running => "Running",
            TaskState::Expired => "Expired",
            TaskState::Failed => "Failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

/// Timing knobs for the poll loop.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorConfig {
    pub poll_interval: Duration,
    pub error_backoff: Duration,
    pub max_consecutive_errors: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(4),
            error_backoff: Duration::from_secs(5),
            max_consecutive_errors: 3,
        }
    }
}

/// Shared components a poll task works against.
#[derive(Clone)]
pub struct TaskContext {
    pub licenses: Arc<LicenseStore>,
    pub registry: Arc<SubscriberRegistry>,
    pub hub: Arc<FeedHub>,
    pub history: Arc<SessionHistory>,
    pub accuracy: Arc<AccuracyTracker>,
    pub dispatcher: Arc<Dispatcher>,
    pub sink: Arc<dyn NotificationSink>,
    pub bus: EventBus,
}

struct TaskHandle {
    stop: Arc<AtomicBool>,
    state: Arc<RwLock<TaskState>>,
    join: JoinHandle<()>,
}

/// One row of the admin task listing.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub subscriber: i64,
    pub feed: String,
    pub state: TaskState,
}

type TaskKey = (i64, String);

/// Spawns, tracks, and stops the per-subscriber poll tasks.
pub struct Supervisor {
    ctx: TaskContext,
    config: SupervisorConfig,
    tasks: RwLock<HashMap<TaskKey, TaskHandle>>,
}

impl Supervisor {
    pub fn new(ctx: TaskContext, config: SupervisorConfig) -> Self {
        Self {
            ctx,
            config,
            tasks: RwLock::new(HashMap::new()),
        }
    }

    /// Start a poll task for (subscriber, feed). When `license` is given it
    /// is redeemed first (a redemption the subscriber already holds is fine)
    /// and attached to the subscription. A task already Running is left
    /// alone; a task in any terminal state is replaced by a fresh one.
    pub async fn start(
        &self,
        subscriber: i64,
        feed: &str,
        license: Option<&str>,
    ) -> Result<StartOutcome> {
        let key = (subscriber, feed.to_string());
        let mut tasks = self.tasks.write().await;

        if let Some(handle) = tasks.get(&key) {
            if *handle.state.read().await == TaskState::Running {
                return Ok(StartOutcome::AlreadyRunning);
            }
        }

        if let Some(id) = license {
            match self.ctx.licenses.redeem(id, subscriber).await {
                Ok(_) => {}
                Err(Error::License(LicenseError::AlreadyRedeemed(_, _))) => {}
                Err(e) => return Err(e),
            }
            self.ctx.registry.attach_license(subscriber, feed, id).await;
        }

        let attached = self.ctx.registry.license_of(subscriber, feed).await;
        let valid = match attached {
            Some(id) => self.ctx.licenses.is_valid(&id, subscriber).await,
            None => false,
        };
        if !valid {
            return Err(Error::Unlicensed {
                subscriber,
                feed: feed.to_string(),
            });
        }

        self.ctx.registry.set_active(subscriber, feed, true).await;

        let stop = Arc::new(AtomicBool::new(false));
        let state = Arc::new(RwLock::new(TaskState::Running));
        let join = tokio::spawn(task::run_poll_task(
            self.ctx.clone(),
            self.config,
            subscriber,
            feed.to_string(),
            Arc::clone(&stop),
            Arc::clone(&state),
        ));
        tasks.insert(key, TaskHandle { stop, state, join });

        self.ctx.bus.emit_lossy(EngineEvent::TaskStateChanged {
            subscriber,
            feed: feed.to_string(),
            state: TaskState::Running,
            timestamp: Utc::now(),
        });
        info!("Started poll task for subscriber {} on feed '{}'", subscriber, feed);
        Ok(StartOutcome::Started)
    }

    /// Request a cooperative stop. The stop flag is flipped before the
    /// subscription is deactivated so the loop's next wake-up reads it
    /// first and exits as Stopped rather than Expired.
    pub async fn stop(&self, subscriber: i64, feed: &str) -> Result<()> {
        {
            let tasks = self.tasks.read().await;
            let handle = tasks.get(&(subscriber, feed.to_string())).ok_or_else(|| {
                Error::Task(format!(
                    "No task for subscriber {} on feed '{}'",
                    subscriber, feed
                ))
            })?;
            handle.stop.store(true, Ordering::SeqCst);
        }

        self.ctx.registry.set_active(subscriber, feed, false).await;
        info!("Stop requested for subscriber {} on feed '{}'", subscriber, feed);
        Ok(())
    }

    pub async fn state_of(&self, subscriber: i64, feed: &str) -> Option<TaskState> {
        let tasks = self.tasks.read().await;
        match tasks.get(&(subscriber, feed.to_string())) {
            Some(handle) => Some(*handle.state.read().await),
            None => None,
        }
    }

    /// All known tasks and their current states, ordered by (subscriber,
    /// feed).
    pub async fn snapshot(&self) -> Vec<TaskSnapshot> {
        let tasks = self.tasks.read().await;
        let mut out = Vec::with_capacity(tasks.len());
        for ((subscriber, feed), handle) in tasks.iter() {
            out.push(TaskSnapshot {
                subscriber: *subscriber,
                feed: feed.clone(),
                state: *handle.state.read().await,
            });
        }
        out.sort_by(|a, b| (a.subscriber, &a.feed).cmp(&(b.subscriber, &b.feed)));
        out
    }

    /// Flip every stop flag and wait for the loops to wind down. Active
    /// subscriptions are left as they are; they outlive the process and
    /// pick back up when tasks are started again.
    pub async fn shutdown(&self) {
        let handles: Vec<(TaskKey, TaskHandle)> = {
            let mut tasks = self.tasks.write().await;
            tasks.drain().collect()
        };

        for (_, handle) in &handles {
            handle.stop.store(true, Ordering::SeqCst);
        }

        for ((subscriber, feed), handle) in handles {
            if let Err(e) = handle.join.await {
                warn!(
                    "Poll task for subscriber {} on feed '{}' panicked: {}",
                    subscriber, feed, e
                );
            }
        }
        info!("All poll tasks stopped");
    }
}
