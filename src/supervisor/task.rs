//! Poll loop body
//!
//! One instance runs per (subscriber, feed) task. Each tick re-checks the
//! stop flag and the license gate, then polls the feed through the shared
//! hub. Whichever task appends a round to the shared history first composes
//! and publishes the broadcast; everyone else only scores their own pending
//! prediction against it.

use super::{SupervisorConfig, TaskContext, TaskState};
use crate::events::EngineEvent;
use crate::history::SessionRecord;
use crate::predictor::{params_for_feed, predict};
use crate::render;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{info, warn};

pub(super) async fn run_poll_task(
    ctx: TaskContext,
    config: SupervisorConfig,
    subscriber: i64,
    feed: String,
    stop: Arc<AtomicBool>,
    state: Arc<RwLock<TaskState>>,
) {
    let mut last_seen: Option<u64> = None;
    let mut consecutive_errors: u32 = 0;

    info!("Poll loop running for subscriber {} on feed '{}'", subscriber, feed);

    let final_state = loop {
        // Stop wins over every other exit so an operator stop never
        // masquerades as an expiry.
        if stop.load(Ordering::SeqCst) {
            break TaskState::Stopped;
        }

        if ctx
            .registry
            .deactivate_if_license_invalid(subscriber, &feed)
            .await
        {
            deliver_notice(&ctx, subscriber, render::EXPIRED_NOTICE).await;
            ctx.bus.emit_lossy(EngineEvent::SubscriberDeactivated {
                subscriber,
                feed: feed.clone(),
                timestamp: Utc::now(),
            });
            break TaskState::Expired;
        }
        if !ctx.registry.is_active(subscriber, &feed).await {
            // Deactivated elsewhere; the notice went out there.
            break TaskState::Expired;
        }

        match ctx.hub.fetch(&feed).await {
            Err(e) => {
                consecutive_errors += 1;
                warn!(
                    "Feed '{}' fetch failed ({} of {}): {}",
                    feed, consecutive_errors, config.max_consecutive_errors, e
                );
                if consecutive_errors >= config.max_consecutive_errors {
                    deliver_notice(&ctx, subscriber, render::FAILED_NOTICE).await;
                    ctx.registry.set_active(subscriber, &feed, false).await;
                    break TaskState::Failed;
                }
                sleep(config.error_backoff).await;
                continue;
            }
            Ok(snapshot) => {
                consecutive_errors = 0;
                let unchanged = last_seen.map_or(false, |seen| snapshot.session_id <= seen);
                if !unchanged {
                    observe_round(&ctx, subscriber, &feed, &snapshot).await;
                    last_seen = Some(snapshot.session_id);
                }
            }
        }

        sleep(config.poll_interval).await;
    };

    *state.write().await = final_state;
    ctx.bus.emit_lossy(EngineEvent::TaskStateChanged {
        subscriber,
        feed: feed.clone(),
        state: final_state,
        timestamp: Utc::now(),
    });
    info!(
        "Poll loop for subscriber {} on feed '{}' exited as {}",
        subscriber,
        feed,
        final_state.as_str()
    );
}

/// Handle a session id this task has not seen before: score the open
/// prediction, make the next one, and broadcast when this task won the
/// append.
async fn observe_round(
    ctx: &TaskContext,
    subscriber: i64,
    feed: &str,
    snapshot: &crate::feed::RoundSnapshot,
) {
    let fresh = ctx
        .history
        .append(feed, SessionRecord::from_snapshot(snapshot))
        .await;
    if fresh {
        ctx.bus.emit_lossy(EngineEvent::RoundObserved {
            feed: feed.to_string(),
            session_id: snapshot.session_id,
            outcome: snapshot.outcome,
            timestamp: Utc::now(),
        });
    }

    let verdict = match ctx
        .accuracy
        .resolve(feed, subscriber, snapshot.session_id, snapshot.outcome)
        .await
    {
        Ok(v) => v,
        Err(e) => {
            warn!("Verdict for subscriber {} on '{}' not recorded: {}", subscriber, feed, e);
            None
        }
    };

    let outcomes = ctx.history.outcomes(feed).await;
    let prediction = predict(params_for_feed(feed), &outcomes);
    ctx.accuracy
        .record_prediction(feed, subscriber, snapshot.session_id, prediction.outcome)
        .await;

    if !fresh {
        return;
    }

    let pattern = ctx.history.pattern_summary(feed).await;
    let stats = ctx.accuracy.feed_stats(feed).await;
    let text = render::round_message(feed, snapshot, verdict, &prediction, &pattern, &stats);

    ctx.bus.emit_lossy(EngineEvent::PredictionPublished {
        feed: feed.to_string(),
        session_id: snapshot.session_id,
        prediction: prediction.outcome,
        confidence: prediction.confidence,
        timestamp: Utc::now(),
    });
    ctx.dispatcher.publish(feed, &text).await;
}

async fn deliver_notice(ctx: &TaskContext, subscriber: i64, text: &str) {
    if let Err(e) = ctx.sink.deliver(subscriber, text).await {
        warn!("Final notice for subscriber {} not delivered: {}", subscriber, e);
    }
}
