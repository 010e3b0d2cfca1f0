//! Broadcast pipeline integration tests
//!
//! Drives scripted rounds through the full observe/score/predict/publish
//! path and checks the rendered text, the once-per-session publish
//! election, verdict scoring across rounds, and the observability
//! endpoints that read the same state.

mod helpers;

use helpers::{EventStream, TestEngine};
use std::time::Duration;
use tipcast::events::EngineEvent;
use tipcast::feed::Outcome;

const WAIT: Duration = Duration::from_secs(2);

/// Wait for a BroadcastCompleted event whose report matches `pred`
async fn wait_for_report(
    events: &mut EventStream,
    pred: impl Fn(&tipcast::dispatch::PublishReport) -> bool,
) -> Option<tipcast::dispatch::PublishReport> {
    let deadline = std::time::Instant::now() + WAIT;
    while std::time::Instant::now() < deadline {
        match events.wait_for("BroadcastCompleted", WAIT).await {
            Some(EngineEvent::BroadcastCompleted { report, .. }) if pred(&report) => {
                return Some(report)
            }
            Some(_) => continue,
            None => return None,
        }
    }
    None
}

#[tokio::test]
async fn test_first_round_broadcast_content() {
    let engine = TestEngine::start().await.expect("engine");
    engine
        .licenses
        .create("gold", 1, None)
        .await
        .expect("license");

    let mut events = engine.subscribe_events();
    engine.feed.post_round_with_dice(100, Outcome::Over, [4, 5, 6]);
    engine
        .supervisor
        .start(7, "rapid", Some("gold"))
        .await
        .expect("start");

    let text = engine
        .sink
        .wait_for_text(7, "Round 100", WAIT)
        .await
        .expect("broadcast delivered");

    // One round of history: warm-up call, no verdict, no feed record yet
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], "[rapid] Round 100: Over (4-5-6, total 15)");
    assert_eq!(lines[1], "Next call: Under (50% confident, insufficient history)");
    assert_eq!(lines[2], "Last 1: O (1 over / 0 under, balanced)");

    let observed = events
        .wait_for("RoundObserved", WAIT)
        .await
        .expect("round observed event");
    match observed {
        EngineEvent::RoundObserved {
            feed,
            session_id,
            outcome,
            ..
        } => {
            assert_eq!(feed, "rapid");
            assert_eq!(session_id, 100);
            assert_eq!(outcome, Outcome::Over);
        }
        other => panic!("unexpected event: {:?}", other),
    }

    let published = events
        .wait_for("PredictionPublished", WAIT)
        .await
        .expect("prediction event");
    match published {
        EngineEvent::PredictionPublished {
            session_id,
            prediction,
            confidence,
            ..
        } => {
            assert_eq!(session_id, 100);
            assert_eq!(prediction, Outcome::Under);
            assert_eq!(confidence, 50);
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn test_one_broadcast_per_session_with_two_subscribers() {
    let engine = TestEngine::start().await.expect("engine");
    engine
        .licenses
        .create("duo", 2, None)
        .await
        .expect("license");

    engine.feed.post_round(200, Outcome::Over);
    engine
        .supervisor
        .start(21, "steady", Some("duo"))
        .await
        .expect("first subscriber");
    engine
        .sink
        .wait_for_text(21, "Round 200", WAIT)
        .await
        .expect("first subscriber is broadcasting");

    engine
        .supervisor
        .start(22, "steady", Some("duo"))
        .await
        .expect("second subscriber");

    let mut events = engine.subscribe_events();
    engine.feed.post_round(300, Outcome::Under);

    engine
        .sink
        .wait_for_text(21, "Round 300", WAIT)
        .await
        .expect("round reaches the first subscriber");
    engine
        .sink
        .wait_for_text(22, "Round 300", WAIT)
        .await
        .expect("round reaches the second subscriber");

    // Whichever task won the append published to both subscribers at once
    let report = wait_for_report(&mut events, |r| r.sent == 2)
        .await
        .expect("one batch covered both subscribers");
    assert_eq!(report.failed, 0);
    assert_eq!(report.deactivated, 0);

    // The session was published once, not once per task
    assert!(events
        .wait_for("PredictionPublished", Duration::from_millis(150))
        .await
        .is_none());

    tokio::time::sleep(Duration::from_millis(50)).await;
    let count_21 = engine
        .sink
        .texts_for(21)
        .iter()
        .filter(|t| t.contains("Round 300"))
        .count();
    let count_22 = engine
        .sink
        .texts_for(22)
        .iter()
        .filter(|t| t.contains("Round 300"))
        .count();
    assert_eq!(count_21, 1);
    assert_eq!(count_22, 1);
}

#[tokio::test]
async fn test_verdicts_score_across_rounds() {
    let engine = TestEngine::start().await.expect("engine");
    engine
        .licenses
        .create("gold", 1, None)
        .await
        .expect("license");

    // "quiet" has no dedicated tuning, so calls stay on the warm-up
    // default (Under) for the first eight rounds
    engine.feed.post_round(500, Outcome::Over);
    engine
        .supervisor
        .start(9, "quiet", Some("gold"))
        .await
        .expect("start");
    let first = engine
        .sink
        .wait_for_text(9, "Round 500", WAIT)
        .await
        .expect("first broadcast");
    assert!(!first.contains("Last call"));
    assert!(!first.contains("Feed record"));

    // Called Under at 500; 501 lands Under, so the call was a hit
    engine.feed.post_round(501, Outcome::Under);
    let second = engine
        .sink
        .wait_for_text(9, "Round 501", WAIT)
        .await
        .expect("second broadcast");
    assert!(second.contains("Last call: hit"));
    assert!(second.contains("Feed record: 1/1 correct (100%)"));

    // Called Under at 501; 502 lands Over, so the call was a miss
    engine.feed.post_round(502, Outcome::Over);
    let third = engine
        .sink
        .wait_for_text(9, "Round 502", WAIT)
        .await
        .expect("third broadcast");
    assert!(third.contains("Last call: miss"));
    assert!(third.contains("Feed record: 1/2 correct (50%)"));

    let stats = engine.accuracy.stats("quiet", 9).await;
    assert_eq!(stats.correct, 1);
    assert_eq!(stats.total, 2);
}

#[tokio::test]
async fn test_failed_delivery_counts_without_breaking_batch() {
    let engine = TestEngine::start().await.expect("engine");
    engine
        .licenses
        .create("duo", 2, None)
        .await
        .expect("license");
    engine.sink.fail_recipient(32);

    engine.feed.post_round(200, Outcome::Over);
    engine
        .supervisor
        .start(31, "steady", Some("duo"))
        .await
        .expect("healthy subscriber");
    engine
        .sink
        .wait_for_text(31, "Round 200", WAIT)
        .await
        .expect("first broadcast");

    engine
        .supervisor
        .start(32, "steady", Some("duo"))
        .await
        .expect("failing subscriber");

    let mut events = engine.subscribe_events();
    engine.feed.post_round(201, Outcome::Under);

    engine
        .sink
        .wait_for_text(31, "Round 201", WAIT)
        .await
        .expect("healthy subscriber keeps receiving");

    let report = wait_for_report(&mut events, |r| r.failed == 1)
        .await
        .expect("batch reports the failed delivery");
    assert_eq!(report.sent, 1);
    assert_eq!(report.deactivated, 0);

    assert!(engine.sink.texts_for(32).is_empty());
    // A failed delivery is not a deactivation; the subscriber stays in
    assert!(engine.registry.is_active(32, "steady").await);
}

#[tokio::test]
async fn test_pattern_and_accuracy_endpoints_reflect_history() {
    let engine = TestEngine::start().await.expect("engine");
    engine
        .licenses
        .create("gold", 1, None)
        .await
        .expect("license");

    // Five Overs then three Unders, observed in order
    let rounds: Vec<(u64, Outcome)> = vec![
        (800, Outcome::Over),
        (801, Outcome::Over),
        (802, Outcome::Over),
        (803, Outcome::Over),
        (804, Outcome::Over),
        (805, Outcome::Under),
        (806, Outcome::Under),
        (807, Outcome::Under),
    ];

    engine.feed.post_round(rounds[0].0, rounds[0].1);
    engine
        .supervisor
        .start(9, "quiet", Some("gold"))
        .await
        .expect("start");
    engine
        .sink
        .wait_for_text(9, "Round 800", WAIT)
        .await
        .expect("first round");

    for (session_id, outcome) in &rounds[1..] {
        engine.feed.post_round(*session_id, *outcome);
        engine
            .sink
            .wait_for_text(9, &format!("Round {}", session_id), WAIT)
            .await
            .expect("round broadcast");
    }

    // Eight rounds of history pushes "quiet" past warm-up: the trailing
    // three-Under run trips the break-streak rule
    let text = engine
        .sink
        .wait_for_text(9, "Round 807", WAIT)
        .await
        .expect("final broadcast");
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 5);
    assert_eq!(lines[0], "[quiet] Round 807: Under");
    assert_eq!(lines[1], "Last call: hit");
    assert_eq!(lines[2], "Next call: Over (85% confident, breaking a 3-round streak)");
    assert_eq!(lines[3], "Last 8: OOOOOUUU (5 over / 3 under, leaning Over)");
    assert_eq!(lines[4], "Feed record: 3/7 correct (43%)");

    let (status, body) = engine
        .request("GET", "/api/v1/pattern?feed=quiet", None)
        .await
        .expect("pattern request");
    assert_eq!(status, axum::http::StatusCode::OK);
    let body = body.expect("body");
    assert_eq!(body["window"], 8);
    assert_eq!(body["symbols"], "OOOOOUUU");
    assert_eq!(body["over"], 5);
    assert_eq!(body["under"], 3);
    assert_eq!(body["trend"]["Leaning"], "Over");

    let (_, body) = engine
        .request("GET", "/api/v1/accuracy?feed=quiet", None)
        .await
        .expect("feed accuracy request");
    let body = body.expect("body");
    assert_eq!(body["correct"], 3);
    assert_eq!(body["total"], 7);

    let (_, body) = engine
        .request("GET", "/api/v1/accuracy?feed=quiet&subscriber_id=9", None)
        .await
        .expect("subscriber accuracy request");
    let body = body.expect("body");
    assert_eq!(body["subscriber_id"], 9);
    assert_eq!(body["correct"], 3);
    assert_eq!(body["total"], 7);
}
