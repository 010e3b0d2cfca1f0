//! Notification rendering
//!
//! Plain-text composition of the broadcast messages. No markup; whatever
//! decorates the transport lives on the other side of the sink.

use crate::accuracy::AccuracyCounter;
use crate::feed::RoundSnapshot;
use crate::history::PatternSummary;
use crate::predictor::Prediction;

/// Sent once when a task exits because the subscriber's license stopped
/// being valid.
pub const EXPIRED_NOTICE: &str =
    "Your access to this prediction feed has ended. Renew your license to keep receiving calls.";

/// Sent once when a task gives up after repeated feed errors.
pub const FAILED_NOTICE: &str =
    "The feed behind your predictions is unreachable. Broadcasts resume once an operator restarts the task.";

/// Compose the per-round broadcast text: the observed round, the verdict on
/// the previous call when there was one, the next call, and the recent
/// pattern with the feed's overall record.
pub fn round_message(
    feed: &str,
    round: &RoundSnapshot,
    verdict: Option<bool>,
    prediction: &Prediction,
    pattern: &PatternSummary,
    stats: &AccuracyCounter,
) -> String {
    let mut lines = Vec::with_capacity(5);

    let mut headline = format!(
        "[{}] Round {}: {}",
        feed,
        round.session_id,
        round.outcome.label()
    );
    if let Some(dice) = round.dice {
        let total = round
            .total
            .map(u32::from)
            .unwrap_or_else(|| dice.iter().map(|&d| u32::from(d)).sum());
        headline.push_str(&format!(
            " ({}-{}-{}, total {})",
            dice[0], dice[1], dice[2], total
        ));
    }
    lines.push(headline);

    if let Some(was_correct) = verdict {
        let word = if was_correct { "hit" } else { "miss" };
        lines.push(format!("Last call: {}", word));
    }

    lines.push(format!(
        "Next call: {} ({}% confident, {})",
        prediction.outcome.label(),
        prediction.confidence,
        prediction.rationale.describe()
    ));

    if !pattern.symbols.is_empty() {
        lines.push(format!(
            "Last {}: {} ({} over / {} under, {})",
            pattern.window,
            pattern.symbols,
            pattern.over,
            pattern.under,
            pattern.trend.describe()
        ));
    }

    if stats.total > 0 {
        lines.push(format!(
            "Feed record: {}/{} correct ({:.0}%)",
            stats.correct,
            stats.total,
            stats.ratio() * 100.0
        ));
    }

    lines.join("\n")
}
