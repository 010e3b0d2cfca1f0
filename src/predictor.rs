//! Prediction engine
//!
//! `predict` is a pure function over a feed's trailing outcomes; given the
//! same history it always returns the same prediction. Strategies are data
//! (`StrategyParams`), not code: each feed gets a preset tuning of the same
//! ordered rule chain.
//!
//! Rule order, first match wins:
//! 1. warm-up: below the warm-up threshold, return the strategy default
//!    tagged `Warmup`;
//! 2. break-streak: the trailing run reached the break threshold, predict
//!    the opposite outcome;
//! 3. follow-run: the trailing run reached the follow threshold, predict
//!    the same outcome;
//! 4. dominance: one outcome holds at least `min_count` of the trailing
//!    `window`, predict the minority;
//! 5. imbalance: the trailing `window` counts differ by at least
//!    `margin`, predict the minority;
//! 6. alternate: predict the opposite of the latest outcome.
//!
//! Run-based confidence is `min(cap, base + step * run)`; the other rules
//! use the base confidence. Warm-up predictions carry a fixed neutral
//! confidence.

use crate::feed::Outcome;
use serde::Serialize;

/// Confidence attached to warm-up predictions
pub const WARMUP_CONFIDENCE: u8 = 50;

/// Dominance rule: one outcome holds `min_count` of the trailing `window`
#[derive(Debug, Clone, Copy)]
pub struct DominanceRule {
    pub window: usize,
    pub min_count: usize,
}

/// Imbalance rule: trailing `window` counts differ by at least `margin`
#[derive(Debug, Clone, Copy)]
pub struct ImbalanceRule {
    pub window: usize,
    pub margin: usize,
}

/// Tuning of the rule chain for one strategy
#[derive(Debug, Clone)]
pub struct StrategyParams {
    pub name: &'static str,
    pub warmup: usize,
    pub default_outcome: Outcome,
    pub break_streak_at: Option<usize>,
    pub follow_run_at: Option<usize>,
    pub confidence_base: u8,
    pub confidence_step: u8,
    pub confidence_cap: u8,
    pub dominance: Option<DominanceRule>,
    pub imbalance: Option<ImbalanceRule>,
}

/// Fast-reverting preset for high-frequency feeds
pub const RAPID: StrategyParams = StrategyParams {
    name: "rapid",
    warmup: 12,
    default_outcome: Outcome::Under,
    break_streak_at: Some(3),
    follow_run_at: Some(2),
    confidence_base: 75,
    confidence_step: 5,
    confidence_cap: 95,
    dominance: Some(DominanceRule {
        window: 8,
        min_count: 6,
    }),
    imbalance: None,
};

/// Trend-following preset: rides runs instead of breaking them
pub const STEADY: StrategyParams = StrategyParams {
    name: "steady",
    warmup: 10,
    default_outcome: Outcome::Under,
    break_streak_at: None,
    follow_run_at: Some(2),
    confidence_base: 80,
    confidence_step: 3,
    confidence_cap: 92,
    dominance: Some(DominanceRule {
        window: 4,
        min_count: 3,
    }),
    imbalance: Some(ImbalanceRule {
        window: 10,
        margin: 3,
    }),
};

/// Fallback preset for feeds without a dedicated tuning
pub const CLASSIC: StrategyParams = StrategyParams {
    name: "classic",
    warmup: 8,
    default_outcome: Outcome::Under,
    break_streak_at: Some(3),
    follow_run_at: None,
    confidence_base: 70,
    confidence_step: 5,
    confidence_cap: 90,
    dominance: None,
    imbalance: Some(ImbalanceRule {
        window: 8,
        margin: 3,
    }),
};

/// Strategy preset for a feed, `CLASSIC` when the feed has no dedicated one
pub fn params_for_feed(feed: &str) -> &'static StrategyParams {
    match feed {
        "rapid" => &RAPID,
        "steady" => &STEADY,
        _ => &CLASSIC,
    }
}

/// Which rule produced a prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Rationale {
    Warmup,
    BreakStreak { run: usize },
    FollowRun { run: usize },
    Rebalance { window: usize },
    Alternate,
}

impl Rationale {
    /// Phrase used in notification text
    pub fn describe(&self) -> String {
        match self {
            Rationale::Warmup => "insufficient history".to_string(),
            Rationale::BreakStreak { run } => format!("breaking a {}-round streak", run),
            Rationale::FollowRun { run } => format!("following a {}-round run", run),
            Rationale::Rebalance { window } => {
                format!("rebalancing the last {} rounds", window)
            }
            Rationale::Alternate => "alternating from the latest round".to_string(),
        }
    }
}

/// Outcome of the prediction engine for one round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Prediction {
    pub outcome: Outcome,
    pub confidence: u8,
    pub rationale: Rationale,
}

/// Predict the next outcome from trailing history, oldest first
pub fn predict(params: &StrategyParams, history: &[Outcome]) -> Prediction {
    let Some(&last) = history.last() else {
        return warmup_prediction(params);
    };
    if history.len() < params.warmup {
        return warmup_prediction(params);
    }

    let run = trailing_run(history);

    if let Some(threshold) = params.break_streak_at {
        if run >= threshold {
            return Prediction {
                outcome: last.flip(),
                confidence: run_confidence(params, run),
                rationale: Rationale::BreakStreak { run },
            };
        }
    }

    if let Some(threshold) = params.follow_run_at {
        if run >= threshold {
            return Prediction {
                outcome: last,
                confidence: run_confidence(params, run),
                rationale: Rationale::FollowRun { run },
            };
        }
    }

    if let Some(rule) = params.dominance {
        let (over, under) = tail_counts(history, rule.window);
        if over >= rule.min_count {
            return rebalance(params, Outcome::Under, rule.window);
        }
        if under >= rule.min_count {
            return rebalance(params, Outcome::Over, rule.window);
        }
    }

    if let Some(rule) = params.imbalance {
        let (over, under) = tail_counts(history, rule.window);
        if over.abs_diff(under) >= rule.margin {
            let minority = if over > under {
                Outcome::Under
            } else {
                Outcome::Over
            };
            return rebalance(params, minority, rule.window);
        }
    }

    Prediction {
        outcome: last.flip(),
        confidence: params.confidence_base,
        rationale: Rationale::Alternate,
    }
}

fn warmup_prediction(params: &StrategyParams) -> Prediction {
    Prediction {
        outcome: params.default_outcome,
        confidence: WARMUP_CONFIDENCE,
        rationale: Rationale::Warmup,
    }
}

fn rebalance(params: &StrategyParams, outcome: Outcome, window: usize) -> Prediction {
    Prediction {
        outcome,
        confidence: params.confidence_base,
        rationale: Rationale::Rebalance { window },
    }
}

/// Run-based confidence: base plus one step per round of the run, capped
fn run_confidence(params: &StrategyParams, run: usize) -> u8 {
    let steps = params
        .confidence_step
        .saturating_mul(run.min(usize::from(u8::MAX)) as u8);
    params
        .confidence_base
        .saturating_add(steps)
        .min(params.confidence_cap)
}

/// Length of the run of the latest outcome at the end of the history
fn trailing_run(history: &[Outcome]) -> usize {
    match history.last() {
        Some(&last) => history.iter().rev().take_while(|&&o| o == last).count(),
        None => 0,
    }
}

/// (over, under) counts over the trailing `window` outcomes
fn tail_counts(history: &[Outcome], window: usize) -> (usize, usize) {
    let skip = history.len().saturating_sub(window);
    let over = history[skip..]
        .iter()
        .filter(|&&o| o == Outcome::Over)
        .count();
    (over, history.len() - skip - over)
}
