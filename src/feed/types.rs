//! Round snapshot wire format and validation
//!
//! A feed answers each poll with a JSON object describing the most recently
//! closed round. The raw shape is tolerant (session ids arrive as integers
//! or numeric strings, auxiliary fields may be absent); validation into a
//! `RoundSnapshot` is strict and rejects the whole payload when a required
//! field is missing or unparseable.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from fetching or validating a round snapshot
///
/// All variants are transient from the supervisor's point of view: the
/// feed may recover on the next tick. Variants are cloneable so the feed
/// hub can serve one failure to every task sharing the feed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    /// The request did not complete in time (or the feed was unreachable)
    #[error("feed request timed out")]
    Timeout,

    /// The feed answered with a non-success HTTP status
    #[error("feed returned status {0}")]
    BadStatus(u16),

    /// The payload was missing required fields or failed to parse
    #[error("feed payload invalid: {0}")]
    BadPayload(String),
}

/// One of the two round outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Over,
    Under,
}

impl Outcome {
    /// The opposite outcome
    pub fn flip(self) -> Self {
        match self {
            Outcome::Over => Outcome::Under,
            Outcome::Under => Outcome::Over,
        }
    }

    /// Single-character symbol used in pattern strings
    pub fn symbol(self) -> char {
        match self {
            Outcome::Over => 'O',
            Outcome::Under => 'U',
        }
    }

    /// Human-readable label used in notification text
    pub fn label(self) -> &'static str {
        match self {
            Outcome::Over => "Over",
            Outcome::Under => "Under",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "over" | "o" => Some(Outcome::Over),
            "under" | "u" => Some(Outcome::Under),
            _ => None,
        }
    }
}

/// Session id as it appears on the wire: integer or numeric string
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WireSessionId {
    Num(u64),
    Text(String),
}

/// Raw round payload as returned by a feed
///
/// Every field is optional here; `validate` decides what is required.
#[derive(Debug, Clone, Deserialize)]
pub struct RawRound {
    #[serde(default)]
    pub session_id: Option<WireSessionId>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub dice_one: Option<u8>,
    #[serde(default)]
    pub dice_two: Option<u8>,
    #[serde(default)]
    pub dice_three: Option<u8>,
    #[serde(default)]
    pub total: Option<u8>,
}

impl RawRound {
    /// Validate the raw payload into a snapshot
    ///
    /// Required: session id and result. Dice and total are auxiliary and
    /// pass through as given. Any missing or malformed required field
    /// rejects the whole payload.
    pub fn validate(self) -> Result<RoundSnapshot, FeedError> {
        let session_id = match self.session_id {
            Some(WireSessionId::Num(n)) => n,
            Some(WireSessionId::Text(s)) => s
                .trim()
                .parse::<u64>()
                .map_err(|_| FeedError::BadPayload(format!("session_id '{}' is not numeric", s)))?,
            None => return Err(FeedError::BadPayload("missing session_id".to_string())),
        };

        let result = self
            .result
            .ok_or_else(|| FeedError::BadPayload("missing result".to_string()))?;
        let outcome = Outcome::parse(&result)
            .ok_or_else(|| FeedError::BadPayload(format!("unknown result '{}'", result)))?;

        let dice = match (self.dice_one, self.dice_two, self.dice_three) {
            (Some(a), Some(b), Some(c)) => Some([a, b, c]),
            _ => None,
        };

        Ok(RoundSnapshot {
            session_id,
            outcome,
            dice,
            total: self.total,
        })
    }
}

/// Validated round snapshot handed to the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoundSnapshot {
    /// Session identifier, monotonically increasing per feed
    pub session_id: u64,
    /// Outcome of the closed round
    pub outcome: Outcome,
    /// Dice values, when the feed reports them
    pub dice: Option<[u8; 3]>,
    /// Dice total, when the feed reports it
    pub total: Option<u8>,
}
