//! Signed placement scores.
//!
//! A score is bounded by `±INFINITY`. `+INFINITY` marks a mandatory
//! preference, `-INFINITY` a mandatory exclusion, and anything in between
//! is advisory and sums with other advisory scores.

use serde::{Deserialize, Deserializer};
use thiserror::Error;

/// Signed score attached to a (resource, node) pair or a constraint.
pub type Score = i32;

/// The score that encodes "must" (or "must not" when negated).
pub const INFINITY: Score = 1_000_000;

/// Errors produced while parsing a textual score.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScoreError {
    #[error("invalid score: {0:?}")]
    Invalid(String),
}

/// Clamp a wide integer into the `[-INFINITY, INFINITY]` range.
pub fn clamp(value: i64) -> Score {
    value.clamp(-(INFINITY as i64), INFINITY as i64) as Score
}

/// Parse a score from its textual form.
///
/// Accepts `INFINITY`, `+INFINITY`, `-INFINITY` (case-insensitive) and
/// plain integers, which are clamped to the valid range.
pub fn parse_score(text: &str) -> Result<Score, ScoreError> {
    let trimmed = text.trim();
    match trimmed.to_ascii_uppercase().as_str() {
        "INFINITY" | "+INFINITY" => return Ok(INFINITY),
        "-INFINITY" => return Ok(-INFINITY),
        _ => {}
    }
    trimmed
        .parse::<i64>()
        .map(clamp)
        .map_err(|_| ScoreError::Invalid(text.to_string()))
}

/// Render a score the way it is written in configuration.
pub fn score_to_string(score: Score) -> String {
    if score >= INFINITY {
        "INFINITY".to_string()
    } else if score <= -INFINITY {
        "-INFINITY".to_string()
    } else {
        score.to_string()
    }
}

/// Add two scores, saturating at the infinities.
///
/// `-INFINITY` absorbs everything, including `+INFINITY`.
pub fn add_scores(a: Score, b: Score) -> Score {
    if a <= -INFINITY || b <= -INFINITY {
        -INFINITY
    } else if a >= INFINITY || b >= INFINITY {
        INFINITY
    } else {
        clamp(i64::from(a) + i64::from(b))
    }
}

/// Serde helper accepting a score as either an integer or a string.
pub fn deserialize_score<'de, D>(deserializer: D) -> Result<Score, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawScore {
        Int(i64),
        Text(String),
    }

    match RawScore::deserialize(deserializer)? {
        RawScore::Int(v) => Ok(clamp(v)),
        RawScore::Text(s) => parse_score(&s).map_err(serde::de::Error::custom),
    }
}
