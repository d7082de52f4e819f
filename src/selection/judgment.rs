//! Constraint judgment aggregation.
//!
//! A judge reply maps "Question N" labels to `{explanation, score}`. The
//! reply passes only if every key containing "Question" carries a mapping
//! whose `score` is YES (case-insensitive). Other keys are ignored. Missing
//! scores, non-mapping values, and anything but YES fail the whole reply.

use crate::parse::parse_structured;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Aggregate verdict over all evaluation questions of one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Judgment {
    /// Every question scored YES
    Satisfied,
    /// At least one question failed
    Violated,
    /// The reply did not parse to a mapping
    Unparseable,
}

impl Judgment {
    /// Parse and aggregate a raw judge reply.
    pub fn from_reply(raw: &str) -> Self {
        match parse_structured(raw) {
            Some(value) => Self::aggregate(&value),
            None => Self::Unparseable,
        }
    }

    /// Aggregate an already-parsed judge reply.
    pub fn aggregate(value: &Value) -> Self {
        let Some(map) = value.as_object() else {
            return Self::Unparseable;
        };

        let all_yes = map
            .iter()
            .filter(|(key, _)| key.contains("Question"))
            .all(|(_, verdict)| scored_yes(verdict));

        if all_yes { Self::Satisfied } else { Self::Violated }
    }

    pub fn is_satisfied(self) -> bool {
        self == Self::Satisfied
    }
}

fn scored_yes(verdict: &Value) -> bool {
    verdict
        .get("score")
        .and_then(Value::as_str)
        .is_some_and(|score| score.trim().eq_ignore_ascii_case("yes"))
}

/// `true` iff the reply parses and every question scored YES.
pub fn is_satisfied(raw: &str) -> bool {
    Judgment::from_reply(raw).is_satisfied()
}
