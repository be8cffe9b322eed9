//! Per-criterion quality ratings.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Lowest score a criterion can hold.
pub const MIN_SCORE: i64 = 1;
/// Highest score a criterion can hold.
pub const MAX_SCORE: i64 = 9;
/// Returned whenever a rating cannot be parsed.
pub const NEUTRAL_SCORE: f64 = 5.0;

/// One criterion's clamped score and the oracle's reasoning for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriterionRating {
    pub score: i64,
    pub reasoning: String,
}

/// The breakdown returned by a detailed rating call.
///
/// `error` is set when the oracle's answer could not be parsed; every
/// criterion then holds the neutral fallback.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DetailedRating {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub criteria: BTreeMap<String, CriterionRating>,
}

impl DetailedRating {
    /// Mean of the criterion scores, or the neutral score if there are none.
    pub fn mean(&self) -> f64 {
        if self.criteria.is_empty() {
            return NEUTRAL_SCORE;
        }
        let total: i64 = self.criteria.values().map(|c| c.score).sum();
        total as f64 / self.criteria.len() as f64
    }
}
