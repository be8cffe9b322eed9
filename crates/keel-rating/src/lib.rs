//! # keel-rating
//!
//! Oracle-judged quality scores for agent outputs.
//!
//! [`RatingFunction`] asks the oracle to grade one (input, output) document
//! pair on three criteria, each an integer in [1, 9]. Out-of-range values
//! are clamped, not rejected. An answer that cannot be parsed, or an oracle
//! call that fails, yields the neutral score so an optimization round is
//! never aborted by its judge.

use std::{collections::BTreeMap, num::IntErrorKind};

use tracing::{debug, warn};

use keel_contracts::{
    config::RatingConfig,
    demo::{DemoConfiguration, Example},
    oracle::{FieldSpec, OracleOutputs, OracleRequest, Signature},
    rating::{CriterionRating, DetailedRating, MAX_SCORE, MIN_SCORE, NEUTRAL_SCORE},
};
use keel_core::traits::Oracle;

pub const PIPELINE_INPUT: &str = "pipeline_input";
pub const PIPELINE_OUTPUT: &str = "pipeline_output";

/// Reasoning placed on every criterion when a rating cannot be parsed.
pub const PARSE_ERROR_REASONING: &str = "Error parsing rating";

/// A rated criterion and the oracle fields that carry it.
struct Criterion {
    name: &'static str,
    reasoning_field: &'static str,
    score_field: &'static str,
    question: &'static str,
}

const CRITERIA: [Criterion; 3] = [
    Criterion {
        name: "memory",
        reasoning_field: "memory_reasoning",
        score_field: "memory_score",
        question: "Did the pipeline add all relevant information to memory? (1-9)",
    },
    Criterion {
        name: "action",
        reasoning_field: "action_reasoning",
        score_field: "action_score",
        question: "How good is the next action? (1-9)",
    },
    Criterion {
        name: "plan",
        reasoning_field: "plan_reasoning",
        score_field: "plan_score",
        question: "How good is the plan? (1-9)",
    },
];

/// Clamp a raw criterion value into [1, 9].
pub fn clamp_score(raw: i64) -> i64 {
    raw.clamp(MIN_SCORE, MAX_SCORE)
}

/// Parse a criterion value. Integers too large for `i64` saturate so they
/// still clamp to the nearest bound.
pub fn parse_score(raw: &str) -> Option<i64> {
    match raw.trim().parse::<i64>() {
        Ok(n) => Some(n),
        Err(e) => match e.kind() {
            IntErrorKind::PosOverflow => Some(i64::MAX),
            IntErrorKind::NegOverflow => Some(i64::MIN),
            _ => None,
        },
    }
}

pub fn rating_signature(config: &RatingConfig) -> Signature {
    let mut outputs = Vec::new();
    for c in &CRITERIA {
        outputs.push(FieldSpec::new(c.reasoning_field, format!("Reasoning for {} score", c.name)));
        outputs.push(FieldSpec::new(c.score_field, c.question));
    }
    Signature {
        name: "rating".to_string(),
        instructions: config.instructions.clone(),
        inputs: vec![
            FieldSpec::new(PIPELINE_INPUT, "The document the pipeline received"),
            FieldSpec::new(PIPELINE_OUTPUT, "The document the pipeline produced"),
        ],
        outputs,
    }
}

/// Grades pipeline outputs through the oracle.
pub struct RatingFunction {
    oracle: Box<dyn Oracle>,
    config: RatingConfig,
    demos: Vec<Example>,
}

impl RatingFunction {
    pub fn new(oracle: Box<dyn Oracle>, config: RatingConfig) -> Self {
        Self { oracle, config, demos: Vec::new() }
    }

    /// Attach demonstrations to every rating request.
    pub fn with_demos(mut self, demos: Option<DemoConfiguration>) -> Self {
        self.demos = demos.map(|d| d.demos).unwrap_or_default();
        self
    }

    /// Mean clamped score in [1, 9], or exactly 5.0 if the rating could not
    /// be obtained.
    pub fn score(&self, input: &str, output: &str) -> f64 {
        match self.rate(input, output) {
            Ok(criteria) => {
                let total: i64 = criteria.values().map(|c| c.score).sum();
                let mean = total as f64 / criteria.len() as f64;
                debug!(score = mean, "rated output");
                mean
            }
            Err(_) => NEUTRAL_SCORE,
        }
    }

    /// Per-criterion scores with reasoning.
    pub fn detailed_score(&self, input: &str, output: &str) -> DetailedRating {
        match self.rate(input, output) {
            Ok(criteria) => DetailedRating { error: None, criteria },
            Err(error) => DetailedRating {
                error: Some(error),
                criteria: CRITERIA
                    .iter()
                    .map(|c| {
                        let fallback = CriterionRating {
                            score: NEUTRAL_SCORE as i64,
                            reasoning: PARSE_ERROR_REASONING.to_string(),
                        };
                        (c.name.to_string(), fallback)
                    })
                    .collect(),
            },
        }
    }

    fn rate(&self, input: &str, output: &str) -> Result<BTreeMap<String, CriterionRating>, String> {
        let request = OracleRequest::new(rating_signature(&self.config))
            .with_input(PIPELINE_INPUT, input)
            .with_input(PIPELINE_OUTPUT, output)
            .with_demos(self.demos.clone());

        let outputs = self.oracle.invoke(&request).map_err(|e| {
            warn!(error = %e, "rating oracle failed, using neutral score");
            e.to_string()
        })?;

        parse_criteria(&outputs).map_err(|e| {
            warn!(error = %e, "rating unparsable, using neutral score");
            e
        })
    }
}

fn parse_criteria(outputs: &OracleOutputs) -> Result<BTreeMap<String, CriterionRating>, String> {
    let mut criteria = BTreeMap::new();
    for c in &CRITERIA {
        let raw = outputs
            .get(c.score_field)
            .ok_or_else(|| format!("missing field '{}'", c.score_field))?;
        let value = parse_score(raw)
            .ok_or_else(|| format!("'{}' is not an integer: '{}'", c.score_field, raw.trim()))?;
        let reasoning = outputs.get(c.reasoning_field).unwrap_or_default().trim().to_string();
        criteria.insert(
            c.name.to_string(),
            CriterionRating { score: clamp_score(value), reasoning },
        );
    }
    Ok(criteria)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
