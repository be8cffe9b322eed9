//! Scoring of candidate demonstration sets.

use tracing::{debug, warn};

use keel_contracts::{config::AgentConfig, demo::Example, oracle::OracleRequest};
use keel_core::{
    agent_signature,
    traits::{Codec, Oracle},
    INPUT_FIELD, OUTPUT_FIELD,
};
use keel_rating::RatingFunction;

/// Scores a set of demonstrations against held-out examples.
///
/// Must return a value in [0, 1]; higher is better. Implementations are
/// shared across worker threads.
pub trait ConfigurationScorer: Send + Sync {
    fn score(&self, demos: &[Example], validation: &[Example]) -> f64;
}

/// The per-example metric: the validity gate and the normalized quality
/// weigh equally. Invalid output scores 0.
pub fn example_metric(valid: bool, quality: f64) -> f64 {
    if !valid {
        return 0.0;
    }
    (1.0 + quality / 9.0) / 2.0
}

/// Mean of `metrics`, or 0 for an empty slice.
pub fn mean(metrics: &[f64]) -> f64 {
    if metrics.is_empty() {
        return 0.0;
    }
    metrics.iter().sum::<f64>() / metrics.len() as f64
}

/// Scores demonstrations by running the agent step on each validation
/// input, checking the output with the codec and grading valid outputs
/// with the rating function.
pub struct OracleScorer {
    oracle: Box<dyn Oracle>,
    codec: Box<dyn Codec>,
    rating: RatingFunction,
    config: AgentConfig,
}

impl OracleScorer {
    pub fn new(
        oracle: Box<dyn Oracle>,
        codec: Box<dyn Codec>,
        rating: RatingFunction,
        config: AgentConfig,
    ) -> Self {
        Self { oracle, codec, rating, config }
    }

    fn score_one(&self, demos: &[Example], example: &Example) -> f64 {
        let request = OracleRequest::new(agent_signature(&self.config))
            .with_input(INPUT_FIELD, example.input_document.clone())
            .with_demos(demos.to_vec());

        let output = match self.oracle.invoke(&request) {
            Ok(outputs) => outputs.get(OUTPUT_FIELD).unwrap_or_default().to_string(),
            Err(e) => {
                warn!(error = %e, "prediction failed, counting example as invalid");
                return 0.0;
            }
        };

        let report = self.codec.validate(&output);
        if !report.valid {
            debug!(message = %report.message, "prediction invalid");
            return example_metric(false, 0.0);
        }
        let quality = self.rating.score(&example.input_document, &output);
        example_metric(true, quality)
    }
}

impl ConfigurationScorer for OracleScorer {
    fn score(&self, demos: &[Example], validation: &[Example]) -> f64 {
        let metrics: Vec<f64> = validation.iter().map(|ex| self.score_one(demos, ex)).collect();
        mean(&metrics)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use keel_contracts::{
        agent::AgentState,
        config::{AgentConfig, RatingConfig},
        demo::Example,
        document::{RepairedDocument, RequestDocument, ResponseDocument},
        error::{DocumentError, KeelError, KeelResult},
        oracle::{OracleOutputs, OracleRequest},
        plan::Plan,
    };
    use keel_core::{
        traits::{Codec, Oracle},
        INPUT_FIELD, OUTPUT_FIELD,
    };
    use keel_rating::RatingFunction;

    use super::{example_metric, mean, ConfigurationScorer, OracleScorer};

    /// Echoes the input back as the prediction; "fail" inputs error out.
    struct Echo;

    impl Oracle for Echo {
        fn invoke(&self, request: &OracleRequest) -> KeelResult<OracleOutputs> {
            let input = request.inputs.get(INPUT_FIELD).cloned().unwrap_or_default();
            if input == "fail" {
                return Err(KeelError::RemoteFailure { reason: "down".into() });
            }
            Ok(OracleOutputs::default().with_field(OUTPUT_FIELD, input))
        }
    }

    /// Accepts any output starting with "ok".
    struct PrefixCodec;

    impl Codec for PrefixCodec {
        fn encode(&self, _state: &AgentState) -> RequestDocument {
            RequestDocument(String::new())
        }

        fn decode(&self, raw: &str) -> Result<ResponseDocument, DocumentError> {
            if raw.starts_with("ok") {
                Ok(ResponseDocument {
                    updated_memory: String::new(),
                    new_plan: Plan::default(),
                    execution_instructions: vec![],
                    expected_outcome: None,
                    done: false,
                })
            } else {
                Err(DocumentError::schema("done", "missing"))
            }
        }

        fn repair(&self, raw: &str) -> RepairedDocument {
            RepairedDocument {
                text: raw.to_string(),
                document: None,
                injected: vec![],
                unresolved: true,
                error: None,
            }
        }
    }

    /// A judge that always answers 9 and counts its calls.
    struct Judge(Arc<AtomicUsize>);

    impl Oracle for Judge {
        fn invoke(&self, _request: &OracleRequest) -> KeelResult<OracleOutputs> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(OracleOutputs::default()
                .with_field("memory_score", "9")
                .with_field("action_score", "9")
                .with_field("plan_score", "9"))
        }
    }

    fn scorer() -> (OracleScorer, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let rating = RatingFunction::new(Box::new(Judge(calls.clone())), RatingConfig::default());
        let scorer = OracleScorer::new(Box::new(Echo), Box::new(PrefixCodec), rating, AgentConfig::default());
        (scorer, calls)
    }

    #[test]
    fn metric_weights_validity_and_quality_equally() {
        assert_eq!(example_metric(false, 9.0), 0.0);
        assert_eq!(example_metric(true, 9.0), 1.0);
        assert!((example_metric(true, 1.0) - 5.0 / 9.0).abs() < 1e-12);
        assert_eq!(mean(&[]), 0.0);
    }

    #[test]
    fn invalid_predictions_score_zero_without_rating() {
        let (scorer, calls) = scorer();
        let validation = vec![Example::new("garbage", ""), Example::new("fail", "")];
        assert_eq!(scorer.score(&[], &validation), 0.0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn valid_predictions_are_rated() {
        let (scorer, calls) = scorer();
        let validation = vec![Example::new("ok one", ""), Example::new("garbage", "")];
        assert!((scorer.score(&[], &validation) - 0.5).abs() < 1e-12);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
