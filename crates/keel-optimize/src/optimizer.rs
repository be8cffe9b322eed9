//! The optimizer entry point.

use chrono::Utc;
use rand::{rngs::StdRng, SeedableRng};
use tracing::info;

use keel_contracts::{
    config::OptimizerConfig,
    demo::{DemoConfiguration, Example, StrategyKind},
    error::{KeelError, KeelResult},
};

use crate::{
    scorer::ConfigurationScorer,
    strategy::{self, ProgressFn, RoundProgress, SearchContext},
};

/// The chosen configuration and how the search got there.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationReport {
    pub configuration: DemoConfiguration,
    pub best_score: f64,
    /// Best score so far after each round (or candidate, for random search).
    pub history: Vec<f64>,
}

/// Selects demonstrations for the agent by searching over subsets of the
/// training examples.
pub struct Optimizer {
    scorer: Box<dyn ConfigurationScorer>,
    config: OptimizerConfig,
    progress: Box<ProgressFn>,
}

impl Optimizer {
    pub fn new(scorer: Box<dyn ConfigurationScorer>, config: OptimizerConfig) -> Self {
        Self { scorer, config, progress: Box::new(|_: &RoundProgress| {}) }
    }

    pub fn with_progress(mut self, progress: impl Fn(&RoundProgress) + Send + Sync + 'static) -> Self {
        self.progress = Box::new(progress);
        self
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Run the configured strategy.
    pub fn optimize(&self, examples: &[Example]) -> KeelResult<OptimizationReport> {
        self.optimize_with(examples, self.config.strategy)
    }

    /// Run `strategy` over `examples`.
    ///
    /// # Errors
    ///
    /// `KeelError::Optimization` when `examples` is empty.
    pub fn optimize_with(&self, examples: &[Example], strategy: StrategyKind) -> KeelResult<OptimizationReport> {
        if examples.is_empty() {
            return Err(KeelError::Optimization { reason: "no training examples".to_string() });
        }

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let (pool, validation) = strategy::split_examples(examples, self.config.validation_fraction, &mut rng);
        info!(
            strategy = %strategy,
            pool = pool.len(),
            validation = validation.len(),
            seed = self.config.seed,
            "optimization starting"
        );

        let ctx = SearchContext {
            pool: &pool,
            validation: &validation,
            scorer: self.scorer.as_ref(),
            config: &self.config,
            progress: self.progress.as_ref(),
        };
        let outcome = match strategy {
            StrategyKind::Bootstrap => strategy::bootstrap(&ctx, &mut rng, 0),
            StrategyKind::RandomSearch => strategy::random_search(&ctx),
            StrategyKind::IterativeRefine => strategy::iterative_refine(&ctx, &mut rng),
        };

        info!(
            strategy = %strategy,
            score = outcome.score,
            demos = outcome.demos.len(),
            "optimization finished"
        );

        Ok(OptimizationReport {
            best_score: outcome.score,
            history: outcome.history,
            configuration: DemoConfiguration {
                demos: outcome.demos,
                strategy,
                rounds: outcome.rounds,
                score: outcome.score,
                seed: self.config.seed,
                created_at: Utc::now(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use keel_contracts::{
        config::OptimizerConfig,
        demo::{Example, StrategyKind},
        error::KeelError,
    };

    use super::Optimizer;
    use crate::{scorer::ConfigurationScorer, strategy::RoundProgress};

    /// Only demonstrations tagged "valid" make any validation output pass;
    /// a configuration without one scores zero.
    struct GateScorer;

    impl ConfigurationScorer for GateScorer {
        fn score(&self, demos: &[Example], validation: &[Example]) -> f64 {
            if validation.is_empty() || !demos.iter().any(|d| d.input_document.starts_with("valid")) {
                return 0.0;
            }
            0.6 + demos.len() as f64 / 100.0
        }
    }

    fn examples() -> Vec<Example> {
        (0..10)
            .map(|i| {
                let tag = if i == 4 { "valid" } else { "noise" };
                Example::new(format!("{tag}-{i}"), format!("out-{i}"))
            })
            .collect()
    }

    #[test]
    fn empty_training_set_is_an_error() {
        let optimizer = Optimizer::new(Box::new(GateScorer), OptimizerConfig::default());
        assert!(matches!(optimizer.optimize(&[]), Err(KeelError::Optimization { .. })));
    }

    #[test]
    fn each_strategy_records_its_metadata() {
        for strategy in [StrategyKind::Bootstrap, StrategyKind::RandomSearch, StrategyKind::IterativeRefine] {
            let config = OptimizerConfig { seed: 11, max_rounds: 3, num_candidates: 2, ..OptimizerConfig::default() };
            let report = Optimizer::new(Box::new(GateScorer), config).optimize_with(&examples(), strategy).unwrap();

            assert_eq!(report.configuration.strategy, strategy);
            assert_eq!(report.configuration.seed, 11);
            assert_eq!(report.best_score, report.configuration.score);
            assert!(report.history.windows(2).all(|w| w[0] <= w[1]));
            assert!(report.configuration.demos.len() <= 8);
        }
    }

    #[test]
    fn zero_valid_configuration_never_beats_a_valid_one() {
        let config = OptimizerConfig { seed: 3, max_rounds: 30, max_demos: 9, ..OptimizerConfig::default() };
        let report = Optimizer::new(Box::new(GateScorer), config)
            .optimize_with(&examples(), StrategyKind::Bootstrap)
            .unwrap();
        if report.best_score > 0.0 {
            assert!(report.configuration.demos.iter().any(|d| d.input_document.starts_with("valid")));
        } else {
            assert!(report.history.iter().all(|s| *s == 0.0));
        }
    }

    #[test]
    fn same_seed_same_result() {
        let config = OptimizerConfig { seed: 8, max_rounds: 4, ..OptimizerConfig::default() };
        let a = Optimizer::new(Box::new(GateScorer), config.clone()).optimize(&examples()).unwrap();
        let b = Optimizer::new(Box::new(GateScorer), config).optimize(&examples()).unwrap();
        assert_eq!(a.configuration.demos, b.configuration.demos);
        assert_eq!(a.history, b.history);
    }

    #[test]
    fn progress_is_reported_per_round() {
        let rounds = Arc::new(Mutex::new(Vec::new()));
        let sink = rounds.clone();
        let config = OptimizerConfig { max_rounds: 5, ..OptimizerConfig::default() };
        Optimizer::new(Box::new(GateScorer), config)
            .with_progress(move |p: &RoundProgress| sink.lock().unwrap().push(p.round))
            .optimize(&examples())
            .unwrap();
        assert_eq!(*rounds.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn single_example_is_both_pool_and_validation() {
        let only = vec![Example::new("valid-0", "out")];
        let report = Optimizer::new(Box::new(GateScorer), OptimizerConfig::default()).optimize(&only).unwrap();
        assert_eq!(report.configuration.demos, only);
        assert!(report.best_score > 0.0);
    }
}
