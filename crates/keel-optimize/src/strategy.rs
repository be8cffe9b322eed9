//! The three search strategies.
//!
//! Every strategy is deterministic for a fixed seed and a deterministic
//! scorer. Ties always go to the candidate found first.

use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use tracing::{debug, info};

use keel_contracts::{config::OptimizerConfig, demo::Example};

use crate::scorer::ConfigurationScorer;

/// Reported after every scored proposal.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundProgress {
    pub round: usize,
    /// Which random-search candidate the round belongs to; 0 otherwise.
    pub candidate: usize,
    pub score: f64,
    pub best_score: f64,
}

/// Progress callback. Random search may call it from several threads.
pub type ProgressFn = dyn Fn(&RoundProgress) + Send + Sync;

/// What one search produced.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    pub demos: Vec<Example>,
    pub score: f64,
    /// Best score so far, one entry per round.
    pub history: Vec<f64>,
    pub rounds: usize,
}

/// Everything a strategy reads.
pub struct SearchContext<'a> {
    pub pool: &'a [Example],
    pub validation: &'a [Example],
    pub scorer: &'a dyn ConfigurationScorer,
    pub config: &'a OptimizerConfig,
    pub progress: &'a ProgressFn,
}

/// Split `examples` once into a demonstration pool and a validation slice.
///
/// With fewer than two examples both are the full set.
pub fn split_examples(
    examples: &[Example],
    validation_fraction: f64,
    rng: &mut StdRng,
) -> (Vec<Example>, Vec<Example>) {
    let n = examples.len();
    if n < 2 {
        return (examples.to_vec(), examples.to_vec());
    }

    let fraction = if validation_fraction.is_finite() { validation_fraction.clamp(0.0, 1.0) } else { 0.0 };
    let take = ((n as f64 * fraction).ceil() as usize).clamp(1, n - 1);

    let mut shuffled = examples.to_vec();
    shuffled.shuffle(rng);
    let pool = shuffled.split_off(take);
    (pool, shuffled)
}

/// Sample a fresh subset each round and keep the best one seen.
pub fn bootstrap(ctx: &SearchContext<'_>, rng: &mut StdRng, candidate: usize) -> SearchOutcome {
    let rounds = ctx.config.max_rounds.max(1);
    let cap = ctx.config.max_demos.min(ctx.pool.len());

    let mut best: Option<(Vec<Example>, f64)> = None;
    let mut history = Vec::with_capacity(rounds);

    for round in 0..rounds {
        let size = if cap == 0 { 0 } else { rng.gen_range(1..=cap) };
        let demos: Vec<Example> = ctx.pool.choose_multiple(rng, size).cloned().collect();
        let score = ctx.scorer.score(&demos, ctx.validation);

        let improved = best.as_ref().map_or(true, |(_, b)| score > *b);
        if improved {
            debug!(round, candidate, score, demos = demos.len(), "new best subset");
            best = Some((demos, score));
        }
        let best_score = best.as_ref().map_or(score, |(_, b)| *b);
        history.push(best_score);
        (ctx.progress)(&RoundProgress { round, candidate, score, best_score });
    }

    let (demos, score) = best.unwrap_or_default();
    SearchOutcome { demos, score, history, rounds }
}

/// Independent bootstrap runs with seeds `seed + i`; the best run wins.
///
/// Up to `concurrency` runs are scored at once on scoped threads. The
/// winner is picked by score, then by candidate index, so the result does
/// not depend on which thread finishes first.
pub fn random_search(ctx: &SearchContext<'_>) -> SearchOutcome {
    let candidates = ctx.config.num_candidates.max(1);
    let workers = ctx.config.concurrency.max(1);
    let run = |i: usize| {
        let mut rng = StdRng::seed_from_u64(ctx.config.seed.wrapping_add(i as u64));
        bootstrap(ctx, &mut rng, i)
    };

    let mut outcomes: Vec<SearchOutcome> = Vec::with_capacity(candidates);
    let indices: Vec<usize> = (0..candidates).collect();
    for batch in indices.chunks(workers) {
        if workers == 1 {
            outcomes.extend(batch.iter().map(|&i| run(i)));
            continue;
        }
        let results: Vec<SearchOutcome> = std::thread::scope(|s| {
            let handles: Vec<_> = batch.iter().map(|&i| s.spawn(move || run(i))).collect();
            handles
                .into_iter()
                .map(|h| match h.join() {
                    Ok(outcome) => outcome,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        });
        outcomes.extend(results);
    }

    let mut history = Vec::with_capacity(candidates);
    let mut winner: Option<SearchOutcome> = None;
    for (i, outcome) in outcomes.into_iter().enumerate() {
        let better = winner.as_ref().map_or(true, |w| outcome.score > w.score);
        if better {
            info!(candidate = i, score = outcome.score, "random search leader");
            winner = Some(outcome);
        }
        history.push(winner.as_ref().map_or(0.0, |w| w.score));
    }

    let best = winner.unwrap_or_else(|| SearchOutcome {
        demos: vec![],
        score: 0.0,
        history: vec![],
        rounds: 0,
    });
    SearchOutcome { demos: best.demos, score: best.score, history, rounds: candidates }
}

/// Greedy hill-climb from the empty configuration.
///
/// Each round proposes one change (add an unused example while below
/// `max_demos`, otherwise swap one in for one out) and keeps it only if the
/// score strictly improves.
pub fn iterative_refine(ctx: &SearchContext<'_>, rng: &mut StdRng) -> SearchOutcome {
    let rounds = ctx.config.max_rounds.max(1);
    let mut current: Vec<usize> = Vec::new();
    let mut current_score = ctx.scorer.score(&[], ctx.validation);
    let mut history = Vec::with_capacity(rounds);

    for round in 0..rounds {
        let unused: Vec<usize> = (0..ctx.pool.len()).filter(|i| !current.contains(i)).collect();
        let proposal = propose(&current, &unused, ctx.config.max_demos, rng);

        let score = match proposal {
            Some(candidate) => {
                let demos = pick(ctx.pool, &candidate);
                let score = ctx.scorer.score(&demos, ctx.validation);
                if score > current_score {
                    debug!(round, score, demos = candidate.len(), "refinement accepted");
                    current = candidate;
                    current_score = score;
                }
                score
            }
            None => current_score,
        };

        history.push(current_score);
        (ctx.progress)(&RoundProgress { round, candidate: 0, score, best_score: current_score });
    }

    SearchOutcome { demos: pick(ctx.pool, &current), score: current_score, history, rounds }
}

fn propose(current: &[usize], unused: &[usize], max_demos: usize, rng: &mut StdRng) -> Option<Vec<usize>> {
    let incoming = *unused.choose(rng)?;
    let mut next = current.to_vec();
    if current.len() < max_demos && (current.is_empty() || rng.gen_bool(0.5)) {
        next.push(incoming);
    } else if !current.is_empty() {
        let slot = rng.gen_range(0..current.len());
        next[slot] = incoming;
    } else {
        return None;
    }
    Some(next)
}

fn pick(pool: &[Example], indices: &[usize]) -> Vec<Example> {
    indices.iter().map(|&i| pool[i].clone()).collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use rand::{rngs::StdRng, SeedableRng};

    use keel_contracts::{config::OptimizerConfig, demo::Example};

    use super::{bootstrap, iterative_refine, random_search, split_examples, RoundProgress, SearchContext};
    use crate::scorer::ConfigurationScorer;

    /// Rewards demonstrations whose input names a "good" example, scaled by
    /// how many of them are present.
    struct CountGood;

    impl ConfigurationScorer for CountGood {
        fn score(&self, demos: &[Example], _validation: &[Example]) -> f64 {
            let good = demos.iter().filter(|d| d.input_document.starts_with("good")).count();
            good as f64 / 10.0
        }
    }

    fn examples(n: usize) -> Vec<Example> {
        (0..n)
            .map(|i| {
                let tag = if i % 3 == 0 { "good" } else { "bad" };
                Example::new(format!("{tag}-{i}"), format!("out-{i}"))
            })
            .collect()
    }

    fn config(max_rounds: usize) -> OptimizerConfig {
        OptimizerConfig { max_rounds, max_demos: 4, ..OptimizerConfig::default() }
    }

    fn no_progress(_: &RoundProgress) {}

    #[test]
    fn split_sizes() {
        let mut rng = StdRng::seed_from_u64(1);
        let (pool, val) = split_examples(&examples(8), 0.25, &mut rng);
        assert_eq!((pool.len(), val.len()), (6, 2));

        let (pool, val) = split_examples(&examples(3), 0.01, &mut rng);
        assert_eq!((pool.len(), val.len()), (2, 1));

        let (pool, val) = split_examples(&examples(5), 1.0, &mut rng);
        assert_eq!((pool.len(), val.len()), (1, 4));

        let one = examples(1);
        let (pool, val) = split_examples(&one, 0.25, &mut rng);
        assert_eq!(pool, one);
        assert_eq!(val, one);
    }

    #[test]
    fn split_is_seeded() {
        let a = split_examples(&examples(10), 0.3, &mut StdRng::seed_from_u64(7));
        let b = split_examples(&examples(10), 0.3, &mut StdRng::seed_from_u64(7));
        assert_eq!(a, b);
    }

    #[test]
    fn bootstrap_history_never_decreases() {
        let pool = examples(12);
        let cfg = config(10);
        let ctx = SearchContext { pool: &pool, validation: &[], scorer: &CountGood, config: &cfg, progress: &no_progress };
        let outcome = bootstrap(&ctx, &mut StdRng::seed_from_u64(3), 0);

        assert_eq!(outcome.history.len(), 10);
        assert!(outcome.history.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(outcome.history.last().copied(), Some(outcome.score));
        assert!(outcome.demos.len() <= 4 && !outcome.demos.is_empty());
        assert_eq!(CountGood.score(&outcome.demos, &[]), outcome.score);
    }

    #[test]
    fn bootstrap_is_deterministic_for_a_seed() {
        let pool = examples(12);
        let cfg = config(5);
        let ctx = SearchContext { pool: &pool, validation: &[], scorer: &CountGood, config: &cfg, progress: &no_progress };
        let a = bootstrap(&ctx, &mut StdRng::seed_from_u64(9), 0);
        let b = bootstrap(&ctx, &mut StdRng::seed_from_u64(9), 0);
        assert_eq!(a, b);
    }

    #[test]
    fn bootstrap_with_empty_pool_scores_no_demos() {
        let cfg = config(2);
        let ctx = SearchContext { pool: &[], validation: &[], scorer: &CountGood, config: &cfg, progress: &no_progress };
        let outcome = bootstrap(&ctx, &mut StdRng::seed_from_u64(0), 0);
        assert!(outcome.demos.is_empty());
        assert_eq!(outcome.history, vec![0.0, 0.0]);
    }

    #[test]
    fn random_search_winner_does_not_depend_on_concurrency() {
        let pool = examples(15);
        let sequential = OptimizerConfig { num_candidates: 6, concurrency: 1, ..config(3) };
        let parallel = OptimizerConfig { concurrency: 4, ..sequential.clone() };

        let run = |cfg: &OptimizerConfig| {
            let ctx = SearchContext { pool: &pool, validation: &[], scorer: &CountGood, config: cfg, progress: &no_progress };
            random_search(&ctx)
        };
        let a = run(&sequential);
        let b = run(&parallel);
        assert_eq!(a, b);
        assert_eq!(a.rounds, 6);
        assert_eq!(a.history.len(), 6);
        assert!(a.history.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn random_search_reports_every_round() {
        let pool = examples(9);
        let cfg = OptimizerConfig { num_candidates: 3, concurrency: 2, ..config(2) };
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let progress = move |p: &RoundProgress| sink.lock().unwrap().push((p.candidate, p.round));
        let ctx = SearchContext { pool: &pool, validation: &[], scorer: &CountGood, config: &cfg, progress: &progress };
        random_search(&ctx);

        let mut seen = seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec![(0, 0), (0, 1), (1, 0), (1, 1), (2, 0), (2, 1)]);
    }

    #[test]
    fn refine_only_accepts_improvements() {
        let pool = examples(12);
        let cfg = config(20);
        let ctx = SearchContext { pool: &pool, validation: &[], scorer: &CountGood, config: &cfg, progress: &no_progress };
        let outcome = iterative_refine(&ctx, &mut StdRng::seed_from_u64(5));

        assert_eq!(outcome.history.len(), 20);
        assert!(outcome.history.windows(2).all(|w| w[0] <= w[1]));
        assert!(outcome.demos.len() <= 4);
        assert!(outcome.demos.iter().all(|d| d.input_document.starts_with("good")));
        assert_eq!(CountGood.score(&outcome.demos, &[]), outcome.score);
    }

    #[test]
    fn refine_without_room_keeps_empty_configuration() {
        let pool = examples(4);
        let cfg = OptimizerConfig { max_demos: 0, ..config(3) };
        let ctx = SearchContext { pool: &pool, validation: &[], scorer: &CountGood, config: &cfg, progress: &no_progress };
        let outcome = iterative_refine(&ctx, &mut StdRng::seed_from_u64(5));
        assert!(outcome.demos.is_empty());
        assert_eq!(outcome.score, 0.0);
    }
}
