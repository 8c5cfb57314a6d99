use rand::rngs::StdRng;
use rand::Rng;
use tracing::{debug, info};

use super::{SearchOutcome, SearchStrategy, SearchTracker};
use crate::error::OptimizerError;
use crate::objective::Objective;
use crate::parameters::ParameterSpace;

/// Chance a guided step perturbs the incumbent instead of drawing fresh.
const EXPLOIT_PROBABILITY: f64 = 0.7;
/// Perturbation width as a fraction of each numeric range.
const PERTURB_SCALE: f64 = 0.2;
const WARMUP_BATCH: usize = 10;
const CHECKPOINT_EVERY: usize = 10;

/// Sequential exploit/explore search ("Bayesian-lite").
///
/// The first third of the budget is spent on uniform draws. Each later step
/// either perturbs the best candidate so far or samples fresh, one candidate at
/// a time so every step sees the latest incumbent.
#[derive(Debug, Clone)]
pub struct BayesianSearch {
    iterations: usize,
}

impl BayesianSearch {
    pub fn new(iterations: usize) -> Self {
        Self { iterations }
    }

    fn warmup(&self) -> usize {
        (self.iterations / 3).max(1).min(self.iterations)
    }
}

impl SearchStrategy for BayesianSearch {
    fn name(&self) -> &'static str {
        "bayesian"
    }

    fn search(
        &self,
        objective: &dyn Objective,
        space: &ParameterSpace,
        rng: &mut StdRng,
    ) -> Result<SearchOutcome, OptimizerError> {
        let warmup = self.warmup();
        info!(
            "Bayesian-lite search: {} draws, {} random warm-up",
            self.iterations, warmup
        );
        let mut tracker = SearchTracker::new(objective.maximize());

        let mut proposed = 0;
        while proposed < warmup {
            objective.check_cancelled()?;
            let n = WARMUP_BATCH.min(warmup - proposed);
            let batch: Vec<_> = (0..n).map(|_| space.sample(rng)).collect();
            tracker.record(objective.evaluate(&batch)?);
            proposed += n;
        }
        tracker.checkpoint(proposed);

        while proposed < self.iterations {
            objective.check_cancelled()?;
            let candidate = match tracker.best() {
                Some(best) if rng.gen_bool(EXPLOIT_PROBABILITY) => {
                    space.perturb(&best.parameters, PERTURB_SCALE, rng)
                }
                _ => space.sample(rng),
            };
            tracker.record(objective.evaluate(std::slice::from_ref(&candidate))?);
            proposed += 1;
            if proposed % CHECKPOINT_EVERY == 0 || proposed == self.iterations {
                tracker.checkpoint(proposed);
                if let Some(best) = tracker.best() {
                    debug!("Bayesian-lite step {}: best {:.4}", proposed, best.score);
                }
            }
        }
        Ok(tracker.finish())
    }
}
