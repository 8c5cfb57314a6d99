use rand::rngs::StdRng;
use tracing::{debug, info};

use super::{SearchOutcome, SearchStrategy, SearchTracker};
use crate::error::OptimizerError;
use crate::objective::Objective;
use crate::parameters::ParameterSpace;

const DEFAULT_BATCH_SIZE: usize = 50;

/// Exhaustive search over the Cartesian product of every parameter's grid values.
#[derive(Debug, Clone)]
pub struct GridSearch {
    batch_size: usize,
}

impl Default for GridSearch {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl SearchStrategy for GridSearch {
    fn name(&self) -> &'static str {
        "grid_search"
    }

    fn search(
        &self,
        objective: &dyn Objective,
        space: &ParameterSpace,
        _rng: &mut StdRng,
    ) -> Result<SearchOutcome, OptimizerError> {
        let candidates = space.grid();
        info!("Grid search over {} candidates", candidates.len());

        let mut tracker = SearchTracker::new(objective.maximize());
        for (batch, chunk) in candidates.chunks(self.batch_size.max(1)).enumerate() {
            objective.check_cancelled()?;
            let results = objective.evaluate(chunk)?;
            tracker.record(results);
            tracker.checkpoint(batch + 1);
            debug!("Grid batch {} done", batch + 1);
        }
        Ok(tracker.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::ParameterDefinition;
    use crate::search::testing::SumObjective;
    use rand::SeedableRng;
    use std::sync::atomic::Ordering;

    #[test]
    fn test_grid_evaluates_every_candidate_in_order() {
        let space = ParameterSpace::new(vec![
            ParameterDefinition::integer("a", 1, 3, 1),
            ParameterDefinition::integer("b", 10, 20, 10).with_step(10.0),
        ])
        .unwrap();
        let objective = SumObjective::new(true);
        let mut rng = StdRng::seed_from_u64(0);
        let outcome = GridSearch::default().search(&objective, &space, &mut rng).unwrap();

        let scores: Vec<f64> = outcome.evaluations.iter().map(|e| e.score).collect();
        assert_eq!(scores, vec![11.0, 21.0, 12.0, 22.0, 13.0, 23.0]);
        assert_eq!(objective.calls.load(Ordering::SeqCst), 6);
        assert_eq!(outcome.convergence.len(), 1);
        assert_eq!(outcome.convergence[0].best_value, 23.0);
    }
}
