use rand::rngs::StdRng;
use tracing::info;

use super::{SearchOutcome, SearchStrategy, SearchTracker};
use crate::error::OptimizerError;
use crate::objective::Objective;
use crate::parameters::ParameterSpace;

/// Candidates per batch; the running best is recorded after each one.
const BATCH_SIZE: usize = 10;

/// Uniform random sampling of the space.
#[derive(Debug, Clone)]
pub struct RandomSearch {
    iterations: usize,
}

impl RandomSearch {
    pub fn new(iterations: usize) -> Self {
        Self { iterations }
    }
}

impl SearchStrategy for RandomSearch {
    fn name(&self) -> &'static str {
        "random_search"
    }

    fn search(
        &self,
        objective: &dyn Objective,
        space: &ParameterSpace,
        rng: &mut StdRng,
    ) -> Result<SearchOutcome, OptimizerError> {
        info!(
            "Random search: {} draws over {} parameters",
            self.iterations,
            space.len()
        );
        let mut tracker = SearchTracker::new(objective.maximize());
        let mut drawn = 0;
        while drawn < self.iterations {
            objective.check_cancelled()?;
            let n = BATCH_SIZE.min(self.iterations - drawn);
            let batch: Vec<_> = (0..n).map(|_| space.sample(rng)).collect();
            tracker.record(objective.evaluate(&batch)?);
            drawn += n;
            tracker.checkpoint(drawn);
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

    fn space() -> ParameterSpace {
        ParameterSpace::new(vec![
            ParameterDefinition::integer("a", 0, 100, 50),
            ParameterDefinition::float("b", -1.0, 1.0, 0.0),
        ])
        .unwrap()
    }

    #[test]
    fn test_same_seed_same_candidates() {
        let run = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            RandomSearch::new(25)
                .search(&SumObjective::new(true), &space(), &mut rng)
                .unwrap()
        };
        let a = run(5);
        let b = run(5);
        assert_eq!(a.evaluations, b.evaluations);
        assert_eq!(a.evaluations.len(), 25);
        let iterations: Vec<usize> = a.convergence.iter().map(|c| c.iteration).collect();
        assert_eq!(iterations, vec![10, 20, 25]);
    }

    #[test]
    fn test_rejected_candidates_are_dropped() {
        let mut objective = SumObjective::new(true);
        objective.reject = Some(|p| p["a"].as_i64().unwrap_or(0) % 2 == 0);
        let mut rng = StdRng::seed_from_u64(2);
        let outcome = RandomSearch::new(40).search(&objective, &space(), &mut rng).unwrap();
        assert!(outcome.evaluations.len() < 40);
        assert!(outcome
            .evaluations
            .iter()
            .all(|e| e.parameters["a"].as_i64().unwrap() % 2 == 1));
    }
}
