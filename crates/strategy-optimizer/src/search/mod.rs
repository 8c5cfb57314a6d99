//! Search strategies over a [`ParameterSpace`].
//!
//! Every strategy proposes candidate batches to an [`Objective`], keeps the
//! successful evaluations and records the running best as it goes. Ranking
//! happens once, after the search, in [`rank_evaluations`].

mod bayesian;
mod genetic;
mod grid;
mod particle_swarm;
mod random;

use std::cmp::Ordering;

use rand::rngs::StdRng;

use crate::config::{AlgorithmSettings, OptimizationAlgorithm};
use crate::error::OptimizerError;
use crate::objective::{Evaluation, Objective};
use crate::parameters::ParameterSpace;
use crate::results::{ConvergencePoint, RankedEvaluation};

pub use bayesian::BayesianSearch;
pub use genetic::{next_generation, GeneticSearch};
pub use grid::GridSearch;
pub use particle_swarm::ParticleSwarmSearch;
pub use random::RandomSearch;

/// Everything a search produced, in evaluation order.
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub evaluations: Vec<Evaluation>,
    pub convergence: Vec<ConvergencePoint>,
}

pub trait SearchStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn search(
        &self,
        objective: &dyn Objective,
        space: &ParameterSpace,
        rng: &mut StdRng,
    ) -> Result<SearchOutcome, OptimizerError>;
}

/// Strategy implementing `algorithm`, configured from `settings`.
pub fn strategy_for(algorithm: OptimizationAlgorithm, settings: &AlgorithmSettings) -> Box<dyn SearchStrategy> {
    match algorithm {
        OptimizationAlgorithm::GridSearch => Box::new(GridSearch::default()),
        OptimizationAlgorithm::RandomSearch => Box::new(RandomSearch::new(settings.iterations)),
        OptimizationAlgorithm::Bayesian => Box::new(BayesianSearch::new(settings.iterations)),
        OptimizationAlgorithm::Genetic => Box::new(GeneticSearch::new(settings.clone())),
        OptimizationAlgorithm::ParticleSwarm => Box::new(ParticleSwarmSearch::new(settings.clone())),
    }
}

/// Collects evaluations and the convergence trace during a search.
pub(crate) struct SearchTracker {
    maximize: bool,
    evaluations: Vec<Evaluation>,
    best: Option<usize>,
    convergence: Vec<ConvergencePoint>,
}

impl SearchTracker {
    pub(crate) fn new(maximize: bool) -> Self {
        Self {
            maximize,
            evaluations: Vec::new(),
            best: None,
            convergence: Vec::new(),
        }
    }

    /// Keep the successful results of a batch.
    pub(crate) fn record(&mut self, results: impl IntoIterator<Item = Option<Evaluation>>) {
        for evaluation in results.into_iter().flatten() {
            let improves = match self.best() {
                None => true,
                Some(best) => better(self.maximize, evaluation.score, best.score),
            };
            self.evaluations.push(evaluation);
            if improves {
                self.best = Some(self.evaluations.len() - 1);
            }
        }
    }

    pub(crate) fn best(&self) -> Option<&Evaluation> {
        self.best.map(|i| &self.evaluations[i])
    }

    /// Append a convergence point once something has been scored.
    pub(crate) fn checkpoint(&mut self, iteration: usize) {
        if let Some(best) = self.best() {
            let point = ConvergencePoint {
                iteration,
                best_value: best.score,
                evaluations: self.evaluations.len(),
            };
            self.convergence.push(point);
        }
    }

    pub(crate) fn finish(self) -> SearchOutcome {
        SearchOutcome {
            evaluations: self.evaluations,
            convergence: self.convergence,
        }
    }
}

fn better(maximize: bool, a: f64, b: f64) -> bool {
    if maximize {
        a > b
    } else {
        a < b
    }
}

/// Order evaluations best first and number them from 1.
///
/// The sort is stable, so equal scores keep their evaluation order.
pub fn rank_evaluations(mut evaluations: Vec<Evaluation>, maximize: bool) -> Vec<RankedEvaluation> {
    evaluations.sort_by(|a, b| {
        let ord = a.score.partial_cmp(&b.score).unwrap_or(Ordering::Equal);
        if maximize {
            ord.reverse()
        } else {
            ord
        }
    });
    evaluations
        .into_iter()
        .enumerate()
        .map(|(i, e)| RankedEvaluation {
            parameters: e.parameters,
            metrics: e.metrics,
            score: e.score,
            rank: i + 1,
        })
        .collect()
}
