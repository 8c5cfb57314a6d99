use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use backtest_engine::{
    format_parameters, BacktestConfig, BacktestEngine, BacktestError, BacktestMetrics,
    BacktestResult, MarketDataSet, OptimizationMetric, ParameterMap, RunLimits,
};
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::{backtest_key, ResultCache};
use crate::cancellation::CancellationToken;
use crate::constraints::ConstraintEvaluator;
use crate::error::OptimizerError;

/// A scored candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub parameters: ParameterMap,
    pub metrics: BacktestMetrics,
    pub score: f64,
}

/// Candidate scoring as seen by the search strategies.
pub trait Objective: Send + Sync {
    /// Score a batch. The output lines up with `candidates`; `None` marks a
    /// candidate rejected by constraints or whose backtest failed.
    fn evaluate(&self, candidates: &[ParameterMap]) -> Result<Vec<Option<Evaluation>>, OptimizerError>;

    fn maximize(&self) -> bool;

    fn check_cancelled(&self) -> Result<(), OptimizerError>;

    /// Whether score `a` beats score `b` in the optimization direction.
    fn is_better(&self, a: f64, b: f64) -> bool {
        if self.maximize() {
            a > b
        } else {
            a < b
        }
    }
}

/// Counters describing what happened to proposed candidates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ObjectiveStats {
    pub evaluated: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Scores candidates by backtesting them against preloaded market data on a
/// rayon pool, sharing results through the backtest cache.
pub struct BacktestObjective<'a> {
    engine: &'a BacktestEngine,
    base: &'a BacktestConfig,
    data: &'a MarketDataSet,
    cache: &'a ResultCache<BacktestResult>,
    pool: &'a ThreadPool,
    cancel: &'a CancellationToken,
    constraints: Option<&'a ConstraintEvaluator>,
    metric: OptimizationMetric,
    maximize: bool,
    candidate_timeout: Option<Duration>,
    evaluated: AtomicUsize,
    skipped: AtomicUsize,
    failed: AtomicUsize,
}

impl<'a> BacktestObjective<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        engine: &'a BacktestEngine,
        base: &'a BacktestConfig,
        data: &'a MarketDataSet,
        cache: &'a ResultCache<BacktestResult>,
        pool: &'a ThreadPool,
        cancel: &'a CancellationToken,
        metric: OptimizationMetric,
        maximize: bool,
    ) -> Self {
        Self {
            engine,
            base,
            data,
            cache,
            pool,
            cancel,
            constraints: None,
            metric,
            maximize,
            candidate_timeout: None,
            evaluated: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    pub fn with_constraints(mut self, constraints: &'a ConstraintEvaluator) -> Self {
        self.constraints = Some(constraints);
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.candidate_timeout = timeout;
        self
    }

    pub fn stats(&self) -> ObjectiveStats {
        ObjectiveStats {
            evaluated: self.evaluated.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    fn feasible(&self, params: &ParameterMap) -> bool {
        self.constraints.map_or(true, |c| c.is_feasible(params))
    }

    fn evaluate_one(&self, params: &ParameterMap) -> Result<Option<Evaluation>, OptimizerError> {
        self.cancel.check()?;
        if !self.feasible(params) {
            debug!("Constraint rejected [{}]", format_parameters(params));
            self.skipped.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        let config = self.base.with_parameters(params.clone());
        let key = backtest_key(&config)?;
        let deadline = self.candidate_timeout.map(|t| Instant::now() + t);
        let limits = RunLimits::new(deadline, Some(self.cancel.flag()));

        let outcome = self
            .cache
            .get_or_try_insert_with(&key, || self.engine.simulate(&config, self.data, &limits));

        match outcome {
            Ok(result) => {
                let score = result.metrics.value(self.metric);
                if !score.is_finite() {
                    warn!(
                        "Discarding [{}]: {} is not finite",
                        format_parameters(params),
                        self.metric
                    );
                    self.failed.fetch_add(1, Ordering::Relaxed);
                    return Ok(None);
                }
                self.evaluated.fetch_add(1, Ordering::Relaxed);
                debug!("[{}] {} = {:.4}", format_parameters(params), self.metric, score);
                Ok(Some(Evaluation {
                    parameters: params.clone(),
                    metrics: result.metrics.clone(),
                    score,
                }))
            }
            Err(BacktestError::Cancelled) => Err(OptimizerError::Cancelled),
            Err(e) if e.is_fatal() => Err(e.into()),
            Err(e) => {
                warn!("Skipping candidate [{}]: {}", format_parameters(params), e);
                self.failed.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }
}

impl Objective for BacktestObjective<'_> {
    fn evaluate(&self, candidates: &[ParameterMap]) -> Result<Vec<Option<Evaluation>>, OptimizerError> {
        self.cancel.check()?;
        debug!("Evaluating batch of {} candidates", candidates.len());
        self.pool.install(|| {
            candidates
                .par_iter()
                .map(|params| self.evaluate_one(params))
                .collect()
        })
    }

    fn maximize(&self) -> bool {
        self.maximize
    }

    fn check_cancelled(&self) -> Result<(), OptimizerError> {
        self.cancel.check()
    }
}
