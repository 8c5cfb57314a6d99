use std::time::{Duration, Instant};

use backtest_engine::metrics::finite_or_zero;
use backtest_engine::{
    format_parameters, BacktestConfig, BacktestEngine, BacktestError, MarketDataSet,
    OptimizationMetric, ParameterMap, RunLimits,
};
use chrono::{Duration as ChronoDuration, NaiveDate};
use rayon::prelude::*;
use rayon::ThreadPool;
use statrs::statistics::Statistics;
use tracing::{info, warn};

use crate::cancellation::CancellationToken;
use crate::error::OptimizerError;
use crate::results::{CrossValidationFold, CrossValidationResult};

/// Split `[start, end]` into `folds` contiguous, non-overlapping windows.
///
/// Windows are equal-length in calendar days except the last, which absorbs the
/// remainder so it always ends on `end`.
pub fn fold_windows(
    start: NaiveDate,
    end: NaiveDate,
    folds: usize,
) -> Result<Vec<(NaiveDate, NaiveDate)>, OptimizerError> {
    let days = (end - start).num_days() + 1;
    if folds == 0 || days <= 0 || folds as i64 > days {
        return Err(OptimizerError::InvalidConfig(format!(
            "cannot split {start}..={end} into {folds} folds"
        )));
    }
    let len = days / folds as i64;
    Ok((0..folds as i64)
        .map(|i| {
            let fold_start = start + ChronoDuration::days(i * len);
            let fold_end = if i == folds as i64 - 1 {
                end
            } else {
                fold_start + ChronoDuration::days(len - 1)
            };
            (fold_start, fold_end)
        })
        .collect())
}

/// Re-runs chosen parameters on chronological folds of the base range.
pub struct CrossValidator<'a> {
    pub engine: &'a BacktestEngine,
    pub data: &'a MarketDataSet,
    pub pool: &'a ThreadPool,
    pub cancel: &'a CancellationToken,
    pub candidate_timeout: Option<Duration>,
}

impl CrossValidator<'_> {
    /// Backtest `parameters` on every fold. Walk-forward is disabled per fold.
    /// A failed fold is reported without metrics and left out of the summary.
    pub fn run(
        &self,
        base: &BacktestConfig,
        parameters: &ParameterMap,
        metric: OptimizationMetric,
        folds: usize,
    ) -> Result<CrossValidationResult, OptimizerError> {
        self.cancel.check()?;
        let windows = fold_windows(base.start_date, base.end_date, folds)?;
        info!(
            "Cross-validating [{}] on {} folds",
            format_parameters(parameters),
            windows.len()
        );

        let mut template = base.with_parameters(parameters.clone());
        template.walk_forward = None;

        let results: Vec<Result<CrossValidationFold, OptimizerError>> = self.pool.install(|| {
            windows
                .par_iter()
                .enumerate()
                .map(|(i, (start, end))| self.run_fold(&template, i, *start, *end, metric))
                .collect()
        });
        let folds = results.into_iter().collect::<Result<Vec<_>, _>>()?;

        let scores: Vec<f64> = folds.iter().filter_map(|f| f.score).collect();
        let mean_score = if scores.is_empty() { 0.0 } else { scores.as_slice().mean() };
        let std_score = if scores.len() < 2 { 0.0 } else { scores.as_slice().std_dev() };

        Ok(CrossValidationResult {
            folds,
            mean_score: finite_or_zero(mean_score),
            std_score: finite_or_zero(std_score),
        })
    }

    fn run_fold(
        &self,
        template: &BacktestConfig,
        index: usize,
        start: NaiveDate,
        end: NaiveDate,
        metric: OptimizationMetric,
    ) -> Result<CrossValidationFold, OptimizerError> {
        self.cancel.check()?;
        let config = template.with_window(start, end);
        let deadline = self.candidate_timeout.map(|t| Instant::now() + t);
        let limits = RunLimits::new(deadline, Some(self.cancel.flag()));

        let (metrics, score) = match self.engine.simulate(&config, self.data, &limits) {
            Ok(result) => {
                let score = result.metrics.value(metric);
                (Some(result.metrics), score.is_finite().then_some(score))
            }
            Err(BacktestError::Cancelled) => return Err(OptimizerError::Cancelled),
            Err(e) => {
                warn!("Fold {} ({} to {}) failed: {}", index + 1, start, end, e);
                (None, None)
            }
        };

        Ok(CrossValidationFold {
            fold: index + 1,
            start_date: start,
            end_date: end,
            metrics,
            score,
        })
    }
}
