use std::collections::BTreeMap;

use backtest_engine::{BacktestMetrics, OptimizationMetric, ParamValue, ParameterMap};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::OptimizationAlgorithm;

/// An evaluated candidate with its position in the final ranking (1 = best).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedEvaluation {
    pub parameters: ParameterMap,
    pub metrics: BacktestMetrics,
    pub score: f64,
    pub rank: usize,
}

/// Running best after a batch, generation or iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvergencePoint {
    pub iteration: usize,
    pub best_value: f64,
    /// Successful evaluations so far.
    pub evaluations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossValidationFold {
    pub fold: usize,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// `None` when the fold's backtest failed.
    pub metrics: Option<BacktestMetrics>,
    pub score: Option<f64>,
}

/// Best parameters re-run on chronological folds of the base date range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossValidationResult {
    pub folds: Vec<CrossValidationFold>,
    pub mean_score: f64,
    pub std_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub best_parameters: ParameterMap,
    pub best_metric_value: f64,
    pub all_results: Vec<RankedEvaluation>,
    #[serde(default)]
    pub convergence: Option<Vec<ConvergencePoint>>,
    #[serde(default)]
    pub parameter_importance: Option<BTreeMap<String, f64>>,
    #[serde(default)]
    pub cross_validation: Option<CrossValidationResult>,
    pub execution_time_ms: u64,
    pub algorithm: OptimizationAlgorithm,
    pub metric: OptimizationMetric,
    pub maximize: bool,
    /// Candidates that produced a score.
    pub evaluations: usize,
    /// Candidates rejected by constraints.
    pub skipped_candidates: usize,
    /// Candidates whose backtest failed or timed out.
    pub failed_candidates: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivityPoint {
    pub value: ParamValue,
    pub metric_value: f64,
}

/// How strongly one parameter moves the objective with the others held fixed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSensitivityResult {
    pub parameter: String,
    pub points: Vec<SensitivityPoint>,
    /// Coefficient of variation of the objective across `points`.
    pub sensitivity: f64,
    pub best_value: Option<ParamValue>,
    pub best_metric_value: Option<f64>,
}
