pub mod cache;
pub mod cancellation;
pub mod config;
pub mod constraints;
pub mod controller;
pub mod cross_validation;
pub mod error;
pub mod importance;
pub mod objective;
pub mod parameters;
pub mod results;
pub mod search;
pub mod sensitivity;


pub use cache::{backtest_key, cache_key, optimization_key, CacheStats, ResultCache};
pub use cancellation::CancellationToken;
pub use config::{AlgorithmSettings, OptimizationAlgorithm, OptimizationConfig, OptimizerSettings};
pub use constraints::{Comparison, Constraint, ConstraintEvaluator, ConstraintExpr, Operand};
pub use controller::OptimizationService;
pub use cross_validation::fold_windows;
pub use error::OptimizerError;
pub use importance::parameter_importance;
pub use objective::{BacktestObjective, Evaluation, Objective, ObjectiveStats};
pub use parameters::{ParameterDefinition, ParameterDomain, ParameterKind, ParameterSpace};
pub use results::{
    ConvergencePoint, CrossValidationFold, CrossValidationResult, OptimizationResult,
    ParameterSensitivityResult, RankedEvaluation, SensitivityPoint,
};
pub use search::{rank_evaluations, strategy_for, SearchOutcome, SearchStrategy};
