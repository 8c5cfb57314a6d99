use backtest_engine::BacktestError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OptimizerError {
    #[error("Unknown optimization algorithm '{0}'")]
    UnknownAlgorithm(String),

    #[error("Invalid optimization configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("Constraint '{name}' could not be evaluated: {reason}")]
    Constraint { name: String, reason: String },

    #[error("No feasible candidates: {0}")]
    NoFeasibleCandidates(String),

    #[error("Optimization cancelled")]
    Cancelled,

    #[error(transparent)]
    Backtest(#[from] BacktestError),

    #[error("Worker pool error: {0}")]
    WorkerPool(String),
}

impl OptimizerError {
    pub fn invalid_parameter(name: &str, reason: impl Into<String>) -> Self {
        OptimizerError::InvalidParameter {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}
