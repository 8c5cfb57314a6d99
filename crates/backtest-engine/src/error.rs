use chrono::NaiveDate;
use thiserror::Error;

use crate::models::StrategyType;

#[derive(Error, Debug)]
pub enum BacktestError {
    #[error("Failed to fetch market data for {symbol}: {reason}")]
    DataFetch { symbol: String, reason: String },

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("No trading days between {start} and {end}")]
    NoTradingDays { start: NaiveDate, end: NaiveDate },

    #[error("Invalid backtest configuration: {0}")]
    InvalidConfig(String),

    #[error("No signal generator registered for strategy '{0}'")]
    UnsupportedStrategy(StrategyType),

    #[error("Signal generation failed for {symbol}: {reason}")]
    SignalGeneration { symbol: String, reason: String },

    #[error("Backtest exceeded its deadline at {date} after {elapsed_ms}ms")]
    Timeout { date: NaiveDate, elapsed_ms: u64 },

    #[error("Backtest cancelled")]
    Cancelled,
}

impl BacktestError {
    /// Errors that abort the whole run rather than a single candidate.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BacktestError::DataFetch { .. }
                | BacktestError::InvalidConfig(_)
                | BacktestError::UnsupportedStrategy(_)
                | BacktestError::Cancelled
        )
    }
}
