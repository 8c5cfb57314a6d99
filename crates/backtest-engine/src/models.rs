use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::BacktestError;

// --- Strategy parameters ---

/// A single strategy parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Categorical(String),
}

impl ParamValue {
    /// Numeric view of the value; `None` for categorical values.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Float(v) => Some(*v),
            ParamValue::Categorical(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            ParamValue::Float(v) => Some(v.round() as i64),
            ParamValue::Categorical(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Categorical(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v:.4}"),
            ParamValue::Categorical(s) => write!(f, "{s}"),
        }
    }
}

/// Strategy parameters by name. Ordered so serialization is canonical.
pub type ParameterMap = BTreeMap<String, ParamValue>;

/// Format a parameter map as `a=1, b=fast` for log lines.
pub fn format_parameters(params: &ParameterMap) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ")
}

// --- Strategy families ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyType {
    Momentum,
    MeanReversion,
    TrendFollowing,
    Breakout,
    StatisticalArbitrage,
    PairsTrading,
    SentimentBased,
    MachineLearning,
    MultiFactor,
}

impl StrategyType {
    pub const ALL: [StrategyType; 9] = [
        StrategyType::Momentum,
        StrategyType::MeanReversion,
        StrategyType::TrendFollowing,
        StrategyType::Breakout,
        StrategyType::StatisticalArbitrage,
        StrategyType::PairsTrading,
        StrategyType::SentimentBased,
        StrategyType::MachineLearning,
        StrategyType::MultiFactor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyType::Momentum => "momentum",
            StrategyType::MeanReversion => "mean_reversion",
            StrategyType::TrendFollowing => "trend_following",
            StrategyType::Breakout => "breakout",
            StrategyType::StatisticalArbitrage => "statistical_arbitrage",
            StrategyType::PairsTrading => "pairs_trading",
            StrategyType::SentimentBased => "sentiment_based",
            StrategyType::MachineLearning => "machine_learning",
            StrategyType::MultiFactor => "multi_factor",
        }
    }
}

impl fmt::Display for StrategyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyType {
    type Err = BacktestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        StrategyType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| BacktestError::InvalidConfig(format!("unknown strategy type '{s}'")))
    }
}

// --- Market data ---

/// A single daily OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalBar {
    pub date: NaiveDate,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarInterval {
    #[default]
    Day,
    Week,
    Month,
}

// --- Cost models ---

/// How commission is charged on each fill.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommissionModel {
    #[default]
    None,
    /// Fraction of notional, e.g. 0.001 = 10 bps.
    Percentage { rate: f64 },
    /// Per-share rate bounded by a per-trade minimum and optional maximum.
    PerShare {
        rate: f64,
        min_per_trade: f64,
        #[serde(default)]
        max_per_trade: Option<f64>,
    },
    /// Flat amount per fill.
    Fixed { amount: Decimal },
}

/// How far fills move against the trader from the reference price.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SlippageModel {
    #[default]
    None,
    /// Fraction of price, e.g. 0.0005 = 5 bps.
    Percentage { rate: f64 },
    /// Absolute price offset per share.
    PerShare { amount: Decimal },
}

/// When pending signals are allowed to trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebalanceFrequency {
    #[default]
    Daily,
    Weekly,
    Monthly,
    Quarterly,
}

/// Walk-forward evaluation windows, in calendar days.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkForwardConfig {
    pub train_days: u32,
    pub test_days: u32,
    /// Window advance; defaults to `test_days` (back-to-back test windows) and may
    /// not be shorter, so test windows never overlap.
    #[serde(default)]
    pub step_days: Option<u32>,
}

fn default_lookback_days() -> u32 {
    100
}

/// Configuration for a backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_capital: Decimal,
    pub symbols: Vec<String>,
    pub strategy_type: StrategyType,
    #[serde(default)]
    pub parameters: ParameterMap,
    #[serde(default)]
    pub commission: CommissionModel,
    #[serde(default)]
    pub slippage: SlippageModel,
    #[serde(default)]
    pub rebalance_frequency: RebalanceFrequency,
    /// Benchmark symbol for beta/alpha.
    #[serde(default)]
    pub benchmark: Option<String>,
    #[serde(default)]
    pub walk_forward: Option<WalkForwardConfig>,
    /// Percent of equity per position (0-100). None = equal weight across symbols.
    #[serde(default)]
    pub position_size_percent: Option<f64>,
    /// As a fraction, e.g. 0.05 = 5%.
    #[serde(default)]
    pub stop_loss_percent: Option<f64>,
    #[serde(default)]
    pub take_profit_percent: Option<f64>,
    #[serde(default)]
    pub allow_short: bool,
    /// Calendar days of history fetched before `start_date` for indicator warm-up.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
}

impl BacktestConfig {
    pub fn new(
        strategy_type: StrategyType,
        symbols: Vec<String>,
        start_date: NaiveDate,
        end_date: NaiveDate,
        initial_capital: Decimal,
    ) -> Self {
        Self {
            start_date,
            end_date,
            initial_capital,
            symbols,
            strategy_type,
            parameters: ParameterMap::new(),
            commission: CommissionModel::None,
            slippage: SlippageModel::None,
            rebalance_frequency: RebalanceFrequency::Daily,
            benchmark: None,
            walk_forward: None,
            position_size_percent: None,
            stop_loss_percent: None,
            take_profit_percent: None,
            allow_short: false,
            lookback_days: default_lookback_days(),
        }
    }

    /// Same configuration with a different parameter set.
    pub fn with_parameters(&self, parameters: ParameterMap) -> Self {
        Self {
            parameters,
            ..self.clone()
        }
    }

    /// Same configuration restricted to a sub-window.
    pub fn with_window(&self, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            start_date,
            end_date,
            ..self.clone()
        }
    }

    pub fn validate(&self) -> Result<(), BacktestError> {
        if self.end_date < self.start_date {
            return Err(BacktestError::InvalidConfig(format!(
                "end date {} precedes start date {}",
                self.end_date, self.start_date
            )));
        }
        if self.symbols.is_empty() {
            return Err(BacktestError::InvalidConfig("no symbols configured".to_string()));
        }
        if self.initial_capital <= Decimal::ZERO {
            return Err(BacktestError::InvalidConfig(
                "initial capital must be positive".to_string(),
            ));
        }
        if let Some(pct) = self.position_size_percent {
            if !(pct > 0.0 && pct <= 100.0) {
                return Err(BacktestError::InvalidConfig(format!(
                    "position size {pct}% outside (0, 100]"
                )));
            }
        }
        if let Some(wf) = &self.walk_forward {
            if wf.train_days == 0 || wf.test_days == 0 || wf.step_days == Some(0) {
                return Err(BacktestError::InvalidConfig(
                    "walk-forward windows must be at least one day".to_string(),
                ));
            }
            if let Some(step) = wf.step_days {
                if step < wf.test_days {
                    return Err(BacktestError::InvalidConfig(format!(
                        "walk-forward step of {step} days would overlap {}-day test windows",
                        wf.test_days
                    )));
                }
            }
        }
        Ok(())
    }
}

// --- Signals ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalAction {
    Buy,
    Sell,
}

/// A trading signal raised at the close of `date`; it executes on a later bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub date: NaiveDate,
    pub symbol: String,
    pub action: SignalAction,
    pub reason: String,
}

// --- Simulation output ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeSide {
    Long,
    Short,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Signal,
    StopLoss,
    TakeProfit,
    /// Liquidated at the close of a non-final walk-forward test window.
    WindowEnd,
}

/// A round-trip trade. `exit_date == None` marks a position still open at run end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: String,
    pub side: TradeSide,
    pub entry_date: NaiveDate,
    pub entry_price: Decimal,
    pub exit_date: Option<NaiveDate>,
    pub exit_price: Option<Decimal>,
    pub quantity: Decimal,
    /// Net of commissions; marked to the last close for open positions.
    pub pnl: Decimal,
    pub return_percent: f64,
    pub holding_period_days: i64,
    pub commission: Decimal,
    pub slippage: Decimal,
    pub exit_reason: Option<ExitReason>,
}

impl Trade {
    pub fn is_closed(&self) -> bool {
        self.exit_date.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub symbol: String,
    pub side: TradeSide,
    pub quantity: Decimal,
    pub price: Decimal,
    /// Negative for shorts (a liability).
    pub market_value: Decimal,
}

/// End-of-day portfolio state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyPerformance {
    pub date: NaiveDate,
    pub equity: Decimal,
    pub cash: Decimal,
    pub holdings_value: Decimal,
    pub daily_pnl: Decimal,
    pub daily_return: f64,
    /// Fraction below the running equity peak.
    pub drawdown: f64,
    pub positions: Vec<PositionSnapshot>,
}

/// Scalar statistics derived from trades and the daily equity curve.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BacktestMetrics {
    pub total_return: f64,
    pub annualized_return: f64,
    pub volatility: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub calmar_ratio: f64,
    pub max_drawdown: f64,
    pub max_drawdown_duration_days: i64,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub open_trades: usize,
    pub average_win: f64,
    pub average_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub average_holding_period_days: f64,
    /// Fraction of trading days with at least one open position.
    pub exposure: f64,
    pub total_commission: f64,
    pub total_slippage: f64,
    pub final_equity: f64,
    pub value_at_risk_95: f64,
    pub conditional_var_95: f64,
    #[serde(default)]
    pub beta: Option<f64>,
    #[serde(default)]
    pub alpha: Option<f64>,
}

/// Metrics an optimization can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationMetric {
    TotalReturn,
    AnnualizedReturn,
    SharpeRatio,
    SortinoRatio,
    CalmarRatio,
    MaxDrawdown,
    Volatility,
    WinRate,
    ProfitFactor,
    FinalEquity,
    TotalTrades,
}

impl OptimizationMetric {
    pub const ALL: [OptimizationMetric; 11] = [
        OptimizationMetric::TotalReturn,
        OptimizationMetric::AnnualizedReturn,
        OptimizationMetric::SharpeRatio,
        OptimizationMetric::SortinoRatio,
        OptimizationMetric::CalmarRatio,
        OptimizationMetric::MaxDrawdown,
        OptimizationMetric::Volatility,
        OptimizationMetric::WinRate,
        OptimizationMetric::ProfitFactor,
        OptimizationMetric::FinalEquity,
        OptimizationMetric::TotalTrades,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizationMetric::TotalReturn => "total_return",
            OptimizationMetric::AnnualizedReturn => "annualized_return",
            OptimizationMetric::SharpeRatio => "sharpe_ratio",
            OptimizationMetric::SortinoRatio => "sortino_ratio",
            OptimizationMetric::CalmarRatio => "calmar_ratio",
            OptimizationMetric::MaxDrawdown => "max_drawdown",
            OptimizationMetric::Volatility => "volatility",
            OptimizationMetric::WinRate => "win_rate",
            OptimizationMetric::ProfitFactor => "profit_factor",
            OptimizationMetric::FinalEquity => "final_equity",
            OptimizationMetric::TotalTrades => "total_trades",
        }
    }
}

impl fmt::Display for OptimizationMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptimizationMetric {
    type Err = BacktestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        let normalized = match normalized.as_str() {
            "sharpe" => "sharpe_ratio",
            "sortino" => "sortino_ratio",
            "calmar" => "calmar_ratio",
            "return" => "total_return",
            "drawdown" => "max_drawdown",
            other => other,
        };
        OptimizationMetric::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == normalized)
            .ok_or_else(|| BacktestError::InvalidConfig(format!("unknown metric '{s}'")))
    }
}

impl BacktestMetrics {
    /// Value of the named metric.
    pub fn value(&self, metric: OptimizationMetric) -> f64 {
        match metric {
            OptimizationMetric::TotalReturn => self.total_return,
            OptimizationMetric::AnnualizedReturn => self.annualized_return,
            OptimizationMetric::SharpeRatio => self.sharpe_ratio,
            OptimizationMetric::SortinoRatio => self.sortino_ratio,
            OptimizationMetric::CalmarRatio => self.calmar_ratio,
            OptimizationMetric::MaxDrawdown => self.max_drawdown,
            OptimizationMetric::Volatility => self.volatility,
            OptimizationMetric::WinRate => self.win_rate,
            OptimizationMetric::ProfitFactor => self.profit_factor,
            OptimizationMetric::FinalEquity => self.final_equity,
            OptimizationMetric::TotalTrades => self.total_trades as f64,
        }
    }
}

// --- Walk-forward ---

/// Metrics for one walk-forward window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkForwardWindowResult {
    pub index: usize,
    pub train_start: NaiveDate,
    pub train_end: NaiveDate,
    pub test_start: NaiveDate,
    pub test_end: NaiveDate,
    pub parameters: ParameterMap,
    pub in_sample: BacktestMetrics,
    pub out_of_sample: BacktestMetrics,
}

/// Result of a completed backtest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub metrics: BacktestMetrics,
    pub trades: Vec<Trade>,
    pub daily_performance: Vec<DailyPerformance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub walk_forward: Option<Vec<WalkForwardWindowResult>>,
}
