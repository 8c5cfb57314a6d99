use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{Datelike, NaiveDate};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;

use crate::engine::{BacktestEngine, RunLimits};
use crate::error::BacktestError;
use crate::models::*;
use crate::providers::*;
use crate::signals::{params, reference_registry};
use crate::synthetic::SyntheticMarketData;

/// Helper: parse a YYYY-MM-DD date.
fn d(date: &str) -> NaiveDate {
    NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap()
}

/// Helper: create a HistoricalBar with the given OHLC data.
fn bar(date: &str, open: f64, high: f64, low: f64, close: f64) -> HistoricalBar {
    HistoricalBar {
        date: d(date),
        open: Decimal::from_f64(open).unwrap(),
        high: Decimal::from_f64(high).unwrap(),
        low: Decimal::from_f64(low).unwrap(),
        close: Decimal::from_f64(close).unwrap(),
        volume: 1_000_000.0,
    }
}

fn flat(date: &str, price: f64) -> HistoricalBar {
    bar(date, price, price, price, price)
}

fn buy(date: &str, symbol: &str) -> Signal {
    Signal {
        date: d(date),
        symbol: symbol.to_string(),
        action: SignalAction::Buy,
        reason: "test".to_string(),
    }
}

fn sell(date: &str, symbol: &str) -> Signal {
    Signal {
        action: SignalAction::Sell,
        ..buy(date, symbol)
    }
}

/// Emits a fixed list of signals regardless of bars and parameters.
struct ScriptedSignals(Vec<Signal>);

impl SignalGenerator for ScriptedSignals {
    fn name(&self) -> &str {
        "scripted"
    }

    fn generate(&self, ctx: &SignalContext<'_>) -> Result<Vec<Signal>, BacktestError> {
        Ok(self
            .0
            .iter()
            .filter(|s| s.symbol == ctx.symbol)
            .cloned()
            .collect())
    }
}

/// Records the latest bar date each call was allowed to see.
#[derive(Default)]
struct PeekingSignals {
    seen: Mutex<Vec<(NaiveDate, NaiveDate)>>,
}

impl SignalGenerator for PeekingSignals {
    fn name(&self) -> &str {
        "peeking"
    }

    fn generate(&self, ctx: &SignalContext<'_>) -> Result<Vec<Signal>, BacktestError> {
        if let (Some(first), Some(last)) = (ctx.bars.first(), ctx.bars.last()) {
            self.seen.lock().unwrap().push((first.date, last.date));
        }
        Ok(vec![])
    }
}

fn dataset(symbol: &str, bars: Vec<HistoricalBar>) -> MarketDataSet {
    let mut data = MarketDataSet::new();
    data.insert(symbol, bars);
    data
}

fn engine_with(data: MarketDataSet, signals: Vec<Signal>) -> BacktestEngine {
    let mut registry = SignalGeneratorRegistry::new();
    registry.register(StrategyType::Momentum, Arc::new(ScriptedSignals(signals)));
    BacktestEngine::new(Arc::new(InMemoryMarketData::new(data)), registry)
}

/// Helper: build a basic config for testing.
fn test_config(symbol: &str, start: &str, end: &str) -> BacktestConfig {
    let mut config = BacktestConfig::new(
        StrategyType::Momentum,
        vec![symbol.to_string()],
        d(start),
        d(end),
        Decimal::new(10_000, 0),
    );
    config.position_size_percent = Some(50.0);
    config
}

fn run(data: &MarketDataSet, signals: Vec<Signal>, config: &BacktestConfig) -> BacktestResult {
    let engine = engine_with(data.clone(), signals);
    engine.simulate(config, data, &RunLimits::unbounded()).unwrap()
}

fn approx(a: Decimal, b: f64) -> bool {
    (a.to_f64().unwrap() - b).abs() < 1e-6
}

fn five_day_week() -> Vec<HistoricalBar> {
    vec![
        flat("2024-01-02", 100.0),
        bar("2024-01-03", 100.0, 105.0, 99.0, 104.0),
        bar("2024-01-04", 104.0, 108.0, 103.0, 107.0),
        bar("2024-01-05", 110.0, 111.0, 109.0, 110.0),
        flat("2024-01-08", 110.0),
    ]
}

// --- Execution ---

#[test]
fn test_next_bar_open_execution() {
    let data = dataset("AAPL", five_day_week());
    let config = test_config("AAPL", "2024-01-01", "2024-01-08");
    let result = run(
        &data,
        vec![buy("2024-01-02", "AAPL"), sell("2024-01-04", "AAPL")],
        &config,
    );

    assert_eq!(result.trades.len(), 1);
    let trade = &result.trades[0];
    assert_eq!(trade.entry_date, d("2024-01-03"));
    assert_eq!(trade.exit_date, Some(d("2024-01-05")));
    assert!(approx(trade.entry_price, 100.0));
    assert!(approx(trade.exit_price.unwrap(), 110.0));
    assert_eq!(trade.quantity, Decimal::from(50));
    assert!(approx(trade.pnl, 500.0));
    assert_eq!(trade.exit_reason, Some(ExitReason::Signal));
    assert_eq!(trade.holding_period_days, 2);

    let m = &result.metrics;
    assert!((m.total_return - 0.05).abs() < 1e-9);
    assert!((m.final_equity - 10_500.0).abs() < 1e-6);
    assert_eq!(m.total_trades, 1);
    assert_eq!(m.winning_trades, 1);
    assert_eq!(m.win_rate, 1.0);
    assert_eq!(m.profit_factor, crate::metrics::PROFIT_FACTOR_CAP);
}

#[test]
fn test_costs_applied_per_fill() {
    let data = dataset("AAPL", five_day_week());
    let mut config = test_config("AAPL", "2024-01-01", "2024-01-08");
    config.slippage = SlippageModel::Percentage { rate: 0.01 };
    config.commission = CommissionModel::Fixed {
        amount: Decimal::new(1, 0),
    };
    let result = run(
        &data,
        vec![buy("2024-01-02", "AAPL"), sell("2024-01-04", "AAPL")],
        &config,
    );

    let trade = &result.trades[0];
    // Buys fill above the open, sells below
    assert!(approx(trade.entry_price, 101.0));
    assert!(approx(trade.exit_price.unwrap(), 108.9));
    assert_eq!(trade.quantity, Decimal::from(49));
    assert!(approx(trade.commission, 2.0));
    assert!(approx(trade.slippage, 49.0 * 1.0 + 49.0 * 1.1));
    // (108.9 - 101) * 49 - 2
    assert!(approx(trade.pnl, 385.1));
    assert!((result.metrics.total_commission - 2.0).abs() < 1e-9);
}

#[test]
fn test_stop_loss_uses_intraday_low() {
    let data = dataset(
        "AAPL",
        vec![
            flat("2024-01-02", 100.0),
            bar("2024-01-03", 100.0, 101.0, 99.5, 100.0),
            bar("2024-01-04", 99.0, 99.5, 94.0, 96.0),
            flat("2024-01-05", 97.0),
        ],
    );
    let mut config = test_config("AAPL", "2024-01-01", "2024-01-05");
    config.stop_loss_percent = Some(0.05);
    let result = run(&data, vec![buy("2024-01-02", "AAPL")], &config);

    assert_eq!(result.trades.len(), 1);
    let trade = &result.trades[0];
    assert_eq!(trade.exit_reason, Some(ExitReason::StopLoss));
    assert_eq!(trade.exit_date, Some(d("2024-01-04")));
    assert!(approx(trade.exit_price.unwrap(), 95.0));
    assert!(approx(trade.pnl, -250.0));
    assert_eq!(result.metrics.losing_trades, 1);
    assert_eq!(result.metrics.profit_factor, 0.0);
}

#[test]
fn test_take_profit_gap_fills_at_open() {
    let data = dataset(
        "AAPL",
        vec![
            flat("2024-01-02", 100.0),
            flat("2024-01-03", 100.0),
            bar("2024-01-04", 115.0, 116.0, 114.0, 115.0),
        ],
    );
    let mut config = test_config("AAPL", "2024-01-01", "2024-01-04");
    config.take_profit_percent = Some(0.10);
    let result = run(&data, vec![buy("2024-01-02", "AAPL")], &config);

    let trade = &result.trades[0];
    assert_eq!(trade.exit_reason, Some(ExitReason::TakeProfit));
    assert!(approx(trade.exit_price.unwrap(), 115.0));
}

#[test]
fn test_open_position_reported_unclosed() {
    let data = dataset(
        "AAPL",
        vec![
            flat("2024-01-02", 100.0),
            flat("2024-01-03", 100.0),
            flat("2024-01-04", 110.0),
            flat("2024-01-05", 120.0),
        ],
    );
    let config = test_config("AAPL", "2024-01-01", "2024-01-05");
    let result = run(&data, vec![buy("2024-01-02", "AAPL")], &config);

    assert_eq!(result.trades.len(), 1);
    let trade = &result.trades[0];
    assert!(!trade.is_closed());
    assert_eq!(trade.exit_price, None);
    assert_eq!(trade.exit_reason, None);
    assert!(approx(trade.pnl, 1_000.0));

    assert_eq!(result.metrics.open_trades, 1);
    assert_eq!(result.metrics.total_trades, 0);
    assert!((result.metrics.final_equity - 11_000.0).abs() < 1e-6);
    let last = result.daily_performance.last().unwrap();
    assert_eq!(last.positions.len(), 1);
    assert!(approx(last.holdings_value, 6_000.0));
}

#[test]
fn test_short_round_trip() {
    let data = dataset(
        "AAPL",
        vec![
            flat("2024-01-02", 100.0),
            flat("2024-01-03", 100.0),
            flat("2024-01-04", 95.0),
            flat("2024-01-05", 90.0),
        ],
    );
    let mut config = test_config("AAPL", "2024-01-01", "2024-01-05");
    config.allow_short = true;
    let result = run(
        &data,
        vec![sell("2024-01-02", "AAPL"), buy("2024-01-04", "AAPL")],
        &config,
    );

    assert_eq!(result.trades.len(), 1);
    let trade = &result.trades[0];
    assert_eq!(trade.side, TradeSide::Short);
    assert!(approx(trade.pnl, 500.0));

    // Short proceeds sit in cash; the position is a liability
    let jan4 = &result.daily_performance[2];
    assert!(approx(jan4.cash, 15_000.0));
    assert!(approx(jan4.holdings_value, -4_750.0));
    assert!(approx(jan4.equity, 10_250.0));
    assert!((result.metrics.final_equity - 10_500.0).abs() < 1e-6);
}

#[test]
fn test_sell_without_position_ignored_when_shorting_disabled() {
    let data = dataset("AAPL", five_day_week());
    let config = test_config("AAPL", "2024-01-01", "2024-01-08");
    let result = run(&data, vec![sell("2024-01-02", "AAPL")], &config);
    assert!(result.trades.is_empty());
    assert!((result.metrics.final_equity - 10_000.0).abs() < 1e-9);
}

#[test]
fn test_weekly_rebalance_defers_execution() {
    let mut bars = five_day_week();
    bars.push(flat("2024-01-09", 111.0));
    let data = dataset("AAPL", bars);
    let mut config = test_config("AAPL", "2024-01-01", "2024-01-09");
    config.rebalance_frequency = RebalanceFrequency::Weekly;
    let result = run(&data, vec![buy("2024-01-02", "AAPL")], &config);

    assert_eq!(result.trades.len(), 1);
    assert_eq!(result.trades[0].entry_date, d("2024-01-08"));
}

#[test]
fn test_equal_weight_across_symbols() {
    let mut data = MarketDataSet::new();
    data.insert("AAA", vec![flat("2024-01-02", 10.0), flat("2024-01-03", 10.0)]);
    data.insert("BBB", vec![flat("2024-01-02", 20.0), flat("2024-01-03", 20.0)]);
    let mut config = test_config("AAA", "2024-01-01", "2024-01-03");
    config.symbols = vec!["AAA".to_string(), "BBB".to_string()];
    config.position_size_percent = None;
    let result = run(
        &data,
        vec![buy("2024-01-02", "AAA"), buy("2024-01-02", "BBB")],
        &config,
    );

    let qty: Vec<Decimal> = result.trades.iter().map(|t| t.quantity).collect();
    assert_eq!(qty, vec![Decimal::from(500), Decimal::from(250)]);
}

// --- Timeline and metrics ---

#[test]
fn test_daily_performance_skips_weekends() {
    let data = dataset(
        "AAPL",
        vec![
            flat("2024-01-05", 100.0),
            flat("2024-01-06", 101.0),
            flat("2024-01-07", 102.0),
            flat("2024-01-08", 103.0),
        ],
    );
    let config = test_config("AAPL", "2024-01-01", "2024-01-08");
    let result = run(&data, vec![], &config);

    let dates: Vec<NaiveDate> = result.daily_performance.iter().map(|p| p.date).collect();
    assert_eq!(dates, vec![d("2024-01-05"), d("2024-01-08")]);
    for pair in dates.windows(2) {
        assert!(pair[0] < pair[1]);
    }
    assert!(dates.iter().all(|dt| dt.weekday().number_from_monday() <= 5));
}

#[test]
fn test_flat_returns_have_zero_volatility_and_sharpe() {
    let bars: Vec<HistoricalBar> = ["2024-01-02", "2024-01-03", "2024-01-04", "2024-01-05"]
        .iter()
        .map(|dt| flat(dt, 50.0))
        .collect();
    let data = dataset("AAPL", bars);
    let config = test_config("AAPL", "2024-01-01", "2024-01-05");
    let result = run(&data, vec![], &config);

    let m = &result.metrics;
    assert_eq!(m.volatility, 0.0);
    assert_eq!(m.sharpe_ratio, 0.0);
    assert_eq!(m.sortino_ratio, 0.0);
    assert_eq!(m.max_drawdown, 0.0);
    assert_eq!(m.calmar_ratio, 0.0);
    assert_eq!(m.total_trades, 0);
    assert_eq!(m.profit_factor, 0.0);
}

#[test]
fn test_metrics_are_finite_on_synthetic_data() {
    let provider = SyntheticMarketData::new(3);
    let bars = provider.generate("SPY", d("2023-01-01"), d("2024-06-30")).unwrap();
    let data = dataset("SPY", bars);
    let mut config = test_config("SPY", "2024-01-01", "2024-06-30");
    config.parameters = params([
        ("fast_period", ParamValue::Int(5)),
        ("slow_period", ParamValue::Int(20)),
    ]);
    config.allow_short = true;
    config.stop_loss_percent = Some(0.03);

    let engine = BacktestEngine::new(Arc::new(provider), reference_registry());
    let result = engine.simulate(&config, &data, &RunLimits::unbounded()).unwrap();
    let m = &result.metrics;
    for v in [
        m.total_return,
        m.annualized_return,
        m.volatility,
        m.sharpe_ratio,
        m.sortino_ratio,
        m.calmar_ratio,
        m.max_drawdown,
        m.win_rate,
        m.profit_factor,
        m.value_at_risk_95,
        m.conditional_var_95,
    ] {
        assert!(v.is_finite());
    }
    assert!(m.max_drawdown >= 0.0 && m.max_drawdown <= 1.0);
    assert!(m.exposure >= 0.0 && m.exposure <= 1.0);
}

#[test]
fn test_benchmark_beta_alpha_reported() {
    let provider = SyntheticMarketData::new(5);
    let mut data = MarketDataSet::new();
    data.insert("AAPL", provider.generate("AAPL", d("2023-06-01"), d("2024-03-31")).unwrap());
    data.insert("SPY", provider.generate("SPY", d("2023-06-01"), d("2024-03-31")).unwrap());
    let mut config = test_config("AAPL", "2024-01-01", "2024-03-31");
    config.benchmark = Some("SPY".to_string());

    let engine = BacktestEngine::new(Arc::new(provider), reference_registry());
    let result = engine.simulate(&config, &data, &RunLimits::unbounded()).unwrap();
    assert!(result.metrics.beta.unwrap().is_finite());
    assert!(result.metrics.alpha.unwrap().is_finite());

    let mut no_bench = config.clone();
    no_bench.benchmark = None;
    let result = engine.simulate(&no_bench, &data, &RunLimits::unbounded()).unwrap();
    assert_eq!(result.metrics.beta, None);
}

// --- Signal visibility ---

#[test]
fn test_generator_never_sees_bars_past_end() {
    let provider = SyntheticMarketData::new(1);
    let bars = provider.generate("AAPL", d("2023-10-01"), d("2024-12-31")).unwrap();
    let data = dataset("AAPL", bars);
    let config = test_config("AAPL", "2024-01-01", "2024-03-31");

    let peeking = Arc::new(PeekingSignals::default());
    let mut registry = SignalGeneratorRegistry::new();
    registry.register(StrategyType::Momentum, peeking.clone());
    let engine = BacktestEngine::new(Arc::new(provider), registry);
    engine.simulate(&config, &data, &RunLimits::unbounded()).unwrap();

    let seen = peeking.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    let (first, last) = seen[0];
    assert!(first < config.start_date, "lookback history is visible");
    assert!(last <= config.end_date);
}

// --- Errors and limits ---

#[test]
fn test_unsupported_strategy() {
    let data = dataset("AAPL", five_day_week());
    let mut config = test_config("AAPL", "2024-01-01", "2024-01-08");
    config.strategy_type = StrategyType::PairsTrading;
    let engine = engine_with(data.clone(), vec![]);
    let err = engine
        .simulate(&config, &data, &RunLimits::unbounded())
        .unwrap_err();
    assert!(matches!(err, BacktestError::UnsupportedStrategy(StrategyType::PairsTrading)));
}

#[test]
fn test_past_deadline_times_out() {
    let data = dataset("AAPL", five_day_week());
    let config = test_config("AAPL", "2024-01-01", "2024-01-08");
    let engine = engine_with(data.clone(), vec![]);
    let limits = RunLimits::new(Some(Instant::now()), None);
    let err = engine.simulate(&config, &data, &limits).unwrap_err();
    assert!(matches!(err, BacktestError::Timeout { .. }));
}

#[test]
fn test_cancel_flag_stops_simulation() {
    let data = dataset("AAPL", five_day_week());
    let config = test_config("AAPL", "2024-01-01", "2024-01-08");
    let engine = engine_with(data.clone(), vec![]);
    let limits = RunLimits::new(None, Some(Arc::new(AtomicBool::new(true))));
    let err = engine.simulate(&config, &data, &limits).unwrap_err();
    assert!(matches!(err, BacktestError::Cancelled));
}

#[test]
fn test_no_trading_days_in_range() {
    let data = dataset("AAPL", five_day_week());
    let config = test_config("AAPL", "2024-02-01", "2024-02-28");
    let engine = engine_with(data.clone(), vec![]);
    let err = engine
        .simulate(&config, &data, &RunLimits::unbounded())
        .unwrap_err();
    assert!(matches!(err, BacktestError::NoTradingDays { .. }));
}

#[tokio::test]
async fn test_fetch_failure_aborts_run() {
    let data = dataset("AAPL", five_day_week());
    let engine = engine_with(data, vec![]);
    let config = test_config("MSFT", "2024-01-01", "2024-01-08");
    let err = engine.run_backtest(&config).await.unwrap_err();
    assert!(matches!(err, BacktestError::DataFetch { ref symbol, .. } if symbol == "MSFT"));
}

#[tokio::test]
async fn test_run_backtest_is_deterministic() {
    let engine = BacktestEngine::new(Arc::new(SyntheticMarketData::new(9)), reference_registry());
    let mut config = test_config("QQQ", "2024-01-01", "2024-06-30");
    config.strategy_type = StrategyType::MeanReversion;

    let a = engine.run_backtest(&config).await.unwrap();
    let b = engine.run_backtest(&config).await.unwrap();
    assert_eq!(a, b);
}

// --- Walk-forward ---

#[tokio::test]
async fn test_walk_forward_chains_windows() {
    let engine = BacktestEngine::new(Arc::new(SyntheticMarketData::new(21)), reference_registry());
    let mut config = test_config("SPY", "2024-01-01", "2024-12-31");
    config.parameters = params([
        ("fast_period", ParamValue::Int(5)),
        ("slow_period", ParamValue::Int(15)),
    ]);
    config.walk_forward = Some(WalkForwardConfig {
        train_days: 90,
        test_days: 60,
        step_days: None,
    });

    let result = engine.run_backtest(&config).await.unwrap();
    let windows = result.walk_forward.as_ref().unwrap();
    assert!(windows.len() >= 4);
    assert!(windows.iter().all(|w| w.parameters == config.parameters));

    // Out-of-sample rows are concatenated chronologically
    for pair in result.daily_performance.windows(2) {
        assert!(pair[0].date < pair[1].date);
    }
    let first_test = windows[0].test_start;
    assert!(result.daily_performance[0].date >= first_test);

    let last_equity = result.daily_performance.last().unwrap().equity;
    assert!((result.metrics.final_equity - last_equity.to_f64().unwrap()).abs() < 1e-6);
    let worst = result
        .daily_performance
        .iter()
        .map(|p| p.drawdown)
        .fold(0.0, f64::max);
    assert!((result.metrics.max_drawdown - worst).abs() < 1e-12);
}

#[test]
fn test_walk_forward_step_shorter_than_test_rejected() {
    let mut config = test_config("SPY", "2024-01-01", "2024-12-31");
    config.walk_forward = Some(WalkForwardConfig {
        train_days: 90,
        test_days: 60,
        step_days: Some(30),
    });
    assert!(matches!(config.validate(), Err(BacktestError::InvalidConfig(_))));

    let data = dataset("SPY", five_day_week());
    let engine = engine_with(data.clone(), vec![]);
    assert!(matches!(
        engine.simulate(&config, &data, &RunLimits::unbounded()),
        Err(BacktestError::InvalidConfig(_))
    ));
}

#[tokio::test]
async fn test_walk_forward_custom_step_keeps_dates_unique() {
    let engine = BacktestEngine::new(Arc::new(SyntheticMarketData::new(21)), reference_registry());
    let mut config = test_config("SPY", "2024-01-01", "2024-12-31");
    config.parameters = params([
        ("fast_period", ParamValue::Int(5)),
        ("slow_period", ParamValue::Int(15)),
    ]);
    config.walk_forward = Some(WalkForwardConfig {
        train_days: 90,
        test_days: 60,
        step_days: Some(75),
    });

    let result = engine.run_backtest(&config).await.unwrap();
    assert!(result.walk_forward.as_ref().unwrap().len() >= 3);
    for pair in result.daily_performance.windows(2) {
        assert!(pair[0].date < pair[1].date);
    }
}

/// Weekdays of January 2024 with a steady uptrend.
fn january_uptrend() -> Vec<HistoricalBar> {
    (1..=31)
        .map(|day| NaiveDate::from_ymd_opt(2024, 1, day).unwrap())
        .filter(|date| date.weekday().num_days_from_monday() < 5)
        .map(|date| {
            let price = 100.0 + f64::from(date.day());
            HistoricalBar {
                date,
                open: Decimal::from_f64(price).unwrap(),
                high: Decimal::from_f64(price + 0.5).unwrap(),
                low: Decimal::from_f64(price - 0.5).unwrap(),
                close: Decimal::from_f64(price + 0.25).unwrap(),
                volume: 1_000_000.0,
            }
        })
        .collect()
}

#[test]
fn test_walk_forward_liquidates_between_windows() {
    let data = dataset("SPY", january_uptrend());
    // Test windows: Jan 6-12, 13-19, 20-26, 27-31
    let mut config = test_config("SPY", "2024-01-01", "2024-01-31");
    config.walk_forward = Some(WalkForwardConfig {
        train_days: 5,
        test_days: 7,
        step_days: None,
    });
    let result = run(
        &data,
        vec![buy("2024-01-08", "SPY"), buy("2024-01-29", "SPY")],
        &config,
    );

    let windows = result.walk_forward.as_ref().unwrap();
    assert_eq!(windows.len(), 4);
    let final_test_start = windows.last().unwrap().test_start;

    // Held across the first window's end: sold at its last close
    let settled: Vec<&Trade> = result.trades.iter().filter(|t| t.is_closed()).collect();
    assert_eq!(settled.len(), 1);
    assert_eq!(settled[0].entry_date, d("2024-01-09"));
    assert_eq!(settled[0].exit_date, Some(d("2024-01-12")));
    assert_eq!(settled[0].exit_reason, Some(ExitReason::WindowEnd));
    assert!(settled[0].pnl > Decimal::ZERO);

    // Only the final window may leave a position open
    let open: Vec<&Trade> = result.trades.iter().filter(|t| !t.is_closed()).collect();
    assert_eq!(open.len(), 1);
    assert!(open.iter().all(|t| t.entry_date >= final_test_start));
    assert_eq!(result.metrics.open_trades, 1);
    assert_eq!(result.metrics.total_trades, 1);
    assert_eq!(result.metrics.winning_trades, 1);

    let window_close = result
        .daily_performance
        .iter()
        .find(|p| p.date == d("2024-01-12"))
        .unwrap();
    assert_eq!(window_close.holdings_value, Decimal::ZERO);
    assert!(window_close.positions.is_empty());
    assert_eq!(window_close.equity, window_close.cash);
}
