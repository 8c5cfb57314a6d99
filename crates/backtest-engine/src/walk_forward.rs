use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use tracing::debug;

use crate::engine::{benchmark_returns_for, drawdown_fraction, BacktestEngine, OpenAtEnd, RunLimits};
use crate::error::BacktestError;
use crate::metrics::compute_metrics;
use crate::models::*;
use crate::providers::MarketDataSet;

/// One train/test split of the backtest range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkForwardWindow {
    pub train_start: NaiveDate,
    pub train_end: NaiveDate,
    pub test_start: NaiveDate,
    pub test_end: NaiveDate,
}

/// Partition `[start, end]` into consecutive train/test windows.
///
/// Each test window directly follows its training window; windows advance by
/// `step_days` (default `test_days`). The last test window is clipped to `end`.
pub fn walk_forward_windows(
    start: NaiveDate,
    end: NaiveDate,
    wf: &WalkForwardConfig,
) -> Vec<WalkForwardWindow> {
    let train = i64::from(wf.train_days.max(1));
    let test = i64::from(wf.test_days.max(1));
    let step = i64::from(wf.step_days.unwrap_or(wf.test_days).max(1));

    let mut windows = Vec::new();
    let mut train_start = start;
    loop {
        let train_end = train_start + Duration::days(train - 1);
        let test_start = train_end + Duration::days(1);
        if test_start > end {
            break;
        }
        let test_end = (test_start + Duration::days(test - 1)).min(end);
        windows.push(WalkForwardWindow {
            train_start,
            train_end,
            test_start,
            test_end,
        });
        train_start += Duration::days(step);
    }
    windows
}

/// Walk-forward backtest.
///
/// Training passes the configured parameters through unchanged; the in-sample
/// run is kept for reporting only. Test windows are simulated in order with
/// capital chained from the previous window, then stitched into one result
/// whose drawdowns and metrics are recomputed over the whole out-of-sample path.
/// Every test window but the last liquidates its positions at its final close,
/// so only the last window can report open trades.
pub fn run_walk_forward(
    engine: &BacktestEngine,
    config: &BacktestConfig,
    wf: &WalkForwardConfig,
    data: &MarketDataSet,
    limits: &RunLimits,
) -> Result<BacktestResult, BacktestError> {
    let windows = walk_forward_windows(config.start_date, config.end_date, wf);
    if windows.is_empty() {
        return Err(BacktestError::InsufficientData(format!(
            "range {} to {} is shorter than one {}-day training window",
            config.start_date, config.end_date, wf.train_days
        )));
    }

    // Runs on the caller's thread; candidate evaluation already fans out
    let in_sample: Vec<BacktestMetrics> = windows
        .iter()
        .map(|w| {
            let is_config = config.with_window(w.train_start, w.train_end);
            skip_empty_window(engine.simulate_window(&is_config, data, limits))
                .map(|r| r.map(|r| r.metrics).unwrap_or_default())
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut cumulative_capital = config.initial_capital;
    let mut trades: Vec<Trade> = Vec::new();
    let mut daily: Vec<DailyPerformance> = Vec::new();
    let mut window_results = Vec::with_capacity(windows.len());

    let last_index = windows.len() - 1;
    for (i, (window, is_metrics)) in windows.iter().zip(in_sample).enumerate() {
        let mut oos_config = config.with_window(window.test_start, window.test_end);
        oos_config.initial_capital = cumulative_capital;
        let open_at_end = if i == last_index {
            OpenAtEnd::Mark
        } else {
            OpenAtEnd::Liquidate
        };

        let Some(oos) =
            skip_empty_window(engine.simulate_span(&oos_config, data, limits, open_at_end))?
        else {
            debug!(
                "Walk-forward window {} ({} to {}) has no trading days, skipping",
                i + 1,
                window.test_start,
                window.test_end
            );
            continue;
        };

        if let Some(last) = oos.daily_performance.last() {
            cumulative_capital = last.equity;
        }
        trades.extend(oos.trades);
        daily.extend(oos.daily_performance);

        window_results.push(WalkForwardWindowResult {
            index: i + 1,
            train_start: window.train_start,
            train_end: window.train_end,
            test_start: window.test_start,
            test_end: window.test_end,
            parameters: config.parameters.clone(),
            in_sample: is_metrics,
            out_of_sample: oos.metrics,
        });
    }

    if daily.is_empty() {
        return Err(BacktestError::InsufficientData(
            "no walk-forward test window contained trading days".to_string(),
        ));
    }

    // Drawdowns restart per window; recompute over the stitched curve
    let mut peak = config.initial_capital.max(Decimal::ZERO);
    for row in &mut daily {
        if row.equity > peak {
            peak = row.equity;
        }
        row.drawdown = drawdown_fraction(peak, row.equity);
    }

    let dates: Vec<NaiveDate> = daily.iter().map(|d| d.date).collect();
    let bench = config
        .benchmark
        .as_deref()
        .and_then(|b| benchmark_returns_for(data, b, &dates));
    let metrics = compute_metrics(config.initial_capital, &daily, &trades, bench.as_deref());

    debug!(
        "Walk-forward {}: {} windows, {} out-of-sample trades",
        config.strategy_type,
        window_results.len(),
        trades.len()
    );

    Ok(BacktestResult {
        metrics,
        trades,
        daily_performance: daily,
        walk_forward: Some(window_results),
    })
}

/// Windows that fall entirely on non-trading days produce `None` instead of an error.
fn skip_empty_window(
    result: Result<BacktestResult, BacktestError>,
) -> Result<Option<BacktestResult>, BacktestError> {
    match result {
        Ok(r) => Ok(Some(r)),
        Err(BacktestError::NoTradingDays { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}
