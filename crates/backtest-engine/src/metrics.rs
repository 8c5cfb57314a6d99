use rust_decimal::prelude::*;
use statrs::statistics::{Data, OrderStatistics, Statistics};

use crate::models::{BacktestMetrics, DailyPerformance, Trade};

const TRADING_DAYS_PER_YEAR: f64 = 252.0;
/// Profit factor reported when there are winners but no losers.
pub const PROFIT_FACTOR_CAP: f64 = 100.0;

/// Compute every scalar statistic of a run from its trades and daily equity curve.
///
/// All outputs are finite; degenerate inputs (no trades, flat equity, a single
/// day) yield 0 for the affected statistic.
pub fn compute_metrics(
    initial_capital: Decimal,
    daily: &[DailyPerformance],
    trades: &[Trade],
    benchmark_returns: Option<&[f64]>,
) -> BacktestMetrics {
    let initial = initial_capital.to_f64().unwrap_or(0.0);
    let final_equity = daily
        .last()
        .map(|d| d.equity.to_f64().unwrap_or(0.0))
        .unwrap_or(initial);

    let total_return = if initial > 0.0 {
        final_equity / initial - 1.0
    } else {
        0.0
    };

    let span_days = match (daily.first(), daily.last()) {
        (Some(first), Some(last)) => (last.date - first.date).num_days().max(1),
        _ => 1,
    };
    let annualized_return = annualize(total_return, span_days);

    let returns: Vec<f64> = daily.iter().map(|d| d.daily_return).collect();
    let volatility = annualized_volatility(&returns);
    let sharpe_ratio = if volatility > 0.0 {
        finite_or_zero(annualized_return / volatility)
    } else {
        0.0
    };

    let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    let downside_deviation = annualized_volatility(&downside);
    let sortino_ratio = if downside_deviation > 0.0 {
        finite_or_zero(annualized_return / downside_deviation)
    } else {
        0.0
    };

    let max_drawdown = daily.iter().map(|d| d.drawdown).fold(0.0, f64::max);
    let calmar_ratio = if max_drawdown > 0.0 {
        finite_or_zero(annualized_return / max_drawdown)
    } else {
        0.0
    };

    let trade_stats = TradeStats::from_trades(trades);
    let exposure = if daily.is_empty() {
        0.0
    } else {
        daily.iter().filter(|d| !d.positions.is_empty()).count() as f64 / daily.len() as f64
    };
    let (value_at_risk_95, conditional_var_95) = historical_var(&returns, 5);
    let (beta, alpha) = match benchmark_returns {
        Some(bench) => {
            let (b, a) = beta_alpha(&returns, bench);
            (Some(b), Some(a))
        }
        None => (None, None),
    };

    BacktestMetrics {
        total_return: finite_or_zero(total_return),
        annualized_return,
        volatility,
        sharpe_ratio,
        sortino_ratio,
        calmar_ratio,
        max_drawdown,
        max_drawdown_duration_days: max_drawdown_duration_days(daily),
        win_rate: trade_stats.win_rate,
        profit_factor: trade_stats.profit_factor,
        total_trades: trade_stats.closed,
        winning_trades: trade_stats.winners,
        losing_trades: trade_stats.losers,
        open_trades: trade_stats.open,
        average_win: trade_stats.average_win,
        average_loss: trade_stats.average_loss,
        largest_win: trade_stats.largest_win,
        largest_loss: trade_stats.largest_loss,
        average_holding_period_days: trade_stats.average_holding_days,
        exposure,
        total_commission: trade_stats.total_commission,
        total_slippage: trade_stats.total_slippage,
        final_equity: finite_or_zero(final_equity),
        value_at_risk_95,
        conditional_var_95,
        beta,
        alpha,
    }
}

/// `(1 + r)^(365 / days) - 1`, or -1 once equity is wiped out.
pub fn annualize(total_return: f64, span_days: i64) -> f64 {
    let growth = 1.0 + total_return;
    if growth <= 0.0 {
        return -1.0;
    }
    let days = span_days.max(1) as f64;
    finite_or_zero(growth.powf(365.0 / days) - 1.0)
}

/// Sample standard deviation of daily returns scaled to a year.
pub fn annualized_volatility(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let variance = returns.variance();
    finite_or_zero((variance * TRADING_DAYS_PER_YEAR).sqrt())
}

/// Longest stretch, in calendar days, spent below a previous equity peak.
pub fn max_drawdown_duration_days(daily: &[DailyPerformance]) -> i64 {
    let Some(first) = daily.first() else {
        return 0;
    };
    let mut peak = first.equity;
    let mut peak_date = first.date;
    let mut longest = 0;
    for day in daily {
        if day.equity >= peak {
            peak = day.equity;
            peak_date = day.date;
        } else {
            longest = longest.max((day.date - peak_date).num_days());
        }
    }
    longest
}

/// Historical VaR and CVaR at the given lower percentile, as positive loss fractions.
pub fn historical_var(returns: &[f64], percentile: usize) -> (f64, f64) {
    if returns.len() < 2 {
        return (0.0, 0.0);
    }
    let mut data = Data::new(returns.to_vec());
    let cutoff = data.percentile(percentile);
    if !cutoff.is_finite() {
        return (0.0, 0.0);
    }
    let tail: Vec<f64> = returns.iter().copied().filter(|r| *r <= cutoff).collect();
    let tail_mean = if tail.is_empty() { cutoff } else { tail.as_slice().mean() };
    (
        finite_or_zero((-cutoff).max(0.0)),
        finite_or_zero((-tail_mean).max(0.0)),
    )
}

/// Beta and annualized alpha of strategy returns against a benchmark.
pub fn beta_alpha(returns: &[f64], benchmark: &[f64]) -> (f64, f64) {
    let n = returns.len().min(benchmark.len());
    if n < 2 {
        return (0.0, 0.0);
    }
    let strat = &returns[..n];
    let bench = &benchmark[..n];

    let bench_variance = bench.variance();
    let beta = if bench_variance > 0.0 && bench_variance.is_finite() {
        finite_or_zero(strat.covariance(bench) / bench_variance)
    } else {
        0.0
    };
    let alpha = finite_or_zero((strat.mean() - beta * bench.mean()) * TRADING_DAYS_PER_YEAR);
    (beta, alpha)
}

pub fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

/// Trade-level aggregates. Win/loss statistics use closed trades only.
struct TradeStats {
    closed: usize,
    open: usize,
    winners: usize,
    losers: usize,
    win_rate: f64,
    profit_factor: f64,
    average_win: f64,
    average_loss: f64,
    largest_win: f64,
    largest_loss: f64,
    average_holding_days: f64,
    total_commission: f64,
    total_slippage: f64,
}

impl TradeStats {
    fn from_trades(trades: &[Trade]) -> Self {
        let closed: Vec<f64> = trades
            .iter()
            .filter(|t| t.is_closed())
            .map(|t| t.pnl.to_f64().unwrap_or(0.0))
            .collect();
        let wins: Vec<f64> = closed.iter().copied().filter(|p| *p > 0.0).collect();
        let losses: Vec<f64> = closed.iter().copied().filter(|p| *p < 0.0).collect();

        let gross_profit: f64 = wins.iter().sum();
        let gross_loss: f64 = losses.iter().map(|l| l.abs()).sum();

        let profit_factor = if gross_loss > 0.0 {
            finite_or_zero(gross_profit / gross_loss)
        } else if gross_profit > 0.0 {
            PROFIT_FACTOR_CAP
        } else {
            0.0
        };

        let holding: Vec<f64> = trades
            .iter()
            .filter(|t| t.is_closed())
            .map(|t| t.holding_period_days as f64)
            .collect();

        Self {
            closed: closed.len(),
            open: trades.len() - closed.len(),
            winners: wins.len(),
            losers: losses.len(),
            win_rate: if closed.is_empty() {
                0.0
            } else {
                wins.len() as f64 / closed.len() as f64
            },
            profit_factor,
            average_win: if wins.is_empty() { 0.0 } else { gross_profit / wins.len() as f64 },
            average_loss: if losses.is_empty() {
                0.0
            } else {
                -gross_loss / losses.len() as f64
            },
            largest_win: wins.iter().copied().fold(0.0, f64::max),
            largest_loss: losses.iter().copied().fold(0.0, f64::min),
            average_holding_days: if holding.is_empty() {
                0.0
            } else {
                holding.iter().sum::<f64>() / holding.len() as f64
            },
            total_commission: trades
                .iter()
                .map(|t| t.commission.to_f64().unwrap_or(0.0))
                .sum(),
            total_slippage: trades
                .iter()
                .map(|t| t.slippage.to_f64().unwrap_or(0.0))
                .sum(),
        }
    }
}
