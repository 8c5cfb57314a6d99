use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use rust_decimal::prelude::*;
use tracing::{debug, info};

use crate::costs::{self, FillSide};
use crate::error::BacktestError;
use crate::metrics::compute_metrics;
use crate::models::*;
use crate::providers::{MarketDataProvider, MarketDataSet, SignalContext, SignalGeneratorRegistry};
use crate::walk_forward::run_walk_forward;

/// Cooperative limits checked once per simulated day.
#[derive(Debug, Clone, Default)]
pub struct RunLimits {
    pub deadline: Option<Instant>,
    pub cancel: Option<Arc<AtomicBool>>,
}

impl RunLimits {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn new(deadline: Option<Instant>, cancel: Option<Arc<AtomicBool>>) -> Self {
        Self { deadline, cancel }
    }

    fn check(&self, date: NaiveDate, started: Instant) -> Result<(), BacktestError> {
        if let Some(flag) = &self.cancel {
            if flag.load(Ordering::Relaxed) {
                return Err(BacktestError::Cancelled);
            }
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(BacktestError::Timeout {
                    date,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                });
            }
        }
        Ok(())
    }
}

/// Daily-bar backtesting engine with next-bar execution, directional slippage,
/// portfolio-equity sizing, stop-loss and take-profit.
///
/// Market data and signal generation are injected; the simulation itself is a
/// pure function of the configuration and the loaded bars.
#[derive(Clone)]
pub struct BacktestEngine {
    provider: Arc<dyn MarketDataProvider>,
    generators: SignalGeneratorRegistry,
}

/// What happens to positions still held on a window's last trading day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpenAtEnd {
    /// Report them unclosed, marked at the last close.
    Mark,
    /// Sell or cover them at the last close, with costs.
    Liquidate,
}

/// An open position being tracked during the backtest.
struct OpenPosition {
    side: TradeSide,
    entry_date: NaiveDate,
    /// The actual fill price (includes entry slippage).
    entry_price: Decimal,
    shares: Decimal,
    stop_loss_price: Option<Decimal>,
    take_profit_price: Option<Decimal>,
    entry_commission: Decimal,
    entry_slippage: Decimal,
}

impl BacktestEngine {
    pub fn new(provider: Arc<dyn MarketDataProvider>, generators: SignalGeneratorRegistry) -> Self {
        Self {
            provider,
            generators,
        }
    }

    pub fn generators(&self) -> &SignalGeneratorRegistry {
        &self.generators
    }

    pub fn supports(&self, strategy_type: StrategyType) -> bool {
        self.generators.supports(strategy_type)
    }

    /// Fetch daily bars for every configured symbol (and the benchmark), including
    /// `lookback_days` of warm-up history before the start date.
    ///
    /// Any provider failure aborts the fetch.
    pub async fn fetch_market_data(
        &self,
        config: &BacktestConfig,
    ) -> Result<MarketDataSet, BacktestError> {
        let fetch_start = config.start_date - Duration::days(i64::from(config.lookback_days));

        let mut symbols: Vec<&String> = config.symbols.iter().collect();
        if let Some(benchmark) = &config.benchmark {
            if !symbols.contains(&benchmark) {
                symbols.push(benchmark);
            }
        }

        let mut data = MarketDataSet::new();
        for symbol in symbols {
            let bars = self
                .provider
                .get_historical_data(
                    symbol,
                    fetch_start,
                    config.end_date,
                    BarInterval::Day,
                    false,
                    false,
                )
                .await
                .map_err(|e| match e {
                    BacktestError::DataFetch { .. } => e,
                    other => BacktestError::DataFetch {
                        symbol: symbol.clone(),
                        reason: other.to_string(),
                    },
                })?;

            if bars.is_empty() {
                return Err(BacktestError::InsufficientData(format!(
                    "{} returned no bars for {} between {} and {}",
                    self.provider.name(),
                    symbol,
                    fetch_start,
                    config.end_date
                )));
            }
            debug!("Fetched {} bars for {}", bars.len(), symbol);
            data.insert(symbol.clone(), bars);
        }

        Ok(data)
    }

    /// Fetch data and run a single backtest (walk-forward when configured).
    pub async fn run_backtest(&self, config: &BacktestConfig) -> Result<BacktestResult, BacktestError> {
        config.validate()?;
        self.generators.get(config.strategy_type)?;

        let data = self.fetch_market_data(config).await?;
        let result = self.simulate(config, &data, &RunLimits::unbounded())?;

        info!(
            "Backtest {} on {:?}: {} trades, total return {:.2}%",
            config.strategy_type,
            config.symbols,
            result.metrics.total_trades,
            result.metrics.total_return * 100.0
        );
        Ok(result)
    }

    /// Simulate against already-loaded data.
    pub fn simulate(
        &self,
        config: &BacktestConfig,
        data: &MarketDataSet,
        limits: &RunLimits,
    ) -> Result<BacktestResult, BacktestError> {
        config.validate()?;
        match &config.walk_forward {
            Some(wf) => run_walk_forward(self, config, wf, data, limits),
            None => self.simulate_window(config, data, limits),
        }
    }

    /// Simulate one contiguous window, ignoring any walk-forward settings.
    ///
    /// Signals raised at the close of day d execute at the open of the next
    /// rebalance day, which removes look-ahead bias.
    pub fn simulate_window(
        &self,
        config: &BacktestConfig,
        data: &MarketDataSet,
        limits: &RunLimits,
    ) -> Result<BacktestResult, BacktestError> {
        self.simulate_span(config, data, limits, OpenAtEnd::Mark)
    }

    pub(crate) fn simulate_span(
        &self,
        config: &BacktestConfig,
        data: &MarketDataSet,
        limits: &RunLimits,
        open_at_end: OpenAtEnd,
    ) -> Result<BacktestResult, BacktestError> {
        let started = Instant::now();
        let generator = self.generators.get(config.strategy_type)?;

        // Unified weekday timeline across all symbols
        let mut date_set: BTreeSet<NaiveDate> = BTreeSet::new();
        for symbol in &config.symbols {
            let bars = data.bars(symbol).ok_or_else(|| {
                BacktestError::InsufficientData(format!("no market data loaded for {symbol}"))
            })?;
            date_set.extend(
                bars.iter()
                    .map(|b| b.date)
                    .filter(|d| *d >= config.start_date && *d <= config.end_date && is_weekday(*d)),
            );
        }
        if date_set.is_empty() {
            return Err(BacktestError::NoTradingDays {
                start: config.start_date,
                end: config.end_date,
            });
        }
        let all_dates: Vec<NaiveDate> = date_set.into_iter().collect();

        // Signals see history up to the end date only
        let mut signals_by_date: HashMap<NaiveDate, Vec<Signal>> = HashMap::new();
        for symbol in &config.symbols {
            let ctx = SignalContext {
                symbol,
                bars: data.bars_until(symbol, config.end_date),
                parameters: &config.parameters,
            };
            for signal in generator.generate(&ctx)? {
                if signal.date >= config.start_date && signal.date <= config.end_date {
                    signals_by_date.entry(signal.date).or_default().push(signal);
                }
            }
        }

        let weight = match config.position_size_percent {
            Some(pct) => pct / 100.0,
            None => 1.0 / config.symbols.len() as f64,
        };
        let weight_dec = Decimal::from_f64(weight).unwrap_or(Decimal::ZERO);

        let mut cash = config.initial_capital;
        let mut positions: BTreeMap<String, OpenPosition> = BTreeMap::new();
        let mut trades: Vec<Trade> = Vec::new();
        let mut daily_performance: Vec<DailyPerformance> = Vec::with_capacity(all_dates.len());
        let mut pending: BTreeMap<String, SignalAction> = BTreeMap::new();
        let mut last_close: HashMap<String, Decimal> = HashMap::new();
        let mut previous_date: Option<NaiveDate> = None;
        let mut prev_equity = config.initial_capital;
        let mut peak_equity = config.initial_capital;

        for &date in &all_dates {
            limits.check(date, started)?;

            // 1. Execute pending signals at today's OPEN on rebalance days
            if !pending.is_empty()
                && is_rebalance_day(config.rebalance_frequency, previous_date, date)
            {
                let mut equity_at_open = cash;
                for (symbol, pos) in &positions {
                    let price = data
                        .bar_on(symbol, date)
                        .map(|b| b.open)
                        .or_else(|| last_close.get(symbol).copied())
                        .unwrap_or(pos.entry_price);
                    equity_at_open += signed_value(pos, price);
                }
                let target_value = equity_at_open * weight_dec;

                let mut deferred = BTreeMap::new();
                for (symbol, action) in std::mem::take(&mut pending) {
                    let bar = match data.bar_on(&symbol, date) {
                        Some(b) => b,
                        None => {
                            // No print for this symbol today; retry on the next rebalance day
                            deferred.insert(symbol, action);
                            continue;
                        }
                    };

                    let held_side = positions.get(&symbol).map(|p| p.side);
                    match (action, held_side) {
                        (SignalAction::Buy, Some(TradeSide::Short))
                        | (SignalAction::Sell, Some(TradeSide::Long)) => {
                            if let Some(pos) = positions.remove(&symbol) {
                                let (trade, cash_delta) = Self::close_position(
                                    pos,
                                    &symbol,
                                    date,
                                    bar.open,
                                    config,
                                    ExitReason::Signal,
                                );
                                cash += cash_delta;
                                trades.push(trade);
                            }
                        }
                        (SignalAction::Buy, None) => {
                            if let Some(pos) =
                                Self::open_long(config, date, bar.open, target_value, cash)
                            {
                                cash -= pos.entry_price * pos.shares + pos.entry_commission;
                                positions.insert(symbol, pos);
                            }
                        }
                        (SignalAction::Sell, None) if config.allow_short => {
                            if let Some(pos) = Self::open_short(config, date, bar.open, target_value)
                            {
                                cash += pos.entry_price * pos.shares - pos.entry_commission;
                                positions.insert(symbol, pos);
                            }
                        }
                        // Already positioned in the signal's direction, or shorting disabled
                        _ => {}
                    }
                }
                pending = deferred;
            }

            // 2. Stop-loss / take-profit checked against the day's range
            let mut to_close: Vec<(String, Decimal, ExitReason)> = Vec::new();
            for (symbol, pos) in &positions {
                if let Some(bar) = data.bar_on(symbol, date) {
                    if let Some((raw_fill, reason)) = Self::check_exit_levels(pos, bar) {
                        to_close.push((symbol.clone(), raw_fill, reason));
                    }
                }
            }
            for (symbol, raw_exit_price, reason) in to_close {
                if let Some(pos) = positions.remove(&symbol) {
                    let (trade, cash_delta) =
                        Self::close_position(pos, &symbol, date, raw_exit_price, config, reason);
                    cash += cash_delta;
                    trades.push(trade);
                }
            }

            // 3. Today's signals become pending; the latest per symbol wins
            if let Some(day_signals) = signals_by_date.get(&date) {
                for signal in day_signals {
                    pending.insert(signal.symbol.clone(), signal.action);
                }
            }

            // 4. Mark-to-market at close
            for symbol in &config.symbols {
                if let Some(bar) = data.bar_on(symbol, date) {
                    last_close.insert(symbol.clone(), bar.close);
                }
            }
            let mut holdings_value = Decimal::ZERO;
            let mut snapshots = Vec::with_capacity(positions.len());
            for (symbol, pos) in &positions {
                let price = last_close.get(symbol).copied().unwrap_or(pos.entry_price);
                let market_value = signed_value(pos, price);
                holdings_value += market_value;
                snapshots.push(PositionSnapshot {
                    symbol: symbol.clone(),
                    side: pos.side,
                    quantity: pos.shares,
                    price,
                    market_value,
                });
            }

            let equity = cash + holdings_value;
            if equity > peak_equity {
                peak_equity = equity;
            }
            daily_performance.push(DailyPerformance {
                date,
                equity,
                cash,
                holdings_value,
                daily_pnl: equity - prev_equity,
                daily_return: ratio_change(prev_equity, equity),
                drawdown: drawdown_fraction(peak_equity, equity),
                positions: snapshots,
            });

            prev_equity = equity;
            previous_date = Some(date);
        }

        // 5. Positions still open on the last day: reported unclosed, or liquidated at the close
        let last_date = all_dates[all_dates.len() - 1];
        match open_at_end {
            OpenAtEnd::Mark => {
                for (symbol, pos) in positions {
                    let mark = last_close.get(&symbol).copied().unwrap_or(pos.entry_price);
                    trades.push(Self::mark_open_position(pos, &symbol, last_date, mark));
                }
            }
            OpenAtEnd::Liquidate if !positions.is_empty() => {
                for (symbol, pos) in positions {
                    let close = last_close.get(&symbol).copied().unwrap_or(pos.entry_price);
                    let (trade, cash_delta) =
                        Self::close_position(pos, &symbol, last_date, close, config, ExitReason::WindowEnd);
                    cash += cash_delta;
                    trades.push(trade);
                }
                Self::settle_last_day(&mut daily_performance, config.initial_capital, cash);
            }
            OpenAtEnd::Liquidate => {}
        }

        let benchmark_returns = config
            .benchmark
            .as_deref()
            .and_then(|b| benchmark_returns_for(data, b, &all_dates));

        let metrics = compute_metrics(
            config.initial_capital,
            &daily_performance,
            &trades,
            benchmark_returns.as_deref(),
        );

        debug!(
            "Simulated {} {} over {} days in {}ms: {} trades, final equity {:.2}",
            config.strategy_type,
            format_parameters(&config.parameters),
            all_dates.len(),
            started.elapsed().as_millis(),
            trades.len(),
            metrics.final_equity
        );

        Ok(BacktestResult {
            metrics,
            trades,
            daily_performance,
            walk_forward: None,
        })
    }

    // --- Helpers ---

    fn open_long(
        config: &BacktestConfig,
        date: NaiveDate,
        raw_price: Decimal,
        target_value: Decimal,
        cash: Decimal,
    ) -> Option<OpenPosition> {
        let fill_price = costs::fill_price(&config.slippage, raw_price, FillSide::Buy);
        if fill_price <= Decimal::ZERO || target_value < fill_price {
            return None;
        }

        let mut shares = (target_value / fill_price).floor();
        let estimate = costs::commission(&config.commission, shares, fill_price);
        if fill_price * shares + estimate > cash {
            // Reduce to what cash can cover
            shares = ((cash - estimate).max(Decimal::ZERO) / fill_price).floor();
        }
        if shares < Decimal::ONE {
            return None;
        }

        let entry_commission = costs::commission(&config.commission, shares, fill_price);
        if fill_price * shares + entry_commission > cash {
            return None;
        }

        let stop_loss_price = config
            .stop_loss_percent
            .and_then(|pct| Decimal::from_f64(1.0 - pct).map(|d| fill_price * d));
        let take_profit_price = config
            .take_profit_percent
            .and_then(|pct| Decimal::from_f64(1.0 + pct).map(|d| fill_price * d));

        Some(OpenPosition {
            side: TradeSide::Long,
            entry_date: date,
            entry_price: fill_price,
            shares,
            stop_loss_price,
            take_profit_price,
            entry_commission,
            entry_slippage: (fill_price - raw_price) * shares,
        })
    }

    fn open_short(
        config: &BacktestConfig,
        date: NaiveDate,
        raw_price: Decimal,
        target_value: Decimal,
    ) -> Option<OpenPosition> {
        let fill_price = costs::fill_price(&config.slippage, raw_price, FillSide::Sell);
        if fill_price <= Decimal::ZERO || target_value < fill_price {
            return None;
        }

        let shares = (target_value / fill_price).floor();
        if shares < Decimal::ONE {
            return None;
        }
        let entry_commission = costs::commission(&config.commission, shares, fill_price);

        // SL/TP for shorts (inverted)
        let stop_loss_price = config
            .stop_loss_percent
            .and_then(|pct| Decimal::from_f64(1.0 + pct).map(|d| fill_price * d));
        let take_profit_price = config
            .take_profit_percent
            .and_then(|pct| Decimal::from_f64(1.0 - pct).map(|d| fill_price * d));

        Some(OpenPosition {
            side: TradeSide::Short,
            entry_date: date,
            entry_price: fill_price,
            shares,
            stop_loss_price,
            take_profit_price,
            entry_commission,
            entry_slippage: (raw_price - fill_price) * shares,
        })
    }

    /// Raw exit price and reason when the bar's range crosses a stop or target.
    /// Gaps through a level fill at the open.
    fn check_exit_levels(pos: &OpenPosition, bar: &HistoricalBar) -> Option<(Decimal, ExitReason)> {
        match pos.side {
            TradeSide::Long => {
                if let Some(sl) = pos.stop_loss_price {
                    if bar.low <= sl {
                        return Some((bar.open.min(sl), ExitReason::StopLoss));
                    }
                }
                if let Some(tp) = pos.take_profit_price {
                    if bar.high >= tp {
                        return Some((bar.open.max(tp), ExitReason::TakeProfit));
                    }
                }
            }
            TradeSide::Short => {
                if let Some(sl) = pos.stop_loss_price {
                    if bar.high >= sl {
                        return Some((bar.open.max(sl), ExitReason::StopLoss));
                    }
                }
                if let Some(tp) = pos.take_profit_price {
                    if bar.low <= tp {
                        return Some((bar.open.min(tp), ExitReason::TakeProfit));
                    }
                }
            }
        }
        None
    }

    /// Close a position with directional slippage.
    ///
    /// `raw_exit_price` is the price before slippage (bar open, SL/TP level, or the
    /// closing price when a window is liquidated).
    /// Returns the trade record and the change in cash.
    fn close_position(
        pos: OpenPosition,
        symbol: &str,
        date: NaiveDate,
        raw_exit_price: Decimal,
        config: &BacktestConfig,
        reason: ExitReason,
    ) -> (Trade, Decimal) {
        let is_short = pos.side == TradeSide::Short;
        let side = if is_short { FillSide::Buy } else { FillSide::Sell };
        let fill_price = costs::fill_price(&config.slippage, raw_exit_price, side);

        let exit_slippage = (raw_exit_price - fill_price).abs() * pos.shares;
        let exit_commission = costs::commission(&config.commission, pos.shares, fill_price);

        let gross_pnl = if is_short {
            (pos.entry_price - fill_price) * pos.shares
        } else {
            (fill_price - pos.entry_price) * pos.shares
        };
        let net_pnl = gross_pnl - pos.entry_commission - exit_commission;

        let cash_delta = if is_short {
            -(fill_price * pos.shares + exit_commission)
        } else {
            fill_price * pos.shares - exit_commission
        };

        let trade = Trade {
            symbol: symbol.to_string(),
            side: pos.side,
            entry_date: pos.entry_date,
            entry_price: pos.entry_price,
            exit_date: Some(date),
            exit_price: Some(fill_price),
            quantity: pos.shares,
            pnl: net_pnl,
            return_percent: return_percent(pos.side, pos.entry_price, fill_price),
            holding_period_days: (date - pos.entry_date).num_days(),
            commission: pos.entry_commission + exit_commission,
            slippage: pos.entry_slippage + exit_slippage,
            exit_reason: Some(reason),
        };
        (trade, cash_delta)
    }

    /// Rewrite the last equity row after an end-of-window liquidation left only cash.
    fn settle_last_day(daily: &mut [DailyPerformance], initial_capital: Decimal, cash: Decimal) {
        let Some((last, earlier)) = daily.split_last_mut() else {
            return;
        };
        let prior_equity = last.equity - last.daily_pnl;
        let peak = earlier
            .iter()
            .map(|d| d.equity)
            .fold(initial_capital, Decimal::max)
            .max(cash);
        last.cash = cash;
        last.holdings_value = Decimal::ZERO;
        last.equity = cash;
        last.positions.clear();
        last.daily_pnl = cash - prior_equity;
        last.daily_return = ratio_change(prior_equity, cash);
        last.drawdown = drawdown_fraction(peak, cash);
    }

    fn mark_open_position(pos: OpenPosition, symbol: &str, date: NaiveDate, mark: Decimal) -> Trade {
        let gross_pnl = match pos.side {
            TradeSide::Long => (mark - pos.entry_price) * pos.shares,
            TradeSide::Short => (pos.entry_price - mark) * pos.shares,
        };
        Trade {
            symbol: symbol.to_string(),
            side: pos.side,
            entry_date: pos.entry_date,
            entry_price: pos.entry_price,
            exit_date: None,
            exit_price: None,
            quantity: pos.shares,
            pnl: gross_pnl - pos.entry_commission,
            return_percent: return_percent(pos.side, pos.entry_price, mark),
            holding_period_days: (date - pos.entry_date).num_days(),
            commission: pos.entry_commission,
            slippage: pos.entry_slippage,
            exit_reason: None,
        }
    }
}

/// Longs are assets, shorts are liabilities.
fn signed_value(pos: &OpenPosition, price: Decimal) -> Decimal {
    match pos.side {
        TradeSide::Long => price * pos.shares,
        TradeSide::Short => -(price * pos.shares),
    }
}

fn return_percent(side: TradeSide, entry: Decimal, exit: Decimal) -> f64 {
    let entry_f64 = entry.to_f64().unwrap_or(0.0);
    let exit_f64 = exit.to_f64().unwrap_or(0.0);
    if entry_f64 <= 0.0 {
        return 0.0;
    }
    match side {
        TradeSide::Long => (exit_f64 / entry_f64 - 1.0) * 100.0,
        TradeSide::Short => ((entry_f64 - exit_f64) / entry_f64) * 100.0,
    }
}

pub(crate) fn ratio_change(previous: Decimal, current: Decimal) -> f64 {
    let prev = previous.to_f64().unwrap_or(0.0);
    let cur = current.to_f64().unwrap_or(0.0);
    if prev > 0.0 {
        cur / prev - 1.0
    } else {
        0.0
    }
}

pub(crate) fn drawdown_fraction(peak: Decimal, equity: Decimal) -> f64 {
    let peak_f64 = peak.to_f64().unwrap_or(0.0);
    let equity_f64 = equity.to_f64().unwrap_or(0.0);
    if peak_f64 > 0.0 {
        ((peak_f64 - equity_f64) / peak_f64).max(0.0)
    } else {
        0.0
    }
}

pub fn is_weekday(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Whether `date` opens a new rebalance period relative to the previous trading day.
pub fn is_rebalance_day(
    frequency: RebalanceFrequency,
    previous: Option<NaiveDate>,
    date: NaiveDate,
) -> bool {
    let Some(prev) = previous else {
        return true;
    };
    match frequency {
        RebalanceFrequency::Daily => true,
        RebalanceFrequency::Weekly => prev.iso_week() != date.iso_week(),
        RebalanceFrequency::Monthly => (prev.year(), prev.month()) != (date.year(), date.month()),
        RebalanceFrequency::Quarterly => {
            (prev.year(), prev.month0() / 3) != (date.year(), date.month0() / 3)
        }
    }
}

/// Benchmark close-to-close returns aligned to the strategy timeline.
pub(crate) fn benchmark_returns_for(
    data: &MarketDataSet,
    benchmark: &str,
    dates: &[NaiveDate],
) -> Option<Vec<f64>> {
    if !data.contains(benchmark) {
        return None;
    }
    let first = *dates.first()?;
    let mut prev_close = first
        .pred_opt()
        .and_then(|d| data.last_bar_on_or_before(benchmark, d))
        .map(|b| b.close);

    let mut returns = Vec::with_capacity(dates.len());
    for &date in dates {
        let close = data.last_bar_on_or_before(benchmark, date).map(|b| b.close);
        let r = match (prev_close, close) {
            (Some(p), Some(c)) => ratio_change(p, c),
            _ => 0.0,
        };
        returns.push(r);
        if close.is_some() {
            prev_close = close;
        }
    }
    Some(returns)
}
