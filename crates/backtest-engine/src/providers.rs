use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::BacktestError;
use crate::models::{BarInterval, HistoricalBar, ParameterMap, Signal, StrategyType};

/// Source of historical bars.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Bars for `symbol` in `[start, end]`, any order.
    async fn get_historical_data(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        interval: BarInterval,
        include_dividends: bool,
        include_corporate_actions: bool,
    ) -> Result<Vec<HistoricalBar>, BacktestError>;

    /// Provider name for logs.
    fn name(&self) -> &str {
        "market-data"
    }
}

/// Bars for a set of symbols, each series sorted by date with duplicates dropped.
///
/// Fetched once per run and shared read-only between workers.
#[derive(Debug, Clone, Default)]
pub struct MarketDataSet {
    series: BTreeMap<String, Vec<HistoricalBar>>,
}

impl MarketDataSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_series(series: HashMap<String, Vec<HistoricalBar>>) -> Self {
        let mut set = Self::new();
        for (symbol, bars) in series {
            set.insert(symbol, bars);
        }
        set
    }

    pub fn insert(&mut self, symbol: impl Into<String>, mut bars: Vec<HistoricalBar>) {
        bars.sort_by_key(|b| b.date);
        bars.dedup_by_key(|b| b.date);
        self.series.insert(symbol.into(), bars);
    }

    pub fn bars(&self, symbol: &str) -> Option<&[HistoricalBar]> {
        self.series.get(symbol).map(Vec::as_slice)
    }

    /// Bars for `symbol` dated on or before `end`.
    pub fn bars_until(&self, symbol: &str, end: NaiveDate) -> &[HistoricalBar] {
        match self.bars(symbol) {
            Some(bars) => {
                let cut = bars.partition_point(|b| b.date <= end);
                &bars[..cut]
            }
            None => &[],
        }
    }

    /// Bar for `symbol` on exactly `date`.
    pub fn bar_on(&self, symbol: &str, date: NaiveDate) -> Option<&HistoricalBar> {
        let bars = self.bars(symbol)?;
        bars.binary_search_by_key(&date, |b| b.date)
            .ok()
            .map(|i| &bars[i])
    }

    /// Most recent bar for `symbol` dated on or before `date`.
    pub fn last_bar_on_or_before(&self, symbol: &str, date: NaiveDate) -> Option<&HistoricalBar> {
        self.bars_until(symbol, date).last()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.series.contains_key(symbol)
    }

    pub fn is_empty(&self) -> bool {
        self.series.values().all(Vec::is_empty)
    }
}

/// Provider serving preloaded bars, clipped to the requested range.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMarketData {
    data: MarketDataSet,
}

impl InMemoryMarketData {
    pub fn new(data: MarketDataSet) -> Self {
        Self { data }
    }
}

#[async_trait]
impl MarketDataProvider for InMemoryMarketData {
    async fn get_historical_data(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        _interval: BarInterval,
        _include_dividends: bool,
        _include_corporate_actions: bool,
    ) -> Result<Vec<HistoricalBar>, BacktestError> {
        let bars = self.data.bars(symbol).ok_or_else(|| BacktestError::DataFetch {
            symbol: symbol.to_string(),
            reason: "unknown symbol".to_string(),
        })?;
        Ok(bars
            .iter()
            .filter(|b| b.date >= start && b.date <= end)
            .cloned()
            .collect())
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}

/// Inputs handed to a signal generator for one symbol.
///
/// `bars` never extends past the backtest end date.
pub struct SignalContext<'a> {
    pub symbol: &'a str,
    pub bars: &'a [HistoricalBar],
    pub parameters: &'a ParameterMap,
}

/// Turns bars and parameters into dated buy/sell signals.
pub trait SignalGenerator: Send + Sync {
    fn name(&self) -> &str;

    fn generate(&self, ctx: &SignalContext<'_>) -> Result<Vec<Signal>, BacktestError>;
}

/// Maps strategy types to their signal generators.
#[derive(Clone, Default)]
pub struct SignalGeneratorRegistry {
    generators: HashMap<StrategyType, Arc<dyn SignalGenerator>>,
}

impl SignalGeneratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        strategy_type: StrategyType,
        generator: Arc<dyn SignalGenerator>,
    ) -> &mut Self {
        self.generators.insert(strategy_type, generator);
        self
    }

    pub fn get(&self, strategy_type: StrategyType) -> Result<Arc<dyn SignalGenerator>, BacktestError> {
        self.generators
            .get(&strategy_type)
            .cloned()
            .ok_or(BacktestError::UnsupportedStrategy(strategy_type))
    }

    pub fn supports(&self, strategy_type: StrategyType) -> bool {
        self.generators.contains_key(&strategy_type)
    }

    pub fn strategy_types(&self) -> Vec<StrategyType> {
        let mut types: Vec<StrategyType> = self.generators.keys().copied().collect();
        types.sort();
        types
    }
}

impl std::fmt::Debug for SignalGeneratorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalGeneratorRegistry")
            .field("strategy_types", &self.strategy_types())
            .finish()
    }
}
