use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use rand::distributions::Distribution;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::*;
use statrs::distribution::Normal;

use crate::engine::is_weekday;
use crate::error::BacktestError;
use crate::models::{BarInterval, HistoricalBar};
use crate::providers::MarketDataProvider;

/// Seeded geometric random-walk bars on weekdays.
///
/// Each symbol's path starts at `origin` and depends only on `(seed, symbol)`,
/// so any sub-range request returns the same bars as a longer one.
#[derive(Debug, Clone)]
pub struct SyntheticMarketData {
    pub seed: u64,
    pub origin: NaiveDate,
    pub initial_price: f64,
    /// Daily log drift.
    pub drift: f64,
    /// Daily log volatility.
    pub volatility: f64,
}

impl Default for SyntheticMarketData {
    fn default() -> Self {
        Self {
            seed: 42,
            origin: NaiveDate::from_ymd_opt(2015, 1, 1).unwrap_or_default(),
            initial_price: 100.0,
            drift: 0.0003,
            volatility: 0.015,
        }
    }
}

impl SyntheticMarketData {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            ..Self::default()
        }
    }

    fn symbol_seed(&self, symbol: &str) -> u64 {
        // FNV-1a over the symbol, mixed with the base seed
        symbol.bytes().fold(self.seed ^ 0xcbf2_9ce4_8422_2325, |h, b| {
            (h ^ u64::from(b)).wrapping_mul(0x0000_0100_0000_01b3)
        })
    }

    /// Full bar series for `symbol` from the origin (or `start`, if earlier) through `end`.
    pub fn generate(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<HistoricalBar>, BacktestError> {
        let normal = Normal::new(0.0, 1.0).map_err(|e| BacktestError::DataFetch {
            symbol: symbol.to_string(),
            reason: e.to_string(),
        })?;
        let mut rng = StdRng::seed_from_u64(self.symbol_seed(symbol));

        let mut bars = Vec::new();
        let mut close = self.initial_price.max(0.01);
        let mut date = self.origin.min(start);
        let drift = self.drift - 0.5 * self.volatility * self.volatility;

        while date <= end {
            if is_weekday(date) {
                let gap: f64 = normal.sample(&mut rng) * self.volatility * 0.25;
                let open = close * gap.exp();
                let shock: f64 = normal.sample(&mut rng);
                let next_close = open * (drift + self.volatility * shock).exp();

                let wick_up: f64 = rng.gen_range(0.0..0.5) * self.volatility;
                let wick_down: f64 = rng.gen_range(0.0..0.5) * self.volatility;
                let high = open.max(next_close) * (1.0 + wick_up);
                let low = open.min(next_close) * (1.0 - wick_down);
                let volume = 1_000_000.0 * rng.gen_range(0.5..1.5);

                if date >= start {
                    bars.push(HistoricalBar {
                        date,
                        open: to_price(open),
                        high: to_price(high),
                        low: to_price(low),
                        close: to_price(next_close),
                        volume,
                    });
                }
                close = next_close;
            }
            date += Duration::days(1);
        }

        Ok(bars)
    }
}

fn to_price(v: f64) -> Decimal {
    Decimal::from_f64(v).unwrap_or(Decimal::ZERO).round_dp(4)
}

#[async_trait]
impl MarketDataProvider for SyntheticMarketData {
    async fn get_historical_data(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        _interval: BarInterval,
        _include_dividends: bool,
        _include_corporate_actions: bool,
    ) -> Result<Vec<HistoricalBar>, BacktestError> {
        if end < start {
            return Err(BacktestError::DataFetch {
                symbol: symbol.to_string(),
                reason: format!("end {end} precedes start {start}"),
            });
        }
        self.generate(symbol, start, end)
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}
