//! Reference signal generators so the engine runs end to end without an
//! external strategy service.

use std::sync::Arc;

use rust_decimal::prelude::*;

use crate::error::BacktestError;
use crate::models::{HistoricalBar, ParamValue, ParameterMap, Signal, SignalAction, StrategyType};
use crate::providers::{SignalContext, SignalGenerator, SignalGeneratorRegistry};

/// Registry wired with the reference generators:
/// momentum and trend following use moving-average crossovers, mean reversion
/// uses Bollinger bands and breakout uses a Donchian channel.
pub fn reference_registry() -> SignalGeneratorRegistry {
    let crossover: Arc<dyn SignalGenerator> = Arc::new(MovingAverageCrossover);
    let mut registry = SignalGeneratorRegistry::new();
    registry
        .register(StrategyType::Momentum, crossover.clone())
        .register(StrategyType::TrendFollowing, crossover)
        .register(StrategyType::MeanReversion, Arc::new(BollingerReversion))
        .register(StrategyType::Breakout, Arc::new(ChannelBreakout));
    registry
}

fn closes(bars: &[HistoricalBar]) -> Vec<f64> {
    bars.iter().map(|b| b.close.to_f64().unwrap_or(0.0)).collect()
}

fn invalid(ctx: &SignalContext<'_>, reason: String) -> BacktestError {
    BacktestError::SignalGeneration {
        symbol: ctx.symbol.to_string(),
        reason,
    }
}

/// Integer parameter with a default; rejects non-positive or categorical values.
fn period_param(ctx: &SignalContext<'_>, name: &str, default: usize) -> Result<usize, BacktestError> {
    match ctx.parameters.get(name) {
        None => Ok(default),
        Some(value) => match value.as_i64() {
            Some(v) if v > 0 => Ok(v as usize),
            _ => Err(invalid(ctx, format!("{name} must be a positive integer, got {value}"))),
        },
    }
}

fn float_param(ctx: &SignalContext<'_>, name: &str, default: f64) -> Result<f64, BacktestError> {
    match ctx.parameters.get(name) {
        None => Ok(default),
        Some(value) => value
            .as_f64()
            .filter(|v| v.is_finite())
            .ok_or_else(|| invalid(ctx, format!("{name} must be numeric, got {value}"))),
    }
}

fn signal(ctx: &SignalContext<'_>, bar: &HistoricalBar, action: SignalAction, reason: String) -> Signal {
    Signal {
        date: bar.date,
        symbol: ctx.symbol.to_string(),
        action,
        reason,
    }
}

/// Simple moving average; `out[i]` covers `values[i + 1 - period ..= i]`.
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 {
        return out;
    }
    let mut sum = 0.0;
    for i in 0..values.len() {
        sum += values[i];
        if i >= period {
            sum -= values[i - period];
        }
        if i + 1 >= period {
            out[i] = Some(sum / period as f64);
        }
    }
    out
}

/// Exponential moving average seeded with the first SMA.
pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }
    let k = 2.0 / (period as f64 + 1.0);
    let mut prev = values[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = Some(prev);
    for i in period..values.len() {
        prev = values[i] * k + prev * (1.0 - k);
        out[i] = Some(prev);
    }
    out
}

/// Fast/slow moving-average crossover.
///
/// Parameters: `fast_period` (10), `slow_period` (30), `ma_type` (`sma` | `ema`).
pub struct MovingAverageCrossover;

impl SignalGenerator for MovingAverageCrossover {
    fn name(&self) -> &str {
        "moving_average_crossover"
    }

    fn generate(&self, ctx: &SignalContext<'_>) -> Result<Vec<Signal>, BacktestError> {
        let fast = period_param(ctx, "fast_period", 10)?;
        let slow = period_param(ctx, "slow_period", 30)?;
        if fast >= slow {
            return Err(invalid(
                ctx,
                format!("fast_period ({fast}) must be below slow_period ({slow})"),
            ));
        }
        let use_ema = match ctx.parameters.get("ma_type") {
            None => false,
            Some(ParamValue::Categorical(s)) if s == "ema" => true,
            Some(ParamValue::Categorical(s)) if s == "sma" => false,
            Some(other) => return Err(invalid(ctx, format!("unknown ma_type {other}"))),
        };

        let prices = closes(ctx.bars);
        let (fast_ma, slow_ma) = if use_ema {
            (ema(&prices, fast), ema(&prices, slow))
        } else {
            (sma(&prices, fast), sma(&prices, slow))
        };

        let mut signals = Vec::new();
        for i in 1..prices.len() {
            let (Some(f0), Some(s0), Some(f1), Some(s1)) =
                (fast_ma[i - 1], slow_ma[i - 1], fast_ma[i], slow_ma[i])
            else {
                continue;
            };
            if f0 <= s0 && f1 > s1 {
                signals.push(signal(ctx, &ctx.bars[i], SignalAction::Buy, "golden_cross".to_string()));
            } else if f0 >= s0 && f1 < s1 {
                signals.push(signal(ctx, &ctx.bars[i], SignalAction::Sell, "death_cross".to_string()));
            }
        }
        Ok(signals)
    }
}

/// Bollinger-band mean reversion: buy on a close below the lower band, sell on a
/// close above the upper band.
///
/// Parameters: `period` (20), `num_std` (2.0).
pub struct BollingerReversion;

impl SignalGenerator for BollingerReversion {
    fn name(&self) -> &str {
        "bollinger_reversion"
    }

    fn generate(&self, ctx: &SignalContext<'_>) -> Result<Vec<Signal>, BacktestError> {
        let period = period_param(ctx, "period", 20)?;
        let num_std = float_param(ctx, "num_std", 2.0)?;
        if period < 2 {
            return Err(invalid(ctx, "period must be at least 2".to_string()));
        }
        if num_std <= 0.0 {
            return Err(invalid(ctx, format!("num_std must be positive, got {num_std}")));
        }

        let prices = closes(ctx.bars);
        let mut signals = Vec::new();
        let mut below = false;
        let mut above = false;
        for i in period..prices.len() {
            let window = &prices[i + 1 - period..=i];
            let mean = window.iter().sum::<f64>() / period as f64;
            let var = window.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / (period - 1) as f64;
            let band = var.sqrt() * num_std;
            let price = prices[i];

            let now_below = price < mean - band;
            let now_above = price > mean + band;
            if now_below && !below {
                signals.push(signal(ctx, &ctx.bars[i], SignalAction::Buy, "lower_band".to_string()));
            } else if now_above && !above {
                signals.push(signal(ctx, &ctx.bars[i], SignalAction::Sell, "upper_band".to_string()));
            }
            below = now_below;
            above = now_above;
        }
        Ok(signals)
    }
}

/// Donchian channel breakout over the previous `channel_period` bars (20).
pub struct ChannelBreakout;

impl SignalGenerator for ChannelBreakout {
    fn name(&self) -> &str {
        "channel_breakout"
    }

    fn generate(&self, ctx: &SignalContext<'_>) -> Result<Vec<Signal>, BacktestError> {
        let period = period_param(ctx, "channel_period", 20)?;
        let bars = ctx.bars;
        let mut signals = Vec::new();
        for i in period..bars.len() {
            let prior = &bars[i - period..i];
            let highest = prior.iter().map(|b| b.high).max().unwrap_or(Decimal::MAX);
            let lowest = prior.iter().map(|b| b.low).min().unwrap_or(Decimal::ZERO);
            if bars[i].close > highest {
                signals.push(signal(ctx, &bars[i], SignalAction::Buy, "channel_high".to_string()));
            } else if bars[i].close < lowest {
                signals.push(signal(ctx, &bars[i], SignalAction::Sell, "channel_low".to_string()));
            }
        }
        Ok(signals)
    }
}

/// Parameter map from `(name, value)` pairs.
pub fn params<I, K>(pairs: I) -> ParameterMap
where
    I: IntoIterator<Item = (K, ParamValue)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn bars_from(closes: &[f64]) -> Vec<HistoricalBar> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let p = Decimal::from_f64(*c).unwrap();
                HistoricalBar {
                    date: start + Duration::days(i as i64),
                    open: p,
                    high: p,
                    low: p,
                    close: p,
                    volume: 1_000.0,
                }
            })
            .collect()
    }

    #[test]
    fn test_sma_and_ema_warmup() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        let s = sma(&values, 3);
        assert_eq!(s[1], None);
        assert_eq!(s[2], Some(2.0));
        assert_eq!(s[4], Some(4.0));

        let e = ema(&values, 3);
        assert_eq!(e[1], None);
        assert_eq!(e[2], Some(2.0));
        assert!(e[4].unwrap() > 3.0);
    }

    #[test]
    fn test_crossover_fires_on_trend_change() {
        // Down then up: one golden cross after the turn
        let mut closes: Vec<f64> = (0..20).map(|i| 100.0 - i as f64).collect();
        closes.extend((0..20).map(|i| 81.0 + 2.0 * i as f64));
        let bars = bars_from(&closes);
        let parameters = params([
            ("fast_period", ParamValue::Int(3)),
            ("slow_period", ParamValue::Int(8)),
        ]);
        let ctx = SignalContext {
            symbol: "TEST",
            bars: &bars,
            parameters: &parameters,
        };
        let signals = MovingAverageCrossover.generate(&ctx).unwrap();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].action, SignalAction::Buy);
        assert!(signals[0].date > bars[20].date);
    }

    #[test]
    fn test_crossover_rejects_inverted_periods() {
        let bars = bars_from(&[1.0; 40]);
        let parameters = params([
            ("fast_period", ParamValue::Int(20)),
            ("slow_period", ParamValue::Int(10)),
        ]);
        let ctx = SignalContext {
            symbol: "TEST",
            bars: &bars,
            parameters: &parameters,
        };
        assert!(matches!(
            MovingAverageCrossover.generate(&ctx),
            Err(BacktestError::SignalGeneration { .. })
        ));
    }

    #[test]
    fn test_bollinger_buys_the_dip() {
        let mut closes = vec![100.0, 101.0, 99.0, 100.5, 99.5, 100.0, 100.2, 99.8, 100.1, 99.9];
        closes.push(90.0);
        let bars = bars_from(&closes);
        let parameters = params([("period", ParamValue::Int(10)), ("num_std", ParamValue::Float(2.0))]);
        let ctx = SignalContext {
            symbol: "TEST",
            bars: &bars,
            parameters: &parameters,
        };
        let signals = BollingerReversion.generate(&ctx).unwrap();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].action, SignalAction::Buy);
        assert_eq!(signals[0].date, bars[10].date);
    }

    #[test]
    fn test_reference_registry_coverage() {
        let registry = reference_registry();
        assert!(registry.supports(StrategyType::Momentum));
        assert!(registry.supports(StrategyType::TrendFollowing));
        assert!(registry.supports(StrategyType::MeanReversion));
        assert!(registry.supports(StrategyType::Breakout));
        assert!(!registry.supports(StrategyType::MachineLearning));
    }
}
