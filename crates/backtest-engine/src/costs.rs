use rust_decimal::prelude::*;
use rust_decimal::Decimal;

use crate::models::{CommissionModel, SlippageModel};

/// Which way a fill moves inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillSide {
    /// Opening a long or covering a short.
    Buy,
    /// Closing a long or opening a short.
    Sell,
}

/// Commission charged for a fill of `shares` at `price`.
pub fn commission(model: &CommissionModel, shares: Decimal, price: Decimal) -> Decimal {
    match model {
        CommissionModel::None => Decimal::ZERO,
        CommissionModel::Percentage { rate } => {
            let rate = Decimal::from_f64(*rate).unwrap_or(Decimal::ZERO);
            price * shares * rate
        }
        CommissionModel::PerShare {
            rate,
            min_per_trade,
            max_per_trade,
        } => {
            let shares_f64 = shares.to_f64().unwrap_or(0.0);
            let raw = shares_f64 * rate;

            // A max of zero or below means uncapped
            let cap = match max_per_trade {
                Some(max) if *max > 0.0 => *max,
                _ => f64::MAX,
            };
            let bounded = raw.max(*min_per_trade).min(cap);
            Decimal::from_f64(bounded).unwrap_or(Decimal::ZERO)
        }
        CommissionModel::Fixed { amount } => *amount,
    }
}

/// Price actually received after slippage: buys fill above `raw_price`, sells below.
pub fn fill_price(model: &SlippageModel, raw_price: Decimal, side: FillSide) -> Decimal {
    let offset = match model {
        SlippageModel::None => Decimal::ZERO,
        SlippageModel::Percentage { rate } => {
            raw_price * Decimal::from_f64(*rate).unwrap_or(Decimal::ZERO)
        }
        SlippageModel::PerShare { amount } => *amount,
    };

    match side {
        FillSide::Buy => raw_price + offset,
        FillSide::Sell => (raw_price - offset).max(Decimal::ZERO),
    }
}
