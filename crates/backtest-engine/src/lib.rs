pub mod costs;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod models;
pub mod providers;
pub mod signals;
pub mod synthetic;
pub mod walk_forward;

#[cfg(test)]
mod tests;

pub use engine::{BacktestEngine, RunLimits};
pub use error::BacktestError;
pub use metrics::compute_metrics;
pub use models::*;
pub use providers::{
    InMemoryMarketData, MarketDataProvider, MarketDataSet, SignalContext, SignalGenerator,
    SignalGeneratorRegistry,
};
pub use signals::{reference_registry, BollingerReversion, ChannelBreakout, MovingAverageCrossover};
pub use synthetic::SyntheticMarketData;
pub use walk_forward::{walk_forward_windows, WalkForwardWindow};
