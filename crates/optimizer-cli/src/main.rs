mod args;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use backtest_engine::{
    reference_registry, BacktestConfig, BacktestEngine, ParameterMap, StrategyType,
    SyntheticMarketData,
};
use strategy_optimizer::{
    Constraint, OptimizationConfig, OptimizationService, OptimizerSettings, ParameterDefinition,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::args::{CliArgs, Mode};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).with_writer(std::io::stderr).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
    }
}

/// Search space and constraints tuned for each built-in signal generator.
fn default_space(strategy: StrategyType) -> Result<(Vec<ParameterDefinition>, Vec<Constraint>)> {
    let space = match strategy {
        StrategyType::Momentum | StrategyType::TrendFollowing => (
            vec![
                ParameterDefinition::integer("fast_period", 5, 20, 10)
                    .with_step(5.0)
                    .with_description("Fast moving average length"),
                ParameterDefinition::integer("slow_period", 20, 60, 30)
                    .with_step(10.0)
                    .with_description("Slow moving average length"),
                ParameterDefinition::categorical("ma_type", &["sma", "ema"], "sma"),
            ],
            vec![Constraint::less_than("fast_below_slow", "fast_period", "slow_period")],
        ),
        StrategyType::MeanReversion => (
            vec![
                ParameterDefinition::integer("period", 10, 30, 20).with_step(5.0),
                ParameterDefinition::float("num_std", 1.0, 3.0, 2.0)
                    .with_step(0.5)
                    .with_description("Band width in standard deviations"),
            ],
            Vec::new(),
        ),
        StrategyType::Breakout => (
            vec![ParameterDefinition::integer("channel_period", 10, 60, 20)
                .with_step(10.0)
                .with_description("Donchian channel lookback")],
            Vec::new(),
        ),
        other => bail!("no built-in signal generator for strategy '{other}'"),
    };
    Ok(space)
}

fn optimization_config(args: &CliArgs, base: BacktestConfig) -> Result<OptimizationConfig> {
    let (parameters, constraints) = default_space(args.strategy)?;
    let mut config = OptimizationConfig::new(base, parameters, args.algorithm, args.metric);
    if !args.maximize {
        config = config.minimize();
    }
    for constraint in constraints {
        config = config.with_constraint(constraint);
    }
    if let Some(folds) = args.folds {
        config = config.with_cv_folds(folds);
    }
    if let Some(seed) = args.seed {
        config = config.with_seed(seed);
    }
    Ok(config)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("failed to serialize output")?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    std::panic::set_hook(Box::new(|info| {
        tracing::error!("PANIC: {}", info);
    }));

    let args = CliArgs::parse(std::env::args().skip(1))?;
    let settings = OptimizerSettings::from_env()?;

    info!(
        "Running {:?} for {} on {:?} ({} to {})",
        args.mode, args.strategy, args.symbols, args.start, args.end
    );

    let engine = Arc::new(BacktestEngine::new(
        Arc::new(SyntheticMarketData::new(args.data_seed)),
        reference_registry(),
    ));
    let service = OptimizationService::new(engine, settings)?;

    let base = BacktestConfig::new(
        args.strategy,
        args.symbols.clone(),
        args.start,
        args.end,
        args.capital,
    );

    match args.mode {
        Mode::Optimize => {
            let config = optimization_config(&args, base)?;
            let result = service
                .optimize_parameters(&config)
                .await
                .context("optimization failed")?;
            print_json(result.as_ref())?;
        }
        Mode::Sensitivity => {
            let config = optimization_config(&args, base)?;
            let center: ParameterMap = config
                .parameters
                .iter()
                .map(|p| (p.name.clone(), p.default.clone()))
                .collect();
            let results = service
                .analyze_parameter_sensitivity(&config, &center)
                .await
                .context("sensitivity analysis failed")?;
            print_json(&results)?;
        }
        Mode::Backtest => {
            let (parameters, _) = default_space(args.strategy)?;
            let defaults: ParameterMap = parameters.into_iter().map(|p| (p.name, p.default)).collect();
            let result = service
                .run_backtest(&base.with_parameters(defaults))
                .await
                .context("backtest failed")?;
            print_json(&result.metrics)?;
        }
    }

    let (backtests, optimizations) = service.cache_stats();
    info!(
        "Cache: {} backtests ({} hits), {} optimizations ({} hits)",
        backtests.entries, backtests.hits, optimizations.entries, optimizations.hits
    );
    Ok(())
}
