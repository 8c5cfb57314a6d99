use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use backtest_engine::{OptimizationMetric, StrategyType};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use strategy_optimizer::OptimizationAlgorithm;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Optimize,
    Sensitivity,
    Backtest,
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "optimize" => Ok(Mode::Optimize),
            "sensitivity" => Ok(Mode::Sensitivity),
            "backtest" => Ok(Mode::Backtest),
            other => Err(anyhow!("unknown mode '{other}' (optimize | sensitivity | backtest)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CliArgs {
    pub mode: Mode,
    pub strategy: StrategyType,
    pub algorithm: OptimizationAlgorithm,
    pub metric: OptimizationMetric,
    pub maximize: bool,
    pub symbols: Vec<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub capital: Decimal,
    pub seed: Option<u64>,
    pub folds: Option<usize>,
    /// Seed for the synthetic market data.
    pub data_seed: u64,
}

impl Default for CliArgs {
    fn default() -> Self {
        Self {
            mode: Mode::Optimize,
            strategy: StrategyType::Momentum,
            algorithm: OptimizationAlgorithm::GridSearch,
            metric: OptimizationMetric::SharpeRatio,
            maximize: true,
            symbols: vec!["SPY".to_string()],
            start: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap_or_default(),
            end: NaiveDate::from_ymd_opt(2023, 12, 31).unwrap_or_default(),
            capital: Decimal::new(100_000, 0),
            seed: None,
            folds: None,
            data_seed: 42,
        }
    }
}

pub const USAGE: &str = "\
Usage: optimize [--mode optimize|sensitivity|backtest] [--strategy NAME]
                [--algorithm grid|random|bayesian|genetic|pso] [--metric NAME] [--minimize]
                [--symbols SPY,QQQ] [--start YYYY-MM-DD] [--end YYYY-MM-DD]
                [--capital AMOUNT] [--seed N] [--folds K] [--data-seed N]";

fn date(flag: &str, raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").with_context(|| format!("{flag} expects YYYY-MM-DD, got '{raw}'"))
}

impl CliArgs {
    /// Parse flags (without the program name).
    pub fn parse<I>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut parsed = Self::default();
        let mut args = args.into_iter();
        while let Some(flag) = args.next() {
            if flag == "--minimize" {
                parsed.maximize = false;
                continue;
            }
            if flag == "--help" || flag == "-h" {
                bail!("{USAGE}");
            }
            let value = args
                .next()
                .ok_or_else(|| anyhow!("{flag} needs a value\n{USAGE}"))?;
            match flag.as_str() {
                "--mode" => parsed.mode = value.parse()?,
                "--strategy" => parsed.strategy = value.parse()?,
                "--algorithm" => parsed.algorithm = value.parse()?,
                "--metric" => parsed.metric = value.parse()?,
                "--symbols" => {
                    parsed.symbols = value
                        .split(',')
                        .map(|s| s.trim().to_uppercase())
                        .filter(|s| !s.is_empty())
                        .collect();
                }
                "--start" => parsed.start = date(&flag, &value)?,
                "--end" => parsed.end = date(&flag, &value)?,
                "--capital" => {
                    parsed.capital = value
                        .parse()
                        .with_context(|| format!("--capital expects a number, got '{value}'"))?
                }
                "--seed" => {
                    parsed.seed = Some(value.parse().context("--seed expects an unsigned integer")?)
                }
                "--folds" => {
                    parsed.folds = Some(value.parse().context("--folds expects a positive integer")?)
                }
                "--data-seed" => {
                    parsed.data_seed = value.parse().context("--data-seed expects an unsigned integer")?
                }
                other => bail!("unknown flag '{other}'\n{USAGE}"),
            }
        }
        if parsed.symbols.is_empty() {
            bail!("--symbols must name at least one symbol");
        }
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<CliArgs> {
        CliArgs::parse(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_defaults() {
        assert_eq!(parse(&[]).unwrap(), CliArgs::default());
    }

    #[test]
    fn test_flags() {
        let args = parse(&[
            "--mode", "sensitivity", "--algorithm", "pso", "--metric", "sortino", "--minimize",
            "--symbols", "spy, qqq", "--start", "2022-01-03", "--seed", "7", "--folds", "4",
        ])
        .unwrap();
        assert_eq!(args.mode, Mode::Sensitivity);
        assert_eq!(args.algorithm, OptimizationAlgorithm::ParticleSwarm);
        assert_eq!(args.metric, OptimizationMetric::SortinoRatio);
        assert!(!args.maximize);
        assert_eq!(args.symbols, vec!["SPY", "QQQ"]);
        assert_eq!(args.start, NaiveDate::from_ymd_opt(2022, 1, 3).unwrap());
        assert_eq!(args.seed, Some(7));
        assert_eq!(args.folds, Some(4));
    }

    #[test]
    fn test_bad_input() {
        assert!(parse(&["--mode", "train"]).is_err());
        assert!(parse(&["--algorithm", "annealing"]).is_err());
        assert!(parse(&["--start", "01/02/2023"]).is_err());
        assert!(parse(&["--seed"]).is_err());
        assert!(parse(&["--verbose", "1"]).is_err());
        assert!(parse(&["--symbols", ","]).is_err());
    }
}
