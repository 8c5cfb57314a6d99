use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use backtest_engine::{BacktestConfig, OptimizationMetric, ParameterMap, StrategyType};
use serde::{Deserialize, Serialize};

use crate::constraints::{Constraint, ConstraintEvaluator};
use crate::cross_validation::fold_windows;
use crate::error::OptimizerError;
use crate::parameters::{ParameterDefinition, ParameterSpace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationAlgorithm {
    GridSearch,
    RandomSearch,
    Bayesian,
    Genetic,
    ParticleSwarm,
}

impl OptimizationAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizationAlgorithm::GridSearch => "grid_search",
            OptimizationAlgorithm::RandomSearch => "random_search",
            OptimizationAlgorithm::Bayesian => "bayesian",
            OptimizationAlgorithm::Genetic => "genetic",
            OptimizationAlgorithm::ParticleSwarm => "particle_swarm",
        }
    }
}

impl fmt::Display for OptimizationAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptimizationAlgorithm {
    type Err = OptimizerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "grid" | "grid_search" => Ok(OptimizationAlgorithm::GridSearch),
            "random" | "random_search" => Ok(OptimizationAlgorithm::RandomSearch),
            "bayesian" | "bayes" => Ok(OptimizationAlgorithm::Bayesian),
            "genetic" | "ga" => Ok(OptimizationAlgorithm::Genetic),
            "particle_swarm" | "pso" => Ok(OptimizationAlgorithm::ParticleSwarm),
            _ => Err(OptimizerError::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// Tuning knobs for the search strategies.
///
/// Particle swarm uses `population_size` as its particle count and `generations`
/// as its iteration count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlgorithmSettings {
    pub population_size: usize,
    pub generations: usize,
    /// Candidate budget for random search and Bayesian-lite.
    pub iterations: usize,
    pub mutation_rate: f64,
    pub elite_fraction: f64,
    pub tournament_size: usize,
    pub inertia: f64,
    pub cognitive_weight: f64,
    pub social_weight: f64,
}

impl Default for AlgorithmSettings {
    fn default() -> Self {
        Self {
            population_size: 20,
            generations: 10,
            iterations: 100,
            mutation_rate: 0.1,
            elite_fraction: 0.2,
            tournament_size: 3,
            inertia: 0.7,
            cognitive_weight: 1.5,
            social_weight: 1.5,
        }
    }
}

impl AlgorithmSettings {
    pub fn validate(&self) -> Result<(), OptimizerError> {
        let fail = |msg: &str| Err(OptimizerError::InvalidConfig(msg.to_string()));
        if self.population_size < 2 {
            return fail("population_size must be at least 2");
        }
        if self.iterations == 0 {
            return fail("iterations must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.mutation_rate) {
            return fail("mutation_rate must be within [0, 1]");
        }
        if !(0.0..1.0).contains(&self.elite_fraction) {
            return fail("elite_fraction must be within [0, 1)");
        }
        if self.tournament_size == 0 {
            return fail("tournament_size must be at least 1");
        }
        for weight in [self.inertia, self.cognitive_weight, self.social_weight] {
            if !weight.is_finite() || weight < 0.0 {
                return fail("swarm weights must be finite and non-negative");
            }
        }
        Ok(())
    }

    /// Number of genetic elites carried unchanged into each generation.
    pub fn elite_count(&self) -> usize {
        (self.population_size as f64 * self.elite_fraction).floor() as usize
    }
}

fn default_metric() -> OptimizationMetric {
    OptimizationMetric::SharpeRatio
}

fn default_maximize() -> bool {
    true
}

/// One optimization request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationConfig {
    pub strategy_type: StrategyType,
    /// Template for every candidate backtest; its own parameters are ignored.
    pub base: BacktestConfig,
    pub parameters: Vec<ParameterDefinition>,
    pub algorithm: OptimizationAlgorithm,
    #[serde(default = "default_metric")]
    pub metric: OptimizationMetric,
    #[serde(default = "default_maximize")]
    pub maximize: bool,
    #[serde(default)]
    pub settings: AlgorithmSettings,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
    #[serde(default)]
    pub cv_folds: Option<usize>,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl OptimizationConfig {
    pub fn new(
        base: BacktestConfig,
        parameters: Vec<ParameterDefinition>,
        algorithm: OptimizationAlgorithm,
        metric: OptimizationMetric,
    ) -> Self {
        Self {
            strategy_type: base.strategy_type,
            base,
            parameters,
            algorithm,
            metric,
            maximize: true,
            settings: AlgorithmSettings::default(),
            constraints: Vec::new(),
            cv_folds: None,
            seed: None,
        }
    }

    pub fn minimize(mut self) -> Self {
        self.maximize = false;
        self
    }

    pub fn with_settings(mut self, settings: AlgorithmSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn with_cv_folds(mut self, folds: usize) -> Self {
        self.cv_folds = Some(folds);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Whether the result is fully determined by the serialized config, i.e. no
    /// constraint is an in-process closure.
    pub fn is_cacheable(&self) -> bool {
        !self.constraints.iter().any(Constraint::is_predicate)
    }

    /// The base backtest with this run's strategy type and no parameters.
    pub fn base_config(&self) -> BacktestConfig {
        let mut base = self.base.clone();
        base.strategy_type = self.strategy_type;
        base.parameters = ParameterMap::new();
        base
    }

    /// Check everything that does not need the engine; returns the parameter space.
    pub fn validate(&self) -> Result<ParameterSpace, OptimizerError> {
        let space = ParameterSpace::new(self.parameters.clone())?;
        self.settings.validate()?;
        self.base_config()
            .validate()
            .map_err(|e| OptimizerError::InvalidConfig(e.to_string()))?;
        if let Some(folds) = self.cv_folds {
            if folds < 2 {
                return Err(OptimizerError::InvalidConfig(format!(
                    "cross-validation needs at least 2 folds, got {folds}"
                )));
            }
            fold_windows(self.base.start_date, self.base.end_date, folds)?;
        }
        ConstraintEvaluator::new(self.constraints.clone()).validate(&space)?;
        Ok(space)
    }
}

/// Process-level settings for the optimization service.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerSettings {
    pub worker_threads: usize,
    pub cache_ttl: Duration,
    /// Per-candidate deadline; `None` disables it.
    pub candidate_timeout: Option<Duration>,
    /// Fallback seed for configs that carry none.
    pub seed: Option<u64>,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            worker_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            cache_ttl: Duration::from_secs(300),
            candidate_timeout: Some(Duration::from_millis(30_000)),
            seed: None,
        }
    }
}

impl OptimizerSettings {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let worker_threads: usize = env::var("OPTIMIZER_WORKER_THREADS")
            .unwrap_or_else(|_| defaults.worker_threads.to_string())
            .parse()
            .context("OPTIMIZER_WORKER_THREADS must be a positive integer")?;
        if worker_threads == 0 {
            bail!("OPTIMIZER_WORKER_THREADS must be at least 1");
        }

        let ttl_secs: u64 = env::var("OPTIMIZER_CACHE_TTL_SECS")
            .unwrap_or_else(|_| "300".to_string())
            .parse()
            .context("OPTIMIZER_CACHE_TTL_SECS must be a whole number of seconds")?;

        let timeout_ms: u64 = env::var("OPTIMIZER_CANDIDATE_TIMEOUT_MS")
            .unwrap_or_else(|_| "30000".to_string())
            .parse()
            .context("OPTIMIZER_CANDIDATE_TIMEOUT_MS must be a whole number of milliseconds")?;

        let seed = match env::var("OPTIMIZER_SEED") {
            Ok(raw) if !raw.trim().is_empty() => Some(
                raw.trim()
                    .parse()
                    .context("OPTIMIZER_SEED must be an unsigned integer")?,
            ),
            _ => None,
        };

        Ok(Self {
            worker_threads,
            cache_ttl: Duration::from_secs(ttl_secs),
            candidate_timeout: (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms)),
            seed,
        })
    }
}
