use std::sync::Arc;
use std::time::{Duration, Instant};

use backtest_engine::{
    BacktestConfig, BacktestEngine, BacktestError, BacktestResult, MarketDataSet, ParameterMap,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, info};

use crate::cache::{backtest_key, optimization_key, CacheStats, ResultCache};
use crate::cancellation::CancellationToken;
use crate::config::{OptimizationConfig, OptimizerSettings};
use crate::constraints::ConstraintEvaluator;
use crate::cross_validation::CrossValidator;
use crate::error::OptimizerError;
use crate::importance::parameter_importance;
use crate::objective::{BacktestObjective, Objective};
use crate::parameters::ParameterSpace;
use crate::results::{OptimizationResult, ParameterSensitivityResult, SensitivityPoint};
use crate::search::{rank_evaluations, strategy_for};
use crate::sensitivity::summarize;

/// Runs parameter optimizations, sensitivity sweeps and cached backtests.
///
/// Owns the worker pool and both result caches; every dependency is injected
/// so several services can coexist in one process.
pub struct OptimizationService {
    engine: Arc<BacktestEngine>,
    backtest_cache: Arc<ResultCache<BacktestResult>>,
    optimization_cache: Arc<ResultCache<OptimizationResult>>,
    pool: Arc<ThreadPool>,
    settings: OptimizerSettings,
}

impl OptimizationService {
    pub fn new(engine: Arc<BacktestEngine>, settings: OptimizerSettings) -> Result<Self, OptimizerError> {
        let backtest_cache = Arc::new(ResultCache::new(settings.cache_ttl));
        let optimization_cache = Arc::new(ResultCache::new(settings.cache_ttl));
        Self::with_caches(engine, backtest_cache, optimization_cache, settings)
    }

    /// Build a service around existing caches, e.g. to share them between services.
    pub fn with_caches(
        engine: Arc<BacktestEngine>,
        backtest_cache: Arc<ResultCache<BacktestResult>>,
        optimization_cache: Arc<ResultCache<OptimizationResult>>,
        settings: OptimizerSettings,
    ) -> Result<Self, OptimizerError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(settings.worker_threads)
            .thread_name(|i| format!("optimizer-worker-{i}"))
            .build()
            .map_err(|e| OptimizerError::WorkerPool(e.to_string()))?;

        info!(
            "Optimization service ready: {} workers, cache TTL {}s",
            settings.worker_threads,
            settings.cache_ttl.as_secs()
        );
        Ok(Self {
            engine,
            backtest_cache,
            optimization_cache,
            pool: Arc::new(pool),
            settings,
        })
    }

    pub fn settings(&self) -> &OptimizerSettings {
        &self.settings
    }

    pub fn engine(&self) -> &BacktestEngine {
        &self.engine
    }

    /// Hit/miss counters for the backtest and optimization caches.
    pub fn cache_stats(&self) -> (CacheStats, CacheStats) {
        (self.backtest_cache.stats(), self.optimization_cache.stats())
    }

    /// Drop expired cache entries; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.backtest_cache.purge_expired() + self.optimization_cache.purge_expired()
    }

    fn validate(&self, config: &OptimizationConfig) -> Result<ParameterSpace, OptimizerError> {
        if !self.engine.supports(config.strategy_type) {
            return Err(BacktestError::UnsupportedStrategy(config.strategy_type).into());
        }
        config.validate()
    }

    pub async fn optimize_parameters(
        &self,
        config: &OptimizationConfig,
    ) -> Result<Arc<OptimizationResult>, OptimizerError> {
        self.optimize_parameters_with_cancel(config, &CancellationToken::new())
            .await
    }

    /// Optimize, stopping early with [`OptimizerError::Cancelled`] once `cancel` fires.
    ///
    /// Identical configs share one cached result while it is fresh; concurrent
    /// identical requests wait for the first to finish. Configs with closure
    /// constraints always run fresh.
    pub async fn optimize_parameters_with_cancel(
        &self,
        config: &OptimizationConfig,
        cancel: &CancellationToken,
    ) -> Result<Arc<OptimizationResult>, OptimizerError> {
        let space = self.validate(config)?;
        if !config.is_cacheable() {
            debug!("Closure constraints present; optimization result not cached");
            return self
                .run_optimization(config, space, cancel.clone())
                .await
                .map(Arc::new);
        }
        let key = optimization_key(config)?;
        self.optimization_cache
            .get_or_try_insert_with_async(&key, || self.run_optimization(config, space, cancel.clone()))
            .await
    }

    async fn run_optimization(
        &self,
        config: &OptimizationConfig,
        space: ParameterSpace,
        cancel: CancellationToken,
    ) -> Result<OptimizationResult, OptimizerError> {
        let started = Instant::now();
        let base = config.base_config();
        info!(
            "Optimizing {} on {:?} ({} to {}): {} over {} parameters, {} {}",
            config.strategy_type,
            base.symbols,
            base.start_date,
            base.end_date,
            config.algorithm,
            space.len(),
            if config.maximize { "maximize" } else { "minimize" },
            config.metric
        );

        let data = Arc::new(self.engine.fetch_market_data(&base).await?);
        let run = OptimizationRun {
            engine: self.engine.clone(),
            cache: self.backtest_cache.clone(),
            pool: self.pool.clone(),
            data,
            config: config.clone(),
            base,
            space,
            cancel,
            candidate_timeout: self.settings.candidate_timeout,
            seed: config.seed.or(self.settings.seed),
        };

        let result = tokio::task::spawn_blocking(move || run.execute(started))
            .await
            .map_err(|e| OptimizerError::WorkerPool(e.to_string()))??;

        info!(
            "Optimization finished in {} ms: best {} = {:.4} from {} evaluations ({} skipped, {} failed)",
            result.execution_time_ms,
            result.metric,
            result.best_metric_value,
            result.evaluations,
            result.skipped_candidates,
            result.failed_candidates
        );
        Ok(result)
    }

    /// One-at-a-time sweeps around `base`: each parameter walks its grid values
    /// while the rest stay fixed. Missing or out-of-domain base values fall back
    /// to the parameter's default.
    pub async fn analyze_parameter_sensitivity(
        &self,
        config: &OptimizationConfig,
        base: &ParameterMap,
    ) -> Result<Vec<ParameterSensitivityResult>, OptimizerError> {
        let space = self.validate(config)?;
        let center = space.complete(base);
        let backtest = config.base_config();
        info!(
            "Sensitivity analysis of {} parameters around [{}]",
            space.len(),
            backtest_engine::format_parameters(&center)
        );

        let data = Arc::new(self.engine.fetch_market_data(&backtest).await?);
        let engine = self.engine.clone();
        let cache = self.backtest_cache.clone();
        let pool = self.pool.clone();
        let timeout = self.settings.candidate_timeout;
        let config = config.clone();

        tokio::task::spawn_blocking(move || -> Result<Vec<ParameterSensitivityResult>, OptimizerError> {
            let cancel = CancellationToken::new();
            let evaluator = ConstraintEvaluator::new(config.constraints.clone());
            let objective = BacktestObjective::new(
                &engine,
                &backtest,
                &data,
                &cache,
                &pool,
                &cancel,
                config.metric,
                config.maximize,
            )
            .with_constraints(&evaluator)
            .with_timeout(timeout);

            let mut results = Vec::with_capacity(space.len());
            for def in space.definitions() {
                objective.check_cancelled()?;
                let values = def.grid_values();
                let candidates: Vec<ParameterMap> = values
                    .iter()
                    .map(|v| {
                        let mut params = center.clone();
                        params.insert(def.name.clone(), v.clone());
                        params
                    })
                    .collect();
                let scored = objective.evaluate(&candidates)?;
                let points: Vec<SensitivityPoint> = values
                    .into_iter()
                    .zip(scored)
                    .filter_map(|(value, evaluation)| {
                        evaluation.map(|e| SensitivityPoint {
                            value,
                            metric_value: e.score,
                        })
                    })
                    .collect();
                let summary = summarize(&def.name, points, config.maximize);
                debug!("Sensitivity of {}: {:.4}", summary.parameter, summary.sensitivity);
                results.push(summary);
            }
            Ok(results)
        })
        .await
        .map_err(|e| OptimizerError::WorkerPool(e.to_string()))?
    }

    /// Single backtest, served from the backtest cache when fresh.
    pub async fn run_backtest(&self, config: &BacktestConfig) -> Result<Arc<BacktestResult>, OptimizerError> {
        config.validate()?;
        let key = backtest_key(config)?;
        self.backtest_cache
            .get_or_try_insert_with_async(&key, || async {
                self.engine.run_backtest(config).await.map_err(OptimizerError::from)
            })
            .await
    }
}

/// Owned inputs for the blocking part of an optimization.
struct OptimizationRun {
    engine: Arc<BacktestEngine>,
    cache: Arc<ResultCache<BacktestResult>>,
    pool: Arc<ThreadPool>,
    data: Arc<MarketDataSet>,
    config: OptimizationConfig,
    base: BacktestConfig,
    space: ParameterSpace,
    cancel: CancellationToken,
    candidate_timeout: Option<Duration>,
    seed: Option<u64>,
}

impl OptimizationRun {
    fn execute(self, started: Instant) -> Result<OptimizationResult, OptimizerError> {
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let config = &self.config;
        let evaluator = ConstraintEvaluator::new(config.constraints.clone());
        let objective = BacktestObjective::new(
            &self.engine,
            &self.base,
            &self.data,
            &self.cache,
            &self.pool,
            &self.cancel,
            config.metric,
            config.maximize,
        )
        .with_constraints(&evaluator)
        .with_timeout(self.candidate_timeout);

        let strategy = strategy_for(config.algorithm, &config.settings);
        let outcome = strategy.search(&objective, &self.space, &mut rng)?;
        let stats = objective.stats();

        let importance = parameter_importance(&self.space, &outcome.evaluations);
        let all_results = rank_evaluations(outcome.evaluations, config.maximize);
        let best = all_results.first().ok_or_else(|| {
            OptimizerError::NoFeasibleCandidates(format!(
                "{} search scored nothing ({} rejected by constraints, {} failed)",
                strategy.name(),
                stats.skipped,
                stats.failed
            ))
        })?;
        let best_parameters = best.parameters.clone();
        let best_metric_value = best.score;

        let cross_validation = match config.cv_folds {
            Some(folds) => {
                let validator = CrossValidator {
                    engine: &self.engine,
                    data: &self.data,
                    pool: &self.pool,
                    cancel: &self.cancel,
                    candidate_timeout: self.candidate_timeout,
                };
                Some(validator.run(&self.base, &best_parameters, config.metric, folds)?)
            }
            None => None,
        };

        Ok(OptimizationResult {
            best_parameters,
            best_metric_value,
            all_results,
            convergence: Some(outcome.convergence),
            parameter_importance: Some(importance),
            cross_validation,
            execution_time_ms: started.elapsed().as_millis() as u64,
            algorithm: config.algorithm,
            metric: config.metric,
            maximize: config.maximize,
            evaluations: stats.evaluated,
            skipped_candidates: stats.skipped,
            failed_candidates: stats.failed,
        })
    }
}
