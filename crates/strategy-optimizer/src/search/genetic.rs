use std::cmp::Ordering;

use backtest_engine::ParameterMap;
use rand::rngs::StdRng;
use rand::Rng;
use tracing::{debug, info, warn};

use super::{SearchOutcome, SearchStrategy, SearchTracker};
use crate::config::AlgorithmSettings;
use crate::error::OptimizerError;
use crate::objective::{Evaluation, Objective};
use crate::parameters::ParameterSpace;

/// Generational genetic algorithm with elitism, tournament selection, uniform
/// crossover and per-gene resampling mutation.
///
/// The initial population is generation 0. Elites are carried over without being
/// re-evaluated; children rejected by the objective are not replaced, so the
/// population can shrink.
#[derive(Debug, Clone)]
pub struct GeneticSearch {
    settings: AlgorithmSettings,
}

impl GeneticSearch {
    pub fn new(settings: AlgorithmSettings) -> Self {
        Self { settings }
    }
}

impl SearchStrategy for GeneticSearch {
    fn name(&self) -> &'static str {
        "genetic"
    }

    fn search(
        &self,
        objective: &dyn Objective,
        space: &ParameterSpace,
        rng: &mut StdRng,
    ) -> Result<SearchOutcome, OptimizerError> {
        let s = &self.settings;
        info!(
            "Genetic search: population {}, {} generations, {} elites",
            s.population_size,
            s.generations,
            s.elite_count()
        );
        let mut tracker = SearchTracker::new(objective.maximize());

        objective.check_cancelled()?;
        let initial: Vec<ParameterMap> = (0..s.population_size).map(|_| space.sample(rng)).collect();
        let mut population: Vec<Evaluation> = objective.evaluate(&initial)?.into_iter().flatten().collect();
        tracker.record(population.iter().cloned().map(Some));
        tracker.checkpoint(0);

        for generation in 1..=s.generations {
            objective.check_cancelled()?;
            if population.is_empty() {
                warn!("Genetic search: population died out at generation {}", generation);
                break;
            }

            let (elites, children) = next_generation(&population, space, s, objective.maximize(), rng);
            let offspring: Vec<Evaluation> = objective.evaluate(&children)?.into_iter().flatten().collect();
            tracker.record(offspring.iter().cloned().map(Some));

            population = elites;
            population.extend(offspring);
            tracker.checkpoint(generation);
            debug!(
                "Generation {}: population {}, best {:?}",
                generation,
                population.len(),
                tracker.best().map(|b| b.score)
            );
        }

        Ok(tracker.finish())
    }
}

/// Split the next generation into carried elites and unevaluated children.
///
/// Elites are the best `floor(population_size * elite_fraction)` members (capped
/// by the current population); the children fill the rest of the current
/// population size.
pub fn next_generation<R: Rng + ?Sized>(
    population: &[Evaluation],
    space: &ParameterSpace,
    settings: &AlgorithmSettings,
    maximize: bool,
    rng: &mut R,
) -> (Vec<Evaluation>, Vec<ParameterMap>) {
    let mut ranked: Vec<&Evaluation> = population.iter().collect();
    ranked.sort_by(|a, b| {
        let ord = a.score.partial_cmp(&b.score).unwrap_or(Ordering::Equal);
        if maximize {
            ord.reverse()
        } else {
            ord
        }
    });

    let elite_count = settings.elite_count().min(ranked.len());
    let elites: Vec<Evaluation> = ranked[..elite_count].iter().map(|e| (*e).clone()).collect();

    let child_count = population.len() - elite_count;
    let children = (0..child_count)
        .map(|_| {
            let a = tournament(population, settings.tournament_size, maximize, rng);
            let b = tournament(population, settings.tournament_size, maximize, rng);
            let child = crossover(&a.parameters, &b.parameters, space, rng);
            mutate(child, space, settings.mutation_rate, rng)
        })
        .collect();

    (elites, children)
}

/// Best of `k` members drawn with replacement.
fn tournament<'p, R: Rng + ?Sized>(
    population: &'p [Evaluation],
    k: usize,
    maximize: bool,
    rng: &mut R,
) -> &'p Evaluation {
    let mut winner = &population[rng.gen_range(0..population.len())];
    for _ in 1..k.max(1) {
        let challenger = &population[rng.gen_range(0..population.len())];
        let wins = if maximize {
            challenger.score > winner.score
        } else {
            challenger.score < winner.score
        };
        if wins {
            winner = challenger;
        }
    }
    winner
}

/// Each gene from either parent with equal probability.
fn crossover<R: Rng + ?Sized>(
    a: &ParameterMap,
    b: &ParameterMap,
    space: &ParameterSpace,
    rng: &mut R,
) -> ParameterMap {
    space
        .definitions()
        .iter()
        .map(|def| {
            let parent = if rng.gen_bool(0.5) { a } else { b };
            let value = parent.get(&def.name).unwrap_or(&def.default).clone();
            (def.name.clone(), value)
        })
        .collect()
}

fn mutate<R: Rng + ?Sized>(
    mut child: ParameterMap,
    space: &ParameterSpace,
    rate: f64,
    rng: &mut R,
) -> ParameterMap {
    for def in space.definitions() {
        if rng.gen_bool(rate) {
            child.insert(def.name.clone(), def.sample(rng));
        }
    }
    child
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::ParameterDefinition;
    use crate::search::testing::SumObjective;
    use backtest_engine::{BacktestMetrics, ParamValue};
    use rand::SeedableRng;
    use std::sync::atomic::Ordering as AtomicOrdering;

    fn space() -> ParameterSpace {
        ParameterSpace::new(vec![
            ParameterDefinition::integer("a", 0, 100, 50),
            ParameterDefinition::categorical("mode", &["x", "y", "z"], "x"),
        ])
        .unwrap()
    }

    fn member(a: i64, score: f64) -> Evaluation {
        let mut parameters = ParameterMap::new();
        parameters.insert("a".to_string(), ParamValue::Int(a));
        parameters.insert("mode".to_string(), ParamValue::Categorical("x".to_string()));
        Evaluation {
            parameters,
            metrics: BacktestMetrics::default(),
            score,
        }
    }

    #[test]
    fn test_twenty_members_carry_four_elites() {
        let settings = AlgorithmSettings::default();
        let population: Vec<Evaluation> = (0..20).map(|i| member(i, ((i * 7) % 20) as f64)).collect();
        let mut rng = StdRng::seed_from_u64(8);

        let (elites, children) = next_generation(&population, &space(), &settings, true, &mut rng);
        assert_eq!(elites.len(), 4);
        assert_eq!(children.len(), 16);

        let elite_scores: Vec<f64> = elites.iter().map(|e| e.score).collect();
        assert_eq!(elite_scores, vec![19.0, 18.0, 17.0, 16.0]);
        for elite in &elites {
            assert!(population.contains(elite), "elites are carried unchanged");
        }
    }

    #[test]
    fn test_minimizing_keeps_lowest_scores() {
        let settings = AlgorithmSettings::default();
        let population: Vec<Evaluation> = (0..20).map(|i| member(i, i as f64)).collect();
        let mut rng = StdRng::seed_from_u64(8);
        let (elites, _) = next_generation(&population, &space(), &settings, false, &mut rng);
        let elite_scores: Vec<f64> = elites.iter().map(|e| e.score).collect();
        assert_eq!(elite_scores, vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_elites_are_not_reevaluated() {
        let settings = AlgorithmSettings {
            generations: 5,
            ..AlgorithmSettings::default()
        };
        let objective = SumObjective::new(true);
        let mut rng = StdRng::seed_from_u64(21);
        let outcome = GeneticSearch::new(settings).search(&objective, &space(), &mut rng).unwrap();

        // 20 initial members, then 16 children per generation
        assert_eq!(objective.calls.load(AtomicOrdering::SeqCst), 20 + 5 * 16);
        assert_eq!(outcome.evaluations.len(), 100);
        assert_eq!(outcome.convergence.len(), 6);
        assert_eq!(outcome.convergence[0].iteration, 0);
    }

    #[test]
    fn test_rejected_children_shrink_population() {
        let settings = AlgorithmSettings {
            generations: 3,
            mutation_rate: 0.0,
            ..AlgorithmSettings::default()
        };
        let mut objective = SumObjective::new(true);
        objective.reject = Some(|p| p["a"].as_i64().unwrap_or(0) > 50);
        let mut rng = StdRng::seed_from_u64(5);
        let outcome = GeneticSearch::new(settings).search(&objective, &space(), &mut rng).unwrap();
        assert!(outcome.evaluations.len() < 20 + 3 * 16);
        assert!(outcome
            .evaluations
            .iter()
            .all(|e| e.parameters["a"].as_i64().unwrap() <= 50));
    }
}
