use backtest_engine::ParameterMap;
use rand::rngs::StdRng;
use rand::Rng;
use tracing::{debug, info};

use super::{SearchOutcome, SearchStrategy, SearchTracker};
use crate::config::AlgorithmSettings;
use crate::error::OptimizerError;
use crate::objective::{Evaluation, Objective};
use crate::parameters::{ParameterKind, ParameterSpace};

/// Fraction of each numeric range used for initial velocities.
const INITIAL_VELOCITY_SCALE: f64 = 0.1;
/// Velocity multiplier after hitting a bound.
const BOUNCE: f64 = -0.5;
/// Per-iteration chance a categorical gene is redrawn.
const CATEGORICAL_RESAMPLE_PROBABILITY: f64 = 0.2;

struct Particle {
    /// Continuous positions, one slot per definition (unused for categorical genes).
    position: Vec<f64>,
    velocity: Vec<f64>,
    categories: ParameterMap,
    best_position: Vec<f64>,
    best_score: Option<f64>,
}

/// Particle swarm over numeric genes; categorical genes are resampled at random.
///
/// Uses `population_size` particles for `generations` iterations.
#[derive(Debug, Clone)]
pub struct ParticleSwarmSearch {
    settings: AlgorithmSettings,
}

impl ParticleSwarmSearch {
    pub fn new(settings: AlgorithmSettings) -> Self {
        Self { settings }
    }
}

fn spawn(space: &ParameterSpace, rng: &mut StdRng) -> Particle {
    let sample = space.sample(rng);
    let mut position = Vec::with_capacity(space.len());
    let mut velocity = Vec::with_capacity(space.len());
    let mut categories = ParameterMap::new();
    for def in space.definitions() {
        match def.bounds() {
            Some((min, max)) => {
                position.push(sample[&def.name].as_f64().unwrap_or(min));
                velocity.push(rng.gen_range(-1.0..=1.0) * (max - min) * INITIAL_VELOCITY_SCALE);
            }
            None => {
                position.push(0.0);
                velocity.push(0.0);
                categories.insert(def.name.clone(), sample[&def.name].clone());
            }
        }
    }
    Particle {
        best_position: position.clone(),
        position,
        velocity,
        categories,
        best_score: None,
    }
}

fn parameters_at(space: &ParameterSpace, position: &[f64], categories: &ParameterMap) -> ParameterMap {
    space
        .definitions()
        .iter()
        .zip(position)
        .map(|(def, x)| {
            let value = match def.kind() {
                ParameterKind::Categorical => categories
                    .get(&def.name)
                    .cloned()
                    .unwrap_or_else(|| def.default.clone()),
                _ => def.from_f64(*x),
            };
            (def.name.clone(), value)
        })
        .collect()
}

impl SearchStrategy for ParticleSwarmSearch {
    fn name(&self) -> &'static str {
        "particle_swarm"
    }

    fn search(
        &self,
        objective: &dyn Objective,
        space: &ParameterSpace,
        rng: &mut StdRng,
    ) -> Result<SearchOutcome, OptimizerError> {
        let s = &self.settings;
        info!(
            "Particle swarm: {} particles, {} iterations",
            s.population_size, s.generations
        );
        let mut tracker = SearchTracker::new(objective.maximize());
        let mut swarm: Vec<Particle> = (0..s.population_size).map(|_| spawn(space, rng)).collect();
        let mut global: Option<(Vec<f64>, f64)> = None;

        for iteration in 0..=s.generations {
            objective.check_cancelled()?;
            if iteration > 0 {
                for particle in swarm.iter_mut() {
                    self.advance(particle, space, global.as_ref().map(|(p, _)| p.as_slice()), rng);
                }
            }

            let candidates: Vec<ParameterMap> = swarm
                .iter()
                .map(|p| parameters_at(space, &p.position, &p.categories))
                .collect();
            let results = objective.evaluate(&candidates)?;

            for (particle, result) in swarm.iter_mut().zip(&results) {
                let Some(Evaluation { score, .. }) = result else {
                    continue;
                };
                let improved = particle
                    .best_score
                    .map_or(true, |best| objective.is_better(*score, best));
                if improved {
                    particle.best_score = Some(*score);
                    particle.best_position = particle.position.clone();
                }
                if global.as_ref().map_or(true, |(_, best)| objective.is_better(*score, *best)) {
                    global = Some((particle.position.clone(), *score));
                }
            }

            tracker.record(results);
            tracker.checkpoint(iteration);
            debug!(
                "Swarm iteration {}: global best {:?}",
                iteration,
                global.as_ref().map(|(_, s)| *s)
            );
        }

        Ok(tracker.finish())
    }
}

impl ParticleSwarmSearch {
    fn advance(&self, particle: &mut Particle, space: &ParameterSpace, global: Option<&[f64]>, rng: &mut StdRng) {
        let s = &self.settings;
        for (i, def) in space.definitions().iter().enumerate() {
            let Some((min, max)) = def.bounds() else {
                if rng.gen_bool(CATEGORICAL_RESAMPLE_PROBABILITY) {
                    particle.categories.insert(def.name.clone(), def.sample(rng));
                }
                continue;
            };

            let x = particle.position[i];
            let r1: f64 = rng.gen();
            let r2: f64 = rng.gen();
            let cognitive = s.cognitive_weight * r1 * (particle.best_position[i] - x);
            let social = global.map_or(0.0, |g| s.social_weight * r2 * (g[i] - x));
            let mut v = s.inertia * particle.velocity[i] + cognitive + social;
            let mut next = x + v;
            if next < min {
                next = min;
                v *= BOUNCE;
            } else if next > max {
                next = max;
                v *= BOUNCE;
            }
            particle.position[i] = next;
            particle.velocity[i] = v;
        }
    }
}
