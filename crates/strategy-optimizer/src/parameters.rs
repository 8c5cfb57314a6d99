use std::collections::HashSet;

use backtest_engine::{ParamValue, ParameterMap};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::OptimizerError;

/// Most grid points taken from any single numeric parameter.
pub const MAX_GRID_POINTS: usize = 10;
/// Probability a categorical gene changes during local perturbation.
pub const CATEGORICAL_SWAP_PROBABILITY: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    Integer,
    Float,
    Categorical,
}

/// Values a parameter may take.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParameterDomain {
    Integer {
        min: i64,
        max: i64,
        #[serde(default)]
        step: Option<i64>,
    },
    Float {
        min: f64,
        max: f64,
        #[serde(default)]
        step: Option<f64>,
    },
    Categorical { values: Vec<String> },
}

/// A tunable strategy parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub default: ParamValue,
    pub domain: ParameterDomain,
}

impl ParameterDefinition {
    pub fn integer(name: &str, min: i64, max: i64, default: i64) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            default: ParamValue::Int(default),
            domain: ParameterDomain::Integer {
                min,
                max,
                step: None,
            },
        }
    }

    pub fn float(name: &str, min: f64, max: f64, default: f64) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            default: ParamValue::Float(default),
            domain: ParameterDomain::Float {
                min,
                max,
                step: None,
            },
        }
    }

    pub fn categorical(name: &str, values: &[&str], default: &str) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            default: ParamValue::Categorical(default.to_string()),
            domain: ParameterDomain::Categorical {
                values: values.iter().map(|v| v.to_string()).collect(),
            },
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    /// Step for numeric domains; ignored for categorical ones.
    pub fn with_step(mut self, step: f64) -> Self {
        match &mut self.domain {
            ParameterDomain::Integer { step: s, .. } => *s = Some(step.round() as i64),
            ParameterDomain::Float { step: s, .. } => *s = Some(step),
            ParameterDomain::Categorical { .. } => {}
        }
        self
    }

    pub fn kind(&self) -> ParameterKind {
        match self.domain {
            ParameterDomain::Integer { .. } => ParameterKind::Integer,
            ParameterDomain::Float { .. } => ParameterKind::Float,
            ParameterDomain::Categorical { .. } => ParameterKind::Categorical,
        }
    }

    /// Numeric bounds as floats; `None` for categorical parameters.
    pub fn bounds(&self) -> Option<(f64, f64)> {
        match &self.domain {
            ParameterDomain::Integer { min, max, .. } => Some((*min as f64, *max as f64)),
            ParameterDomain::Float { min, max, .. } => Some((*min, *max)),
            ParameterDomain::Categorical { .. } => None,
        }
    }

    pub fn validate(&self) -> Result<(), OptimizerError> {
        let fail = |reason: String| Err(OptimizerError::invalid_parameter(&self.name, reason));
        if self.name.trim().is_empty() {
            return Err(OptimizerError::InvalidConfig(
                "parameter name must not be empty".to_string(),
            ));
        }
        match &self.domain {
            ParameterDomain::Integer { min, max, step } => {
                if min > max {
                    return fail(format!("min {min} exceeds max {max}"));
                }
                if matches!(step, Some(s) if *s <= 0) {
                    return fail("step must be positive".to_string());
                }
                match self.default {
                    ParamValue::Int(v) if v >= *min && v <= *max => Ok(()),
                    ref other => fail(format!("default {other} outside integer range [{min}, {max}]")),
                }
            }
            ParameterDomain::Float { min, max, step } => {
                if !min.is_finite() || !max.is_finite() {
                    return fail("bounds must be finite".to_string());
                }
                if min > max {
                    return fail(format!("min {min} exceeds max {max}"));
                }
                if matches!(step, Some(s) if !(*s > 0.0)) {
                    return fail("step must be positive".to_string());
                }
                match self.default.as_f64() {
                    Some(v) if v >= *min && v <= *max => Ok(()),
                    _ => fail(format!(
                        "default {} outside float range [{min}, {max}]",
                        self.default
                    )),
                }
            }
            ParameterDomain::Categorical { values } => {
                if values.is_empty() {
                    return fail("categorical parameter needs at least one value".to_string());
                }
                match &self.default {
                    ParamValue::Categorical(v) if values.contains(v) => Ok(()),
                    other => fail(format!("default {other} is not one of {values:?}")),
                }
            }
        }
    }

    /// Whether `value` belongs to this parameter's domain.
    pub fn contains(&self, value: &ParamValue) -> bool {
        match (&self.domain, value) {
            (ParameterDomain::Integer { min, max, .. }, ParamValue::Int(v)) => v >= min && v <= max,
            (ParameterDomain::Float { min, max, .. }, v) => {
                matches!(v.as_f64(), Some(x) if x >= *min && x <= *max)
            }
            (ParameterDomain::Categorical { values }, ParamValue::Categorical(v)) => {
                values.contains(v)
            }
            _ => false,
        }
    }

    /// Values enumerated by grid search.
    ///
    /// Categorical parameters yield every value. Numeric parameters yield their
    /// step ladder when it has at most ten points, otherwise ten evenly spaced
    /// points from min to max (integers rounded, duplicates dropped).
    pub fn grid_values(&self) -> Vec<ParamValue> {
        match &self.domain {
            ParameterDomain::Categorical { values } => values
                .iter()
                .map(|v| ParamValue::Categorical(v.clone()))
                .collect(),
            ParameterDomain::Integer { min, max, step } => {
                let step = step.unwrap_or(1).max(1);
                let count = ((max - min) / step + 1) as usize;
                let raw: Vec<i64> = if count <= MAX_GRID_POINTS {
                    (0..count as i64).map(|i| min + i * step).collect()
                } else {
                    evenly_spaced(*min as f64, *max as f64)
                        .into_iter()
                        .map(|v| v.round() as i64)
                        .collect()
                };
                let mut seen = HashSet::new();
                raw.into_iter()
                    .filter(|v| seen.insert(*v))
                    .map(ParamValue::Int)
                    .collect()
            }
            ParameterDomain::Float { min, max, step } => {
                if min == max {
                    return vec![ParamValue::Float(*min)];
                }
                let ladder = step.and_then(|s| {
                    let count = ((max - min) / s + 1e-9).floor() as usize + 1;
                    (count <= MAX_GRID_POINTS)
                        .then(|| (0..count).map(|i| min + i as f64 * s).collect::<Vec<_>>())
                });
                ladder
                    .unwrap_or_else(|| evenly_spaced(*min, *max))
                    .into_iter()
                    .map(ParamValue::Float)
                    .collect()
            }
        }
    }

    /// Uniform draw from the domain.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> ParamValue {
        match &self.domain {
            ParameterDomain::Integer { min, max, .. } => ParamValue::Int(rng.gen_range(*min..=*max)),
            ParameterDomain::Float { min, max, .. } => {
                if min == max {
                    ParamValue::Float(*min)
                } else {
                    ParamValue::Float(rng.gen_range(*min..=*max))
                }
            }
            ParameterDomain::Categorical { values } => ParamValue::Categorical(
                values
                    .choose(rng)
                    .cloned()
                    .unwrap_or_else(|| self.default.to_string()),
            ),
        }
    }

    /// Local move around `value`: numeric `v + U(-1, 1) * range * scale`, clamped;
    /// categorical swaps to a different value with probability 0.3.
    pub fn perturb<R: Rng + ?Sized>(&self, value: &ParamValue, scale: f64, rng: &mut R) -> ParamValue {
        match &self.domain {
            ParameterDomain::Categorical { values } => {
                if values.len() > 1 && rng.gen_bool(CATEGORICAL_SWAP_PROBABILITY) {
                    let current = value.as_str().unwrap_or_default();
                    let others: Vec<&String> = values.iter().filter(|v| *v != current).collect();
                    if let Some(choice) = others.choose(rng) {
                        return ParamValue::Categorical((*choice).clone());
                    }
                }
                value.clone()
            }
            _ => {
                let (min, max) = self.bounds().unwrap_or((0.0, 0.0));
                let current = value.as_f64().unwrap_or(min);
                let delta = rng.gen_range(-1.0..=1.0) * (max - min) * scale;
                self.from_f64(current + delta)
            }
        }
    }

    /// Clamp a raw numeric value into the domain, rounding integers.
    pub fn from_f64(&self, raw: f64) -> ParamValue {
        match &self.domain {
            ParameterDomain::Integer { min, max, .. } => {
                let v = if raw.is_finite() { raw.round() as i64 } else { *min };
                ParamValue::Int(v.clamp(*min, *max))
            }
            ParameterDomain::Float { min, max, .. } => {
                let v = if raw.is_finite() { raw } else { *min };
                ParamValue::Float(v.clamp(*min, *max))
            }
            ParameterDomain::Categorical { .. } => self.default.clone(),
        }
    }
}

fn evenly_spaced(min: f64, max: f64) -> Vec<f64> {
    let n = MAX_GRID_POINTS;
    (0..n)
        .map(|i| min + (max - min) * i as f64 / (n - 1) as f64)
        .collect()
}

/// An ordered, validated set of parameter definitions.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpace {
    definitions: Vec<ParameterDefinition>,
}

impl ParameterSpace {
    pub fn new(definitions: Vec<ParameterDefinition>) -> Result<Self, OptimizerError> {
        if definitions.is_empty() {
            return Err(OptimizerError::InvalidConfig(
                "at least one parameter definition is required".to_string(),
            ));
        }
        let mut names = HashSet::new();
        for def in &definitions {
            def.validate()?;
            if !names.insert(def.name.as_str()) {
                return Err(OptimizerError::invalid_parameter(&def.name, "defined more than once"));
            }
        }
        Ok(Self { definitions })
    }

    pub fn definitions(&self) -> &[ParameterDefinition] {
        &self.definitions
    }

    pub fn get(&self, name: &str) -> Option<&ParameterDefinition> {
        self.definitions.iter().find(|d| d.name == name)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn defaults(&self) -> ParameterMap {
        self.definitions
            .iter()
            .map(|d| (d.name.clone(), d.default.clone()))
            .collect()
    }

    pub fn grid_size(&self) -> usize {
        self.definitions
            .iter()
            .map(|d| d.grid_values().len())
            .product()
    }

    /// Cartesian product of every parameter's grid values, first parameter varying slowest.
    pub fn grid(&self) -> Vec<ParameterMap> {
        let mut combos: Vec<ParameterMap> = vec![ParameterMap::new()];
        for def in &self.definitions {
            let values = def.grid_values();
            let mut next = Vec::with_capacity(combos.len() * values.len());
            for combo in &combos {
                for value in &values {
                    let mut extended = combo.clone();
                    extended.insert(def.name.clone(), value.clone());
                    next.push(extended);
                }
            }
            combos = next;
        }
        combos
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> ParameterMap {
        self.definitions
            .iter()
            .map(|d| (d.name.clone(), d.sample(rng)))
            .collect()
    }

    /// Perturb every parameter of `base`; missing entries start from the default.
    pub fn perturb<R: Rng + ?Sized>(&self, base: &ParameterMap, scale: f64, rng: &mut R) -> ParameterMap {
        self.definitions
            .iter()
            .map(|d| {
                let current = base.get(&d.name).unwrap_or(&d.default);
                (d.name.clone(), d.perturb(current, scale, rng))
            })
            .collect()
    }

    /// `base` with every missing or out-of-domain parameter replaced by its default.
    pub fn complete(&self, base: &ParameterMap) -> ParameterMap {
        self.definitions
            .iter()
            .map(|d| {
                let value = base
                    .get(&d.name)
                    .filter(|v| d.contains(v))
                    .cloned()
                    .unwrap_or_else(|| d.default.clone());
                (d.name.clone(), value)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_grid_order_first_parameter_slowest() {
        let space = ParameterSpace::new(vec![
            ParameterDefinition::integer("a", 1, 3, 1),
            ParameterDefinition::integer("b", 10, 20, 10).with_step(10.0),
        ])
        .unwrap();

        let grid = space.grid();
        let pairs: Vec<(i64, i64)> = grid
            .iter()
            .map(|p| (p["a"].as_i64().unwrap(), p["b"].as_i64().unwrap()))
            .collect();
        assert_eq!(
            pairs,
            vec![(1, 10), (1, 20), (2, 10), (2, 20), (3, 10), (3, 20)]
        );
        assert_eq!(space.grid_size(), 6);
    }

    #[test]
    fn test_wide_integer_range_is_capped() {
        let def = ParameterDefinition::integer("slow", 20, 200, 50);
        let values = def.grid_values();
        assert_eq!(values.len(), MAX_GRID_POINTS);
        assert_eq!(values[0], ParamValue::Int(20));
        assert_eq!(values[9], ParamValue::Int(200));
    }

    #[test]
    fn test_narrow_integer_range_dedups() {
        let def = ParameterDefinition::integer("n", 0, 4, 2);
        assert_eq!(def.grid_values().len(), 5);
    }

    #[test]
    fn test_float_ladder_and_spacing() {
        let stepped = ParameterDefinition::float("x", 0.0, 1.0, 0.5).with_step(0.25);
        assert_eq!(stepped.grid_values().len(), 5);

        let fine = ParameterDefinition::float("x", 0.0, 1.0, 0.5).with_step(0.01);
        let values = fine.grid_values();
        assert_eq!(values.len(), MAX_GRID_POINTS);
        assert_eq!(values[9], ParamValue::Float(1.0));
    }

    #[test]
    fn test_validation_errors() {
        assert!(ParameterDefinition::integer("a", 5, 1, 3).validate().is_err());
        assert!(ParameterDefinition::integer("a", 1, 5, 9).validate().is_err());
        assert!(ParameterDefinition::integer("a", 1, 5, 2)
            .with_step(0.0)
            .validate()
            .is_err());
        assert!(ParameterDefinition::categorical("m", &[], "x").validate().is_err());
        assert!(ParameterDefinition::categorical("m", &["a", "b"], "c").validate().is_err());
        assert!(ParameterSpace::new(vec![]).is_err());
        assert!(ParameterSpace::new(vec![
            ParameterDefinition::integer("a", 1, 5, 2),
            ParameterDefinition::float("a", 1.0, 5.0, 2.0),
        ])
        .is_err());
    }

    #[test]
    fn test_sample_and_perturb_stay_in_domain() {
        let space = ParameterSpace::new(vec![
            ParameterDefinition::integer("period", 5, 50, 20),
            ParameterDefinition::float("band", 0.5, 3.0, 2.0),
            ParameterDefinition::categorical("mode", &["sma", "ema", "wma"], "sma"),
        ])
        .unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let sample = space.sample(&mut rng);
            let moved = space.perturb(&sample, 0.2, &mut rng);
            for def in space.definitions() {
                assert!(def.contains(&sample[&def.name]));
                assert!(def.contains(&moved[&def.name]));
            }
        }
    }

    #[test]
    fn test_categorical_perturb_swaps_to_other_value() {
        let def = ParameterDefinition::categorical("mode", &["a", "b"], "a");
        let mut rng = StdRng::seed_from_u64(1);
        let current = ParamValue::Categorical("a".to_string());
        let moves: Vec<ParamValue> = (0..500).map(|_| def.perturb(&current, 0.2, &mut rng)).collect();
        let swapped = moves.iter().filter(|v| v.as_str() == Some("b")).count();
        assert!(swapped > 100 && swapped < 200, "swapped {swapped} of 500");
    }

    #[test]
    fn test_complete_fills_defaults() {
        let space = ParameterSpace::new(vec![
            ParameterDefinition::integer("fast", 2, 10, 5),
            ParameterDefinition::integer("slow", 20, 50, 30),
        ])
        .unwrap();
        let mut base = ParameterMap::new();
        base.insert("fast".to_string(), ParamValue::Int(8));
        base.insert("slow".to_string(), ParamValue::Int(500));
        let full = space.complete(&base);
        assert_eq!(full["fast"], ParamValue::Int(8));
        assert_eq!(full["slow"], ParamValue::Int(30));
        assert_eq!(space.defaults()["fast"], ParamValue::Int(5));
    }
}
