use std::collections::BTreeMap;

use statrs::statistics::Statistics;

use crate::objective::Evaluation;
use crate::parameters::{ParameterKind, ParameterSpace};

/// Importance reported for categorical parameters, which have no ordering to correlate.
pub const CATEGORICAL_IMPORTANCE: f64 = 0.5;

/// Absolute Pearson correlation between each numeric parameter and the score.
///
/// Always within `[0, 1]`; degenerate inputs (fewer than two points, constant
/// values) give 0.
pub fn parameter_importance(space: &ParameterSpace, evaluations: &[Evaluation]) -> BTreeMap<String, f64> {
    space
        .definitions()
        .iter()
        .map(|def| {
            let importance = match def.kind() {
                ParameterKind::Categorical => CATEGORICAL_IMPORTANCE,
                _ => {
                    let (xs, ys): (Vec<f64>, Vec<f64>) = evaluations
                        .iter()
                        .filter_map(|e| Some((e.parameters.get(&def.name)?.as_f64()?, e.score)))
                        .unzip();
                    abs_correlation(&xs, &ys)
                }
            };
            (def.name.clone(), importance)
        })
        .collect()
}

fn abs_correlation(xs: &[f64], ys: &[f64]) -> f64 {
    if xs.len() < 2 || xs.len() != ys.len() {
        return 0.0;
    }
    let r = xs.covariance(ys) / (xs.std_dev() * ys.std_dev());
    if r.is_finite() {
        r.abs().clamp(0.0, 1.0)
    } else {
        0.0
    }
}
