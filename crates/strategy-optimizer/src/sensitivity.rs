use statrs::statistics::Statistics;

use crate::results::{ParameterSensitivityResult, SensitivityPoint};

/// Coefficient of variation of the objective across a one-parameter sweep.
///
/// 0 when fewer than two points were scored or the mean objective is 0.
pub fn coefficient_of_variation(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.mean();
    if mean == 0.0 || !mean.is_finite() {
        return 0.0;
    }
    let cv = values.std_dev() / mean.abs();
    if cv.is_finite() {
        cv
    } else {
        0.0
    }
}

/// Summarize a sweep of `parameter`; the best point follows the optimization direction.
pub fn summarize(parameter: &str, points: Vec<SensitivityPoint>, maximize: bool) -> ParameterSensitivityResult {
    let values: Vec<f64> = points.iter().map(|p| p.metric_value).collect();
    let best = points.iter().fold(None::<&SensitivityPoint>, |best, p| match best {
        Some(b) if (maximize && p.metric_value <= b.metric_value)
            || (!maximize && p.metric_value >= b.metric_value) =>
        {
            Some(b)
        }
        _ => Some(p),
    });

    ParameterSensitivityResult {
        parameter: parameter.to_string(),
        sensitivity: coefficient_of_variation(&values),
        best_value: best.map(|p| p.value.clone()),
        best_metric_value: best.map(|p| p.metric_value),
        points,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backtest_engine::ParamValue;

    fn point(v: i64, metric: f64) -> SensitivityPoint {
        SensitivityPoint {
            value: ParamValue::Int(v),
            metric_value: metric,
        }
    }

    #[test]
    fn test_coefficient_of_variation() {
        assert_eq!(coefficient_of_variation(&[]), 0.0);
        assert_eq!(coefficient_of_variation(&[3.0]), 0.0);
        assert_eq!(coefficient_of_variation(&[-1.0, 1.0]), 0.0);
        assert_eq!(coefficient_of_variation(&[2.0, 2.0, 2.0]), 0.0);

        // mean 2, sample std 1
        let cv = coefficient_of_variation(&[1.0, 2.0, 3.0]);
        assert!((cv - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_best_point_per_direction() {
        let points = vec![point(1, 0.5), point(2, 1.5), point(3, -0.5), point(4, 1.5)];
        let up = summarize("p", points.clone(), true);
        assert_eq!(up.best_value, Some(ParamValue::Int(2)));
        assert_eq!(up.best_metric_value, Some(1.5));

        let down = summarize("p", points, false);
        assert_eq!(down.best_value, Some(ParamValue::Int(3)));

        let empty = summarize("p", Vec::new(), true);
        assert_eq!(empty.best_value, None);
        assert_eq!(empty.sensitivity, 0.0);
    }
}
