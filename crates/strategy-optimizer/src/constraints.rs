use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use backtest_engine::{format_parameters, ParamValue, ParameterMap};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::OptimizerError;
use crate::parameters::ParameterSpace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Comparison {
    fn symbol(&self) -> &'static str {
        match self {
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
            Comparison::Eq => "==",
            Comparison::Ne => "!=",
        }
    }
}

/// A constraint operand: a parameter reference or a literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    Param(String),
    Value(ParamValue),
}

impl Operand {
    pub fn param(name: &str) -> Self {
        Operand::Param(name.to_string())
    }

    pub fn value(value: ParamValue) -> Self {
        Operand::Value(value)
    }

    fn resolve<'a>(&'a self, params: &'a ParameterMap) -> Result<&'a ParamValue, String> {
        match self {
            Operand::Param(name) => params
                .get(name)
                .ok_or_else(|| format!("missing parameter '{name}'")),
            Operand::Value(v) => Ok(v),
        }
    }
}

/// Serializable boolean expression over a parameter map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ConstraintExpr {
    Compare {
        left: Operand,
        cmp: Comparison,
        right: Operand,
    },
    And { all: Vec<ConstraintExpr> },
    Or { any: Vec<ConstraintExpr> },
    Not { expr: Box<ConstraintExpr> },
}

impl ConstraintExpr {
    pub fn compare(left: Operand, cmp: Comparison, right: Operand) -> Self {
        ConstraintExpr::Compare { left, cmp, right }
    }

    pub fn negate(expr: ConstraintExpr) -> Self {
        ConstraintExpr::Not {
            expr: Box::new(expr),
        }
    }

    /// Evaluate against `params`. Missing parameters and type mismatches are errors.
    pub fn evaluate(&self, params: &ParameterMap) -> Result<bool, String> {
        match self {
            ConstraintExpr::Compare { left, cmp, right } => {
                let l = left.resolve(params)?;
                let r = right.resolve(params)?;
                compare_values(l, *cmp, r)
            }
            ConstraintExpr::And { all } => {
                for expr in all {
                    if !expr.evaluate(params)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            ConstraintExpr::Or { any } => {
                for expr in any {
                    if expr.evaluate(params)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            ConstraintExpr::Not { expr } => expr.evaluate(params).map(|v| !v),
        }
    }

    /// Every parameter name the expression reads.
    pub fn referenced_parameters(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.collect_references(&mut names);
        names
    }

    fn collect_references(&self, names: &mut BTreeSet<String>) {
        match self {
            ConstraintExpr::Compare { left, right, .. } => {
                for operand in [left, right] {
                    if let Operand::Param(name) = operand {
                        names.insert(name.clone());
                    }
                }
            }
            ConstraintExpr::And { all: exprs } | ConstraintExpr::Or { any: exprs } => {
                for expr in exprs {
                    expr.collect_references(names);
                }
            }
            ConstraintExpr::Not { expr } => expr.collect_references(names),
        }
    }
}

fn compare_values(l: &ParamValue, cmp: Comparison, r: &ParamValue) -> Result<bool, String> {
    match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => Ok(match cmp {
            Comparison::Lt => a < b,
            Comparison::Le => a <= b,
            Comparison::Gt => a > b,
            Comparison::Ge => a >= b,
            Comparison::Eq => a == b,
            Comparison::Ne => a != b,
        }),
        (None, None) => match cmp {
            Comparison::Eq => Ok(l == r),
            Comparison::Ne => Ok(l != r),
            other => Err(format!(
                "cannot order categorical values {l} {} {r}",
                other.symbol()
            )),
        },
        _ => Err(format!("type mismatch comparing {l} {} {r}", cmp.symbol())),
    }
}

pub type ConstraintFn = dyn Fn(&ParameterMap) -> bool + Send + Sync;

#[derive(Clone)]
pub enum ConstraintKind {
    Expression(ConstraintExpr),
    /// In-process closure. Serializes by name only and never round-trips.
    Predicate(Arc<ConstraintFn>),
}

/// A named feasibility predicate over candidate parameters.
#[derive(Clone, Serialize, Deserialize)]
#[serde(into = "ConstraintSpec", try_from = "ConstraintSpec")]
pub struct Constraint {
    pub name: String,
    pub kind: ConstraintKind,
}

impl Constraint {
    pub fn expression(name: &str, expr: ConstraintExpr) -> Self {
        Self {
            name: name.to_string(),
            kind: ConstraintKind::Expression(expr),
        }
    }

    pub fn predicate<F>(name: &str, f: F) -> Self
    where
        F: Fn(&ParameterMap) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            kind: ConstraintKind::Predicate(Arc::new(f)),
        }
    }

    /// `lesser < greater`, e.g. a fast period below a slow one.
    pub fn less_than(name: &str, lesser: &str, greater: &str) -> Self {
        Self::expression(
            name,
            ConstraintExpr::compare(
                Operand::param(lesser),
                Comparison::Lt,
                Operand::param(greater),
            ),
        )
    }

    /// Closures have no serializable identity, so results depending on them
    /// cannot be keyed by configuration.
    pub fn is_predicate(&self) -> bool {
        matches!(self.kind, ConstraintKind::Predicate(_))
    }

    pub fn evaluate(&self, params: &ParameterMap) -> Result<bool, String> {
        match &self.kind {
            ConstraintKind::Expression(expr) => expr.evaluate(params),
            ConstraintKind::Predicate(f) => Ok(f(params)),
        }
    }
}

impl fmt::Debug for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Constraint");
        s.field("name", &self.name);
        match &self.kind {
            ConstraintKind::Expression(expr) => s.field("expression", expr),
            ConstraintKind::Predicate(_) => s.field("predicate", &"<closure>"),
        };
        s.finish()
    }
}

/// Wire form of a constraint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<ConstraintExpr>,
}

impl From<Constraint> for ConstraintSpec {
    fn from(c: Constraint) -> Self {
        let expression = match c.kind {
            ConstraintKind::Expression(expr) => Some(expr),
            ConstraintKind::Predicate(_) => None,
        };
        ConstraintSpec {
            name: c.name,
            expression,
        }
    }
}

impl TryFrom<ConstraintSpec> for Constraint {
    type Error = String;

    fn try_from(spec: ConstraintSpec) -> Result<Self, Self::Error> {
        match spec.expression {
            Some(expr) => Ok(Constraint::expression(&spec.name, expr)),
            None => Err(format!(
                "constraint '{}' has no expression; closures cannot be deserialized",
                spec.name
            )),
        }
    }
}

/// Applies every constraint to candidate parameter maps.
#[derive(Debug, Clone, Default)]
pub struct ConstraintEvaluator {
    constraints: Vec<Constraint>,
}

impl ConstraintEvaluator {
    pub fn new(constraints: Vec<Constraint>) -> Self {
        Self { constraints }
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// Reject expressions that reference parameters outside `space`.
    pub fn validate(&self, space: &ParameterSpace) -> Result<(), OptimizerError> {
        for constraint in &self.constraints {
            if let ConstraintKind::Expression(expr) = &constraint.kind {
                if let Some(unknown) = expr
                    .referenced_parameters()
                    .into_iter()
                    .find(|name| space.get(name).is_none())
                {
                    return Err(OptimizerError::Constraint {
                        name: constraint.name.clone(),
                        reason: format!("references unknown parameter '{unknown}'"),
                    });
                }
            }
        }
        Ok(())
    }

    /// True when every constraint holds. Evaluation errors count as violations.
    pub fn is_feasible(&self, params: &ParameterMap) -> bool {
        self.constraints.iter().all(|c| match c.evaluate(params) {
            Ok(ok) => ok,
            Err(reason) => {
                warn!(
                    "Constraint '{}' failed on [{}]: {}",
                    c.name,
                    format_parameters(params),
                    reason
                );
                false
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::ParameterDefinition;

    fn params(fast: i64, slow: i64, mode: &str) -> ParameterMap {
        let mut p = ParameterMap::new();
        p.insert("fast".to_string(), ParamValue::Int(fast));
        p.insert("slow".to_string(), ParamValue::Int(slow));
        p.insert("mode".to_string(), ParamValue::Categorical(mode.to_string()));
        p
    }

    #[test]
    fn test_less_than() {
        let c = Constraint::less_than("fast_below_slow", "fast", "slow");
        assert_eq!(c.evaluate(&params(5, 20, "sma")), Ok(true));
        assert_eq!(c.evaluate(&params(20, 20, "sma")), Ok(false));
    }

    #[test]
    fn test_boolean_combinators() {
        let expr = ConstraintExpr::Or {
            any: vec![
                ConstraintExpr::compare(
                    Operand::param("mode"),
                    Comparison::Eq,
                    Operand::value(ParamValue::Categorical("ema".to_string())),
                ),
                ConstraintExpr::negate(ConstraintExpr::compare(
                    Operand::param("fast"),
                    Comparison::Ge,
                    Operand::value(ParamValue::Int(10)),
                )),
            ],
        };
        assert_eq!(expr.evaluate(&params(15, 30, "ema")), Ok(true));
        assert_eq!(expr.evaluate(&params(5, 30, "sma")), Ok(true));
        assert_eq!(expr.evaluate(&params(15, 30, "sma")), Ok(false));
    }

    #[test]
    fn test_errors_count_as_violations() {
        let evaluator = ConstraintEvaluator::new(vec![
            Constraint::less_than("missing", "fast", "nope"),
        ]);
        assert!(!evaluator.is_feasible(&params(5, 20, "sma")));

        let mismatch = ConstraintExpr::compare(Operand::param("mode"), Comparison::Lt, Operand::param("fast"));
        assert!(mismatch.evaluate(&params(5, 20, "sma")).is_err());
    }

    #[test]
    fn test_predicate_constraint() {
        let evaluator = ConstraintEvaluator::new(vec![Constraint::predicate("spread", |p| {
            let fast = p.get("fast").and_then(ParamValue::as_f64).unwrap_or(0.0);
            let slow = p.get("slow").and_then(ParamValue::as_f64).unwrap_or(0.0);
            slow - fast >= 10.0
        })]);
        assert!(evaluator.is_feasible(&params(5, 20, "sma")));
        assert!(!evaluator.is_feasible(&params(15, 20, "sma")));
    }

    #[test]
    fn test_validate_rejects_unknown_reference() {
        let space = ParameterSpace::new(vec![
            ParameterDefinition::integer("fast", 2, 10, 5),
            ParameterDefinition::integer("slow", 20, 50, 30),
        ])
        .unwrap();
        assert!(ConstraintEvaluator::new(vec![Constraint::less_than("ok", "fast", "slow")])
            .validate(&space)
            .is_ok());
        assert!(matches!(
            ConstraintEvaluator::new(vec![Constraint::less_than("bad", "fast", "medium")]).validate(&space),
            Err(OptimizerError::Constraint { .. })
        ));
    }

    #[test]
    fn test_expression_json_shape() {
        let c = Constraint::less_than("order", "fast", "slow");
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "name": "order",
                "expression": {"op": "compare", "left": {"param": "fast"}, "cmp": "lt", "right": {"param": "slow"}}
            })
        );
        let back: Constraint = serde_json::from_value(json).unwrap();
        assert_eq!(back.evaluate(&params(1, 2, "sma")), Ok(true));

        let closure = Constraint::predicate("closure", |_| true);
        let json = serde_json::to_value(&closure).unwrap();
        assert_eq!(json, serde_json::json!({"name": "closure"}));
        assert!(serde_json::from_value::<Constraint>(json).is_err());
    }
}
