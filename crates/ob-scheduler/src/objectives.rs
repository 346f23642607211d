//! Objective functions shipped with `ob-worker`.

use anyhow::{anyhow, bail, Context};
use ob_store::codec::TrialRecord;
use ob_types::ObjectiveValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum BuiltinObjective {
    /// `(x - 2)^2`, minimized at `x = 2`.
    #[default]
    Quadratic,
    /// Sum of squares of every numeric parameter.
    Sphere,
}

impl BuiltinObjective {
    pub fn name(self) -> &'static str {
        match self {
            Self::Quadratic => "quadratic",
            Self::Sphere => "sphere",
        }
    }

    pub fn evaluate(self, trial: &TrialRecord) -> anyhow::Result<ObjectiveValue> {
        match self {
            Self::Quadratic => {
                let x = trial
                    .params
                    .get("x")
                    .context("quadratic objective needs a parameter named x")?
                    .as_f64()
                    .ok_or_else(|| anyhow!("parameter x is not numeric"))?;
                Ok(ObjectiveValue::Single((x - 2.0).powi(2)))
            }
            Self::Sphere => {
                if trial.params.is_empty() {
                    bail!("sphere objective needs at least one parameter");
                }
                let mut sum = 0.0;
                for (name, value) in &trial.params {
                    let v = value
                        .as_f64()
                        .ok_or_else(|| anyhow!("parameter {name} is not numeric"))?;
                    sum += v * v;
                }
                Ok(ObjectiveValue::Single(sum))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ob_types::{ParameterValue, Params};
    use serde_json::json;

    fn record(params: Params) -> TrialRecord {
        TrialRecord {
            study_name: "s".into(),
            number: 0,
            params,
        }
    }

    #[test]
    fn quadratic_is_minimal_at_two() {
        let mut params = Params::new();
        params.insert("x".into(), ParameterValue::Float(2.0));
        let at_min = BuiltinObjective::Quadratic.evaluate(&record(params)).unwrap();
        assert_eq!(at_min, ObjectiveValue::Single(0.0));

        let mut params = Params::new();
        params.insert("x".into(), ParameterValue::Int(5));
        let away = BuiltinObjective::Quadratic.evaluate(&record(params)).unwrap();
        assert_eq!(away, ObjectiveValue::Single(9.0));
    }

    #[test]
    fn quadratic_without_x_is_an_error() {
        let mut params = Params::new();
        params.insert("y".into(), ParameterValue::Float(1.0));
        let err = BuiltinObjective::Quadratic.evaluate(&record(params)).unwrap_err();
        assert!(err.to_string().contains("named x"));
    }

    #[test]
    fn sphere_sums_squares_and_rejects_strings() {
        let mut params = Params::new();
        params.insert("a".into(), ParameterValue::Float(1.0));
        params.insert("b".into(), ParameterValue::Int(-2));
        params.insert("c".into(), ParameterValue::Categorical(json!(3)));
        let value = BuiltinObjective::Sphere.evaluate(&record(params.clone())).unwrap();
        assert_eq!(value, ObjectiveValue::Single(14.0));

        params.insert("d".into(), ParameterValue::Categorical(json!("adam")));
        assert!(BuiltinObjective::Sphere.evaluate(&record(params)).is_err());
        assert!(BuiltinObjective::Sphere.evaluate(&record(Params::new())).is_err());
    }
}
