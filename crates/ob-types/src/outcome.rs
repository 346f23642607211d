use serde::{Deserialize, Serialize};

use crate::trial::TrialRef;

/// Objective value(s) of one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ObjectiveValue {
    Single(f64),
    /// Ordered values of a multi-objective study.
    Multi(Vec<f64>),
}

impl ObjectiveValue {
    pub fn values(&self) -> &[f64] {
        match self {
            Self::Single(v) => std::slice::from_ref(v),
            Self::Multi(v) => v,
        }
    }

    pub fn len(&self) -> usize {
        self.values().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values().is_empty()
    }

    pub fn is_finite(&self) -> bool {
        self.values().iter().all(|v| v.is_finite())
    }
}

impl From<f64> for ObjectiveValue {
    fn from(value: f64) -> Self {
        Self::Single(value)
    }
}

impl From<Vec<f64>> for ObjectiveValue {
    fn from(values: Vec<f64>) -> Self {
        Self::Multi(values)
    }
}

impl std::fmt::Display for ObjectiveValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single(v) => write!(f, "{v}"),
            Self::Multi(v) => write!(f, "{v:?}"),
        }
    }
}

/// What the remote evaluation produced.
///
/// `Failed` is an explicit marker. A trial with no stored outcome at all has
/// simply not been computed yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TrialResult {
    Complete { values: ObjectiveValue },
    Failed { reason: String },
}

impl TrialResult {
    pub fn values(&self) -> Option<&ObjectiveValue> {
        match self {
            Self::Complete { values } => Some(values),
            Self::Failed { .. } => None,
        }
    }

    pub fn into_values(self) -> Option<ObjectiveValue> {
        match self {
            Self::Complete { values } => Some(values),
            Self::Failed { .. } => None,
        }
    }
}

/// The outcome of a trial, as written by a remote worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub trial: TrialRef,
    pub result: TrialResult,
}

impl Outcome {
    pub fn complete(trial: TrialRef, values: impl Into<ObjectiveValue>) -> Self {
        Self {
            trial,
            result: TrialResult::Complete {
                values: values.into(),
            },
        }
    }

    pub fn failed(trial: TrialRef, reason: impl Into<String>) -> Self {
        Self {
            trial,
            result: TrialResult::Failed {
                reason: reason.into(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.result, TrialResult::Complete { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trial_ref() -> TrialRef {
        TrialRef {
            study_name: "s".into(),
            number: 1,
        }
    }

    #[test]
    fn single_and_multi_views() {
        let single = ObjectiveValue::from(1.5);
        assert_eq!(single.values(), &[1.5]);
        let multi = ObjectiveValue::from(vec![1.0, 2.0]);
        assert_eq!(multi.len(), 2);
        assert!(!ObjectiveValue::Single(f64::NAN).is_finite());
    }

    #[test]
    fn failed_result_is_explicit_in_json() {
        let outcome = Outcome::failed(trial_ref(), "oom");
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["result"]["state"], "failed");
        assert!(!outcome.is_success());
        assert!(outcome.result.values().is_none());
    }

    #[test]
    fn single_value_stays_single() {
        let outcome = Outcome::complete(trial_ref(), 4.0);
        let json = serde_json::to_string(&outcome).unwrap();
        let back: Outcome = serde_json::from_str(&json).unwrap();
        assert_eq!(back.result.into_values(), Some(ObjectiveValue::Single(4.0)));
    }
}
