use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::outcome::ObjectiveValue;

/// Trial number, unique and strictly increasing within a study.
pub type TrialNumber = u64;

/// Parameter mapping of a trial, ordered by name so encodings are stable.
pub type Params = BTreeMap<String, ParameterValue>;

/// A concrete parameter value produced by a search strategy.
///
/// Adjacently tagged so an integer never comes back as a float after a trip
/// through JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ParameterValue {
    Float(f64),
    Int(i64),
    /// One of a fixed list of JSON scalars (string, bool or number).
    Categorical(serde_json::Value),
}

impl ParameterValue {
    /// Numeric view of the value; categorical numbers are included.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            Self::Categorical(v) => v.as_f64(),
        }
    }

    /// Plain JSON rendering, used when reporting parameters to humans.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Float(v) => serde_json::json!(v),
            Self::Int(v) => serde_json::json!(v),
            Self::Categorical(v) => v.clone(),
        }
    }
}

impl std::fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Categorical(v) => write!(f, "{v}"),
        }
    }
}

/// Whether we are maximizing or minimizing an objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Minimize,
    Maximize,
}

impl Default for Direction {
    fn default() -> Self {
        Self::Minimize
    }
}

impl Direction {
    /// `true` when `candidate` is strictly better than `incumbent`.
    pub fn improves(self, candidate: f64, incumbent: f64) -> bool {
        match self {
            Self::Minimize => candidate < incumbent,
            Self::Maximize => candidate > incumbent,
        }
    }

    /// Map a raw objective onto a "higher is better" score.
    pub fn score(self, value: f64) -> f64 {
        match self {
            Self::Minimize => -value,
            Self::Maximize => value,
        }
    }
}

/// Lifecycle of a single trial.
///
/// The study only ever records `Asked`, `Succeeded` and `Failed`;
/// `Dispatched` is the scheduler's view while a remote job is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialState {
    Asked,
    Dispatched,
    Succeeded,
    Failed,
}

impl TrialState {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Identity an outcome points back to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrialRef {
    pub study_name: String,
    pub number: TrialNumber,
}

impl std::fmt::Display for TrialRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.study_name, self.number)
    }
}

/// One candidate parameter set and what became of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub study_name: String,
    pub number: TrialNumber,
    pub params: Params,
    pub state: TrialState,
    pub values: Option<ObjectiveValue>,
    pub error: Option<String>,
    pub asked_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Trial {
    pub fn new(study_name: impl Into<String>, number: TrialNumber, params: Params) -> Self {
        Self {
            study_name: study_name.into(),
            number,
            params,
            state: TrialState::Asked,
            values: None,
            error: None,
            asked_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn trial_ref(&self) -> TrialRef {
        TrialRef {
            study_name: self.study_name.clone(),
            number: self.number,
        }
    }

    pub fn mark_dispatched(&mut self) {
        self.state = TrialState::Dispatched;
    }

    pub fn mark_succeeded(&mut self, values: ObjectiveValue) {
        self.state = TrialState::Succeeded;
        self.finished_at = Some(Utc::now());
        self.values = Some(values);
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.state = TrialState::Failed;
        self.finished_at = Some(Utc::now());
        self.values = None;
        self.error = Some(error.into());
    }

    /// First objective of a succeeded trial.
    pub fn primary_value(&self) -> Option<f64> {
        self.values.as_ref().and_then(|v| v.values().first().copied())
    }

    /// Parameters rendered as a flat JSON object.
    pub fn params_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.params
                .iter()
                .map(|(name, value)| (name.clone(), value.to_json()))
                .collect(),
        )
    }
}
