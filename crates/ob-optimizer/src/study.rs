//! The ask/tell study: trial numbering, outcome bookkeeping and best tracking.

use chrono::{DateTime, Utc};
use ob_types::{Direction, ObjectiveValue, OptimizerError, Trial, TrialNumber, TrialState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::search::SearchStrategy;

/// Version of the [`StudySnapshot`] layout.
pub const SNAPSHOT_VERSION: u32 = 1;

/// What the caller reports for a previously asked trial.
#[derive(Debug, Clone, PartialEq)]
pub enum TellOutcome {
    Success(ObjectiveValue),
    Failure { reason: String },
}

impl TellOutcome {
    pub fn failure(reason: impl Into<String>) -> Self {
        Self::Failure {
            reason: reason.into(),
        }
    }
}

/// The ask/tell capability consumed by the scheduler.
///
/// Only the scheduling loop calls these, one at a time, so implementations
/// need no internal locking.
pub trait Optimizer: Send {
    fn study_name(&self) -> &str;

    /// Allocate the next trial number and sample its parameters.
    fn ask(&mut self) -> Result<Trial, OptimizerError>;

    /// Record the outcome of an asked trial. Must be called exactly once per
    /// trial; anything else is an error.
    fn tell(&mut self, number: TrialNumber, outcome: TellOutcome)
        -> Result<&Trial, OptimizerError>;

    /// Best trial so far, `None` until a success has been told.
    fn best(&self) -> Option<&Trial>;

    /// Full history, for checkpointing.
    fn snapshot(&self) -> StudySnapshot;
}

/// Serializable copy of a study's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudySnapshot {
    pub version: u32,
    pub study_name: String,
    pub directions: Vec<Direction>,
    pub strategy: String,
    pub trials: Vec<Trial>,
    pub best_trial: Option<TrialNumber>,
    pub saved_at: DateTime<Utc>,
}

impl StudySnapshot {
    pub fn count(&self, state: TrialState) -> usize {
        self.trials.iter().filter(|t| t.state == state).count()
    }
}

/// In-memory study driven through ask/tell.
pub struct Study {
    name: String,
    directions: Vec<Direction>,
    strategy: Box<dyn SearchStrategy>,
    trials: BTreeMap<TrialNumber, Trial>,
    next_number: TrialNumber,
    best: Option<TrialNumber>,
}

impl std::fmt::Debug for Study {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Study")
            .field("name", &self.name)
            .field("directions", &self.directions)
            .field("strategy", &self.strategy.name())
            .field("trials", &self.trials.len())
            .field("best", &self.best)
            .finish()
    }
}

impl Study {
    pub fn new(
        name: impl Into<String>,
        directions: Vec<Direction>,
        strategy: Box<dyn SearchStrategy>,
    ) -> Result<Self, OptimizerError> {
        if directions.is_empty() {
            return Err(OptimizerError::InvalidStudy {
                message: "a study needs at least one direction".to_string(),
            });
        }
        Ok(Self::empty(name.into(), directions, strategy))
    }

    pub fn minimize(name: impl Into<String>, strategy: Box<dyn SearchStrategy>) -> Self {
        Self::empty(name.into(), vec![Direction::Minimize], strategy)
    }

    fn empty(name: String, directions: Vec<Direction>, strategy: Box<dyn SearchStrategy>) -> Self {
        Self {
            name,
            directions,
            strategy,
            trials: BTreeMap::new(),
            next_number: 0,
            best: None,
        }
    }

    /// Rebuild a study from a checkpoint.
    ///
    /// Trials still in progress when the snapshot was taken have no tracked
    /// remote job any more and are recorded as failed. Succeeded trials are
    /// replayed into `strategy`.
    pub fn restore(
        snapshot: StudySnapshot,
        strategy: Box<dyn SearchStrategy>,
    ) -> Result<Self, OptimizerError> {
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(OptimizerError::InvalidStudy {
                message: format!("snapshot version {} is newer than this build", snapshot.version),
            });
        }

        let mut study = Self::new(snapshot.study_name, snapshot.directions, strategy)?;
        for mut trial in snapshot.trials {
            if !trial.state.is_finished() {
                trial.mark_failed("abandoned: scheduler restarted");
            }
            study.next_number = study.next_number.max(trial.number + 1);
            study.trials.insert(trial.number, trial);
        }

        let succeeded: Vec<TrialNumber> = study
            .trials
            .values()
            .filter(|t| t.state == TrialState::Succeeded)
            .map(|t| t.number)
            .collect();
        for number in succeeded {
            study.learn_from(number);
        }

        debug!(
            study = %study.name,
            trials = study.trials.len(),
            next_number = study.next_number,
            "study restored"
        );
        Ok(study)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn directions(&self) -> &[Direction] {
        &self.directions
    }

    pub fn is_multi_objective(&self) -> bool {
        self.directions.len() > 1
    }

    pub fn trials(&self) -> impl Iterator<Item = &Trial> {
        self.trials.values()
    }

    pub fn trial(&self, number: TrialNumber) -> Option<&Trial> {
        self.trials.get(&number)
    }

    pub fn n_trials(&self) -> usize {
        self.trials.len()
    }

    /// Pareto front of the succeeded trials. For a single objective this is
    /// every trial tied with the best value.
    pub fn best_trials(&self) -> Vec<&Trial> {
        let succeeded: Vec<&Trial> = self
            .trials
            .values()
            .filter(|t| t.state == TrialState::Succeeded)
            .collect();

        succeeded
            .iter()
            .filter(|candidate| !succeeded.iter().any(|other| self.dominates(other, candidate)))
            .copied()
            .collect()
    }

    fn dominates(&self, a: &Trial, b: &Trial) -> bool {
        let (Some(a), Some(b)) = (a.values.as_ref(), b.values.as_ref()) else {
            return false;
        };
        let mut strictly_better = false;
        for ((direction, va), vb) in self.directions.iter().zip(a.values()).zip(b.values()) {
            if direction.improves(*vb, *va) {
                return false;
            }
            if direction.improves(*va, *vb) {
                strictly_better = true;
            }
        }
        strictly_better
    }

    /// Check a reported value against the study shape; `Err` holds the
    /// reason the trial has to be recorded as failed instead.
    fn check_values(&self, values: &ObjectiveValue) -> Result<(), String> {
        if values.len() != self.directions.len() {
            return Err(format!(
                "expected {} objective value(s), got {}",
                self.directions.len(),
                values.len()
            ));
        }
        if !values.is_finite() {
            return Err(format!("objective value {values} is not finite"));
        }
        Ok(())
    }

    /// Feed a succeeded trial to the strategy and the best tracker.
    fn learn_from(&mut self, number: TrialNumber) {
        let Some(trial) = self.trials.get(&number) else {
            return;
        };
        let Some(value) = trial.primary_value() else {
            return;
        };

        let primary = self.directions[0];
        self.strategy.report(&trial.params, primary.score(value));

        let improves = match self.best.and_then(|n| self.trials.get(&n)) {
            None => true,
            Some(current) => current
                .primary_value()
                .map_or(true, |incumbent| primary.improves(value, incumbent)),
        };
        if improves {
            self.best = Some(number);
        }
    }
}

impl Optimizer for Study {
    fn study_name(&self) -> &str {
        &self.name
    }

    fn ask(&mut self) -> Result<Trial, OptimizerError> {
        let params = self
            .strategy
            .suggest(1)
            .pop()
            .ok_or_else(|| OptimizerError::Exhausted {
                strategy: self.strategy.name().to_string(),
            })?;

        let number = self.next_number;
        self.next_number += 1;

        let trial = Trial::new(self.name.clone(), number, params);
        self.trials.insert(number, trial.clone());
        debug!(study = %self.name, trial = number, "trial asked");
        Ok(trial)
    }

    fn tell(
        &mut self,
        number: TrialNumber,
        outcome: TellOutcome,
    ) -> Result<&Trial, OptimizerError> {
        let state = self
            .trials
            .get(&number)
            .map(|t| t.state)
            .ok_or(OptimizerError::UnknownTrial { number })?;
        if state.is_finished() {
            return Err(OptimizerError::AlreadyTold { number });
        }

        let outcome = match outcome {
            TellOutcome::Success(values) => match self.check_values(&values) {
                Ok(()) => TellOutcome::Success(values),
                Err(reason) => {
                    warn!(study = %self.name, trial = number, %reason, "recording trial as failed");
                    TellOutcome::Failure { reason }
                }
            },
            failure => failure,
        };

        let succeeded = matches!(outcome, TellOutcome::Success(_));
        if let Some(trial) = self.trials.get_mut(&number) {
            match outcome {
                TellOutcome::Success(values) => trial.mark_succeeded(values),
                TellOutcome::Failure { reason } => trial.mark_failed(reason),
            }
        }
        if succeeded {
            self.learn_from(number);
        }

        self.trials
            .get(&number)
            .ok_or(OptimizerError::UnknownTrial { number })
    }

    fn best(&self) -> Option<&Trial> {
        self.best.and_then(|n| self.trials.get(&n))
    }

    fn snapshot(&self) -> StudySnapshot {
        StudySnapshot {
            version: SNAPSHOT_VERSION,
            study_name: self.name.clone(),
            directions: self.directions.clone(),
            strategy: self.strategy.name().to_string(),
            trials: self.trials.values().cloned().collect(),
            best_trial: self.best,
            saved_at: Utc::now(),
        }
    }
}
