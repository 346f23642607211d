//! Search space definitions and parameter sweep strategies.

use ob_types::{OptimizerError, ParameterValue, Params};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// A single parameter dimension in the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    /// Parameter name as the objective reads it (e.g. "x").
    pub name: String,
    /// The kind of search range.
    pub kind: ParameterKind,
}

/// Describes how a parameter is sampled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParameterKind {
    /// Continuous uniform range [low, high].
    Float { low: f64, high: f64 },
    /// Integer range [low, high] inclusive.
    Int { low: i64, high: i64 },
    /// Log-uniform range (sampled in log-space then exponentiated).
    LogUniform { low: f64, high: f64 },
    /// Categorical choices.
    Choice { values: Vec<serde_json::Value> },
}

/// The full search space: an ordered list of parameter definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SearchSpace {
    pub parameters: Vec<ParameterDef>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self {
            parameters: Vec::new(),
        }
    }

    pub fn add_float(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::Float { low, high },
        });
        self
    }

    pub fn add_int(mut self, name: impl Into<String>, low: i64, high: i64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::Int { low, high },
        });
        self
    }

    pub fn add_log_uniform(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::LogUniform { low, high },
        });
        self
    }

    pub fn add_choice(mut self, name: impl Into<String>, values: Vec<serde_json::Value>) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::Choice { values },
        });
        self
    }

    /// Reject ranges no strategy could sample from.
    pub fn validate(&self) -> Result<(), OptimizerError> {
        let invalid = |message: String| Err(OptimizerError::InvalidSpace { message });

        if self.parameters.is_empty() {
            return invalid("search space has no parameters".to_string());
        }

        let mut seen = std::collections::HashSet::new();
        for param in &self.parameters {
            if !seen.insert(param.name.as_str()) {
                return invalid(format!("parameter {} defined twice", param.name));
            }
            match &param.kind {
                ParameterKind::Float { low, high } => {
                    if !(low.is_finite() && high.is_finite() && low <= high) {
                        return invalid(format!("{}: bad float range [{low}, {high}]", param.name));
                    }
                    if !(high - low).is_finite() {
                        return invalid(format!(
                            "{}: float range [{low}, {high}] is too wide to sample",
                            param.name
                        ));
                    }
                }
                ParameterKind::Int { low, high } => {
                    if low > high {
                        return invalid(format!("{}: bad int range [{low}, {high}]", param.name));
                    }
                }
                ParameterKind::LogUniform { low, high } => {
                    if !(*low > 0.0 && high.is_finite() && low <= high) {
                        return invalid(format!(
                            "{}: log-uniform range must be positive, got [{low}, {high}]",
                            param.name
                        ));
                    }
                }
                ParameterKind::Choice { values } => {
                    if values.is_empty() {
                        return invalid(format!("{}: choice list is empty", param.name));
                    }
                    if values.iter().any(|v| v.is_array() || v.is_object()) {
                        return invalid(format!("{}: choices must be scalars", param.name));
                    }
                }
            }
        }
        Ok(())
    }

    /// Total number of grid points (returns `None` if any parameter is
    /// continuous without a natural grid, or the count overflows).
    pub fn grid_size(&self) -> Option<usize> {
        self.parameters.iter().try_fold(1usize, |total, param| {
            let dim_size = match &param.kind {
                ParameterKind::Int { low, high } => int_axis_len(*low, *high)?,
                ParameterKind::Choice { values } => values.len(),
                _ => return None,
            };
            total.checked_mul(dim_size)
        })
    }

    /// Points [`GridSearch`] would enumerate, with `float_steps` points on
    /// each continuous axis. `None` on overflow.
    pub fn grid_points(&self, float_steps: usize) -> Option<usize> {
        self.parameters.iter().try_fold(1usize, |total, param| {
            let dim_size = match &param.kind {
                ParameterKind::Int { low, high } => int_axis_len(*low, *high)?,
                ParameterKind::Choice { values } => values.len(),
                ParameterKind::Float { .. } | ParameterKind::LogUniform { .. } => {
                    float_steps.max(2)
                }
            };
            total.checked_mul(dim_size)
        })
    }
}

fn int_axis_len(low: i64, high: i64) -> Option<usize> {
    let span = high.checked_sub(low)?.checked_add(1)?;
    usize::try_from(span).ok()
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Search strategies
// ---------------------------------------------------------------------------

/// Common trait for all search strategies.
pub trait SearchStrategy: Send {
    /// Generate the next batch of parameter combinations to evaluate.
    fn suggest(&mut self, count: usize) -> Vec<Params>;

    /// Report a succeeded trial so adaptive strategies can learn.
    /// `score` is oriented so that higher is better.
    fn report(&mut self, _params: &Params, _score: f64) {}

    /// Human-readable strategy name.
    fn name(&self) -> &str;
}

/// Largest grid [`StrategyKind::build`] will enumerate.
pub const MAX_GRID_POINTS: usize = 1_000_000;

/// Strategy selector used by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Grid,
    #[default]
    Random,
    Bayesian,
}

impl StrategyKind {
    pub fn build(
        self,
        space: SearchSpace,
        seed: Option<u64>,
        exploration_weight: f64,
        grid_steps: usize,
    ) -> Result<Box<dyn SearchStrategy>, OptimizerError> {
        space.validate()?;
        if self == Self::Grid {
            match space.grid_points(grid_steps) {
                Some(points) if points <= MAX_GRID_POINTS => {}
                points => {
                    return Err(OptimizerError::InvalidSpace {
                        message: format!(
                            "grid has {} points, the limit is {MAX_GRID_POINTS}",
                            points.map_or_else(|| "too many".to_string(), |p| p.to_string())
                        ),
                    })
                }
            }
        }
        Ok(match self {
            Self::Grid => Box::new(GridSearch::new(space, grid_steps)),
            Self::Random => Box::new(RandomSearch::new(space, seed)),
            Self::Bayesian => Box::new(BayesianSearch::new(space, exploration_weight, seed)),
        })
    }
}

fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

// ---- Grid search ----

/// Exhaustive grid search over discrete parameter combinations.
#[derive(Debug, Clone)]
pub struct GridSearch {
    cursor: usize,
    combos: Vec<Params>,
}

impl GridSearch {
    pub fn new(space: SearchSpace, float_steps: usize) -> Self {
        Self {
            cursor: 0,
            combos: Self::build_grid(&space, float_steps),
        }
    }

    fn build_grid(space: &SearchSpace, float_steps: usize) -> Vec<Params> {
        let steps = float_steps.max(2);
        let ramp = |i: usize| i as f64 / (steps - 1) as f64;

        let mut result: Vec<Params> = vec![Params::new()];
        for param in &space.parameters {
            let axis: Vec<ParameterValue> = match &param.kind {
                ParameterKind::Float { low, high } => (0..steps)
                    .map(|i| ParameterValue::Float(low + ramp(i) * (high - low)))
                    .collect(),
                ParameterKind::Int { low, high } => {
                    (*low..=*high).map(ParameterValue::Int).collect()
                }
                ParameterKind::LogUniform { low, high } => {
                    let (log_low, log_high) = (low.ln(), high.ln());
                    (0..steps)
                        .map(|i| {
                            ParameterValue::Float((log_low + ramp(i) * (log_high - log_low)).exp())
                        })
                        .collect()
                }
                ParameterKind::Choice { values } => values
                    .iter()
                    .map(|v| ParameterValue::Categorical(v.clone()))
                    .collect(),
            };

            // Cartesian product
            let mut next = Vec::with_capacity(result.len() * axis.len());
            for existing in &result {
                for value in &axis {
                    let mut combo = existing.clone();
                    combo.insert(param.name.clone(), value.clone());
                    next.push(combo);
                }
            }
            result = next;
        }

        result
    }
}

impl SearchStrategy for GridSearch {
    fn suggest(&mut self, count: usize) -> Vec<Params> {
        let end = (self.cursor + count).min(self.combos.len());
        let batch = self.combos[self.cursor..end].to_vec();
        self.cursor = end;
        batch
    }

    fn name(&self) -> &str {
        "grid"
    }
}

// ---- Random search ----

/// Independent random sampling across the search space.
#[derive(Debug, Clone)]
pub struct RandomSearch {
    space: SearchSpace,
    rng: StdRng,
}

impl RandomSearch {
    pub fn new(space: SearchSpace, seed: Option<u64>) -> Self {
        Self {
            space,
            rng: seeded_rng(seed),
        }
    }

    fn sample_param(rng: &mut StdRng, kind: &ParameterKind) -> ParameterValue {
        match kind {
            ParameterKind::Float { low, high } => ParameterValue::Float(rng.gen_range(*low..=*high)),
            ParameterKind::Int { low, high } => ParameterValue::Int(rng.gen_range(*low..=*high)),
            ParameterKind::LogUniform { low, high } => {
                let log_val: f64 = rng.gen_range(low.ln()..=high.ln());
                ParameterValue::Float(log_val.exp().clamp(*low, *high))
            }
            ParameterKind::Choice { values } => {
                let idx = rng.gen_range(0..values.len());
                ParameterValue::Categorical(values[idx].clone())
            }
        }
    }

    fn sample_one(&mut self) -> Params {
        let rng = &mut self.rng;
        self.space
            .parameters
            .iter()
            .map(|param| (param.name.clone(), Self::sample_param(rng, &param.kind)))
            .collect()
    }
}

impl SearchStrategy for RandomSearch {
    fn suggest(&mut self, count: usize) -> Vec<Params> {
        (0..count).map(|_| self.sample_one()).collect()
    }

    fn name(&self) -> &str {
        "random"
    }
}

// ---- Bayesian search (perturb-the-best surrogate) ----

/// Bayesian-style search using a simple surrogate heuristic.
///
/// Tracks observed (params, score) pairs and biases future sampling toward
/// the best one seen so far, falling back to uniform exploration with
/// probability `exploration_weight`.
#[derive(Debug, Clone)]
pub struct BayesianSearch {
    random: RandomSearch,
    observations: Vec<(Params, f64)>,
    exploration_weight: f64,
}

impl BayesianSearch {
    pub fn new(space: SearchSpace, exploration_weight: f64, seed: Option<u64>) -> Self {
        Self {
            random: RandomSearch::new(space, seed),
            observations: Vec::new(),
            exploration_weight,
        }
    }

    /// Exploitation: perturb the best-known point.
    fn exploit(&mut self) -> Params {
        let best = self
            .observations
            .iter()
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        let base = match best {
            Some((params, _)) => params.clone(),
            None => return self.random.sample_one(),
        };

        let rng = &mut self.random.rng;
        let mut perturbed = Params::new();

        for param in &self.random.space.parameters {
            let value = match (&param.kind, base.get(&param.name)) {
                (ParameterKind::Float { low, high }, Some(ParameterValue::Float(v))) => {
                    let noise = rng.gen_range(-0.1..0.1) * (high - low);
                    ParameterValue::Float((v + noise).clamp(*low, *high))
                }
                (ParameterKind::Int { low, high }, Some(ParameterValue::Int(v))) => {
                    let delta: i64 = rng.gen_range(-2..=2);
                    ParameterValue::Int(v.saturating_add(delta).clamp(*low, *high))
                }
                (ParameterKind::LogUniform { low, high }, Some(ParameterValue::Float(v))) => {
                    let log_range = high.ln() - low.ln();
                    let noise = rng.gen_range(-0.1..0.1) * log_range;
                    ParameterValue::Float((v.ln() + noise).exp().clamp(*low, *high))
                }
                // Choices and missing bases are resampled.
                (kind, _) => RandomSearch::sample_param(rng, kind),
            };
            perturbed.insert(param.name.clone(), value);
        }

        perturbed
    }
}

impl SearchStrategy for BayesianSearch {
    fn suggest(&mut self, count: usize) -> Vec<Params> {
        (0..count)
            .map(|_| {
                let explore = self.random.rng.gen::<f64>() < self.exploration_weight;
                if self.observations.is_empty() || explore {
                    self.random.sample_one()
                } else {
                    self.exploit()
                }
            })
            .collect()
    }

    fn report(&mut self, params: &Params, score: f64) {
        self.observations.push((params.clone(), score));
    }

    fn name(&self) -> &str {
        "bayesian"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_space() -> SearchSpace {
        SearchSpace::new()
            .add_int("depth", 5, 15)
            .add_int("width", 20, 50)
            .add_float("dropout", 0.5, 1.0)
    }

    #[test]
    fn grid_search_produces_correct_count() {
        let space = SearchSpace::new()
            .add_int("a", 1, 3) // 3 values
            .add_int("b", 10, 11); // 2 values
        assert_eq!(space.grid_size(), Some(6));

        let mut gs = GridSearch::new(space, 5);
        let batch = gs.suggest(100);
        assert_eq!(batch.len(), 6);
    }

    #[test]
    fn grid_search_cursor_advances() {
        let space = SearchSpace::new().add_int("x", 1, 5);
        let mut gs = GridSearch::new(space, 5);
        assert_eq!(gs.suggest(3).len(), 3);
        assert_eq!(gs.suggest(10).len(), 2);
        assert!(gs.suggest(1).is_empty());
    }

    #[test]
    fn random_search_respects_bounds() {
        let mut rs = RandomSearch::new(sample_space(), Some(7));
        let suggestions = rs.suggest(50);
        assert_eq!(suggestions.len(), 50);

        for params in &suggestions {
            match params.get("depth") {
                Some(ParameterValue::Int(v)) => assert!(*v >= 5 && *v <= 15),
                other => panic!("unexpected depth value: {other:?}"),
            }
            match params.get("dropout") {
                Some(ParameterValue::Float(v)) => assert!(*v >= 0.5 && *v <= 1.0),
                other => panic!("unexpected dropout value: {other:?}"),
            }
        }
    }

    #[test]
    fn seeded_random_search_is_reproducible() {
        let a = RandomSearch::new(sample_space(), Some(42)).suggest(5);
        let b = RandomSearch::new(sample_space(), Some(42)).suggest(5);
        assert_eq!(a, b);
    }

    #[test]
    fn bayesian_search_exploits_after_reports() {
        let space = SearchSpace::new().add_float("lr", 0.0, 1.0);
        // exploration_weight=0 → always exploit after a report
        let mut bs = BayesianSearch::new(space, 0.0, Some(1));

        let mut best_params = Params::new();
        best_params.insert("lr".to_string(), ParameterValue::Float(0.5));
        bs.report(&best_params, 0.95);

        for params in &bs.suggest(20) {
            match params.get("lr") {
                // Perturbation is at most ±10% of the range.
                Some(ParameterValue::Float(v)) => assert!(*v >= 0.4 && *v <= 0.6, "lr {v}"),
                other => panic!("unexpected lr value: {other:?}"),
            }
        }
    }

    #[test]
    fn choice_parameter_works() {
        let space = SearchSpace::new().add_choice(
            "optimizer",
            vec![
                serde_json::json!("adam"),
                serde_json::json!("sgd"),
                serde_json::json!("rmsprop"),
            ],
        );
        let mut rs = RandomSearch::new(space, Some(3));
        for params in &rs.suggest(30) {
            match params.get("optimizer") {
                Some(ParameterValue::Categorical(v)) => {
                    let s = v.as_str().unwrap();
                    assert!(["adam", "sgd", "rmsprop"].contains(&s));
                }
                other => panic!("unexpected optimizer value: {other:?}"),
            }
        }
    }

    #[test]
    fn log_uniform_stays_in_bounds() {
        let space = SearchSpace::new().add_log_uniform("lr", 1e-5, 1e-1);
        let mut rs = RandomSearch::new(space, None);
        for params in &rs.suggest(100) {
            match params.get("lr") {
                Some(ParameterValue::Float(v)) => {
                    assert!(*v >= 1e-5 && *v <= 1e-1, "lr out of bounds: {v}");
                }
                other => panic!("unexpected lr value: {other:?}"),
            }
        }
    }

    #[test]
    fn validate_rejects_bad_spaces() {
        assert!(SearchSpace::new().validate().is_err());
        assert!(SearchSpace::new().add_float("x", 1.0, 0.0).validate().is_err());
        assert!(SearchSpace::new().add_log_uniform("x", 0.0, 1.0).validate().is_err());
        assert!(SearchSpace::new().add_choice("c", vec![]).validate().is_err());
        assert!(SearchSpace::new()
            .add_choice("c", vec![serde_json::json!([1, 2])])
            .validate()
            .is_err());
        assert!(SearchSpace::new()
            .add_int("x", 0, 1)
            .add_int("x", 0, 1)
            .validate()
            .is_err());
        assert!(sample_space().validate().is_ok());
    }

    #[test]
    fn overflowing_float_range_is_rejected() {
        let space = SearchSpace::new().add_float("x", -1e308, 1e308);
        assert!(matches!(
            space.validate(),
            Err(OptimizerError::InvalidSpace { .. })
        ));
        assert!(StrategyKind::Random.build(space, Some(1), 0.3, 5).is_err());

        let wide_but_fine = SearchSpace::new().add_float("x", -1e307, 1e307);
        let mut strategy = StrategyKind::Random
            .build(wide_but_fine, Some(1), 0.3, 5)
            .unwrap();
        assert_eq!(strategy.suggest(10).len(), 10);
    }

    #[test]
    fn extreme_int_ranges_do_not_overflow_grid_size() {
        let space = SearchSpace::new().add_int("n", i64::MIN, i64::MAX);
        assert!(space.validate().is_ok());
        assert_eq!(space.grid_size(), None);
        assert_eq!(space.grid_points(5), None);

        // Full-width ranges still sample.
        let mut rs = RandomSearch::new(space, Some(4));
        assert_eq!(rs.suggest(3).len(), 3);
    }

    #[test]
    fn oversized_grid_is_refused() {
        let huge = SearchSpace::new().add_int("n", 0, 10_000_000);
        let err = StrategyKind::Grid.build(huge.clone(), None, 0.3, 5).err().unwrap();
        assert!(err.to_string().contains("limit"));
        // Random search over the same space is fine.
        assert!(StrategyKind::Random.build(huge, None, 0.3, 5).is_ok());

        let floats = SearchSpace::new()
            .add_float("a", 0.0, 1.0)
            .add_float("b", 0.0, 1.0)
            .add_int("c", 1, 3);
        assert_eq!(floats.grid_points(4), Some(48));
        let mut grid = StrategyKind::Grid.build(floats, None, 0.3, 4).unwrap();
        assert_eq!(grid.suggest(100).len(), 48);
    }

    #[test]
    fn search_space_deserializes_from_config_json() {
        let json = serde_json::json!([
            {"name": "x", "kind": {"type": "float", "low": -100.0, "high": 100.0}},
            {"name": "n", "kind": {"type": "int", "low": 1, "high": 4}}
        ]);
        let space: SearchSpace = serde_json::from_value(json).unwrap();
        assert_eq!(space.parameters.len(), 2);
        assert_eq!(space.parameters[1].kind, ParameterKind::Int { low: 1, high: 4 });
    }
}
