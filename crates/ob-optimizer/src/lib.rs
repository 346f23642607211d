//! # ob-optimizer
//!
//! The ask/tell side of Optbatch.
//!
//! Provides search space definitions, parameter sweep strategies (grid, random,
//! Bayesian-style perturbation), and the [`Study`] that allocates trial numbers,
//! records outcomes and tracks the best trial. The scheduler only sees the
//! [`Optimizer`] trait, so any other ask/tell implementation can stand in.

mod search;
mod study;

pub use search::{
    BayesianSearch, GridSearch, ParameterDef, ParameterKind, RandomSearch, SearchSpace,
    SearchStrategy, StrategyKind, MAX_GRID_POINTS,
};
pub use study::{Optimizer, Study, StudySnapshot, TellOutcome, SNAPSHOT_VERSION};
