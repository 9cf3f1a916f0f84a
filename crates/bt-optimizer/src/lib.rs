//! # bt-optimizer
//!
//! Study framework for hyperparameter search.
//!
//! Provides search space definitions, samplers (random, TPE), pruners
//! (successive halving, Hyperband), trial tracking, and persistent study
//! storage. A [`Study`] ties them together: it numbers trials study-wide,
//! samples each proposal from the recorded history, lets the objective report
//! intermediate values for pruning, and invokes a callback after every trial.

mod pruner;
mod sampler;
mod search;
mod storage;
mod study;
mod trial;

pub use pruner::{HyperbandPruner, NopPruner, PruneContext, Pruner, SuccessiveHalvingPruner};
pub use sampler::{RandomSampler, Sampler, TpeSampler};
pub use search::{ParameterDef, ParameterKind, ParameterValue, SearchSpace};
pub use storage::{open_storage, DuckDbStorage, InMemoryStorage, StudyStorage};
pub use study::{should_halt, FailurePolicy, Study, StudyState, StudySummary};
pub use trial::{ObjectiveDirection, RungRecord, Trial, TrialRecord, TrialState};
