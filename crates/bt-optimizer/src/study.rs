//! Study lifecycle: create or load, optimize, query results.

use bt_types::{BtResult, StudyError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::ControlFlow;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::pruner::Pruner;
use crate::sampler::Sampler;
use crate::search::SearchSpace;
use crate::storage::StudyStorage;
use crate::trial::{ObjectiveDirection, Trial, TrialRecord, TrialState};

/// Study metadata as held by the storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudySummary {
    pub id: Uuid,
    pub name: String,
    pub direction: ObjectiveDirection,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StudyState {
    Loaded,
    Optimizing,
    Stopped,
}

/// What happens when the objective returns an error other than pruning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// Record the trial as failed and return the error.
    #[default]
    Abort,
    /// Record the trial as failed and move on to the next one.
    Continue,
}

/// Stop predicate used by the per-trial callback: halt once the study-wide
/// trial number reaches the budget.
pub fn should_halt(trial_number: usize, budget: usize) -> bool {
    trial_number >= budget
}

pub struct Study {
    summary: StudySummary,
    storage: Arc<dyn StudyStorage>,
    sampler: Box<dyn Sampler>,
    pruner: Box<dyn Pruner>,
    failure_policy: FailurePolicy,
    state: StudyState,
}

impl Study {
    pub fn create(
        storage: Arc<dyn StudyStorage>,
        name: &str,
        direction: ObjectiveDirection,
        sampler: Box<dyn Sampler>,
        pruner: Box<dyn Pruner>,
    ) -> BtResult<Self> {
        let summary = storage.create_study(name, direction)?;
        Ok(Self::from_summary(summary, storage, sampler, pruner))
    }

    /// Attach to an existing study; fails with `StudyError::NotFound` otherwise.
    pub fn load(
        storage: Arc<dyn StudyStorage>,
        name: &str,
        sampler: Box<dyn Sampler>,
        pruner: Box<dyn Pruner>,
    ) -> BtResult<Self> {
        let summary = storage
            .get_study(name)?
            .ok_or_else(|| StudyError::NotFound {
                study_name: name.to_string(),
            })?;
        info!(
            "Loaded study {} ({}, {} storage, sampler {}, pruner {})",
            summary.name,
            summary.direction,
            storage.backend(),
            sampler.name(),
            pruner.name()
        );
        Ok(Self::from_summary(summary, storage, sampler, pruner))
    }

    fn from_summary(
        summary: StudySummary,
        storage: Arc<dyn StudyStorage>,
        sampler: Box<dyn Sampler>,
        pruner: Box<dyn Pruner>,
    ) -> Self {
        Self {
            summary,
            storage,
            sampler,
            pruner,
            failure_policy: FailurePolicy::default(),
            state: StudyState::Loaded,
        }
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn id(&self) -> Uuid {
        self.summary.id
    }

    pub fn name(&self) -> &str {
        &self.summary.name
    }

    pub fn direction(&self) -> ObjectiveDirection {
        self.summary.direction
    }

    pub fn state(&self) -> StudyState {
        self.state
    }

    pub fn summary(&self) -> &StudySummary {
        &self.summary
    }

    pub fn trials(&self) -> BtResult<Vec<TrialRecord>> {
        self.storage.get_trials(&self.summary.id)
    }

    pub fn n_trials(&self) -> BtResult<usize> {
        Ok(self.trials()?.len())
    }

    /// Best completed trial according to the study direction.
    pub fn best_trial(&self) -> BtResult<TrialRecord> {
        let direction = self.summary.direction;
        self.trials()?
            .into_iter()
            .filter(|t| t.state == TrialState::Complete)
            .filter(|t| t.value.map_or(false, f64::is_finite))
            .reduce(|best, t| match (t.value, best.value) {
                (Some(v), Some(b)) if direction.is_better(v, b) => t,
                _ => best,
            })
            .ok_or_else(|| {
                StudyError::NoCompletedTrials {
                    study_name: self.summary.name.clone(),
                }
                .into()
            })
    }

    /// Run up to `n_trials` trials sequentially.
    ///
    /// `callback` runs after every finished trial, whatever its outcome;
    /// returning `ControlFlow::Break(())` stops the study after that trial.
    pub fn optimize<F, C>(
        &mut self,
        space: &SearchSpace,
        n_trials: usize,
        mut objective: F,
        mut callback: C,
    ) -> BtResult<()>
    where
        F: FnMut(&mut Trial<'_>) -> BtResult<f64>,
        C: FnMut(&Study, &TrialRecord) -> ControlFlow<()>,
    {
        self.state = StudyState::Optimizing;
        let result = self.run_trials(space, n_trials, &mut objective, &mut callback);
        self.state = StudyState::Stopped;
        result
    }

    fn run_trials<F, C>(
        &mut self,
        space: &SearchSpace,
        n_trials: usize,
        objective: &mut F,
        callback: &mut C,
    ) -> BtResult<()>
    where
        F: FnMut(&mut Trial<'_>) -> BtResult<f64>,
        C: FnMut(&Study, &TrialRecord) -> ControlFlow<()>,
    {
        for _ in 0..n_trials {
            let record = self.run_trial(space, objective)?;
            if callback(&*self, &record).is_break() {
                info!("Study {} stopped after trial {}", self.summary.name, record.number);
                break;
            }
        }
        Ok(())
    }

    fn run_trial<F>(&mut self, space: &SearchSpace, objective: &mut F) -> BtResult<TrialRecord>
    where
        F: FnMut(&mut Trial<'_>) -> BtResult<f64>,
    {
        let study_id = self.summary.id;
        let direction = self.summary.direction;

        let mut record = self.storage.create_trial(&study_id)?;
        let history: Vec<TrialRecord> = self
            .storage
            .get_trials(&study_id)?
            .into_iter()
            .filter(|t| t.id != record.id)
            .collect();
        record.params = self.sampler.sample(space, &history, direction);
        self.storage.update_trial(&record)?;

        let mut trial = Trial::new(
            record,
            &self.summary.name,
            direction,
            self.storage.as_ref(),
            self.pruner.as_ref(),
        );
        let outcome = objective(&mut trial);
        let mut record = trial.into_record();

        match outcome {
            Ok(value) if value.is_finite() => {
                record.mark_complete(value);
                self.storage.update_trial(&record)?;
                let best = self.best_trial()?;
                info!(
                    "Trial {} finished with value: {} and parameters: {}. Best is trial {} with value: {}.",
                    record.number,
                    value,
                    serde_json::to_string(&record.params)?,
                    best.number,
                    best.value.unwrap_or(value)
                );
            }
            Ok(value) => {
                record.mark_failed(format!("objective returned {value}"));
                self.storage.update_trial(&record)?;
                warn!("Trial {} failed: objective returned {value}", record.number);
            }
            Err(e) if e.is_pruned() => {
                record.mark_pruned();
                self.storage.update_trial(&record)?;
                info!("Trial {} pruned. {e}", record.number);
            }
            Err(e) => {
                record.mark_failed(e.to_string());
                self.storage.update_trial(&record)?;
                warn!("Trial {} failed: {e}", record.number);
                if self.failure_policy == FailurePolicy::Abort {
                    return Err(e);
                }
            }
        }
        Ok(record)
    }
}
