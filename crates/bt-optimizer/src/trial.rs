//! Trial records and the handle an objective uses while a trial runs.

use bt_types::{validation_error, BtError, BtResult, StudyError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::pruner::{PruneContext, Pruner};
use crate::search::ParameterValue;
use crate::storage::StudyStorage;

/// Whether we are maximizing or minimizing the objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectiveDirection {
    #[default]
    Maximize,
    Minimize,
}

impl ObjectiveDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Maximize => "maximize",
            Self::Minimize => "minimize",
        }
    }

    /// True when `a` is strictly better than `b`.
    pub fn is_better(&self, a: f64, b: f64) -> bool {
        match self {
            Self::Maximize => a > b,
            Self::Minimize => a < b,
        }
    }
}

impl fmt::Display for ObjectiveDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectiveDirection {
    type Err = BtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "maximize" => Ok(Self::Maximize),
            "minimize" => Ok(Self::Minimize),
            other => Err(validation_error!("unknown direction: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrialState {
    Running,
    Complete,
    Pruned,
    Failed,
}

impl TrialState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Pruned => "pruned",
            Self::Failed => "failed",
        }
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for TrialState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrialState {
    type Err = BtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "complete" => Ok(Self::Complete),
            "pruned" => Ok(Self::Pruned),
            "failed" => Ok(Self::Failed),
            other => Err(StudyError::Corruption {
                message: format!("unknown trial state: {other}"),
            }
            .into()),
        }
    }
}

/// Persisted state of one trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub id: Uuid,
    pub study_id: Uuid,
    /// Study-wide ordinal, starting at 0.
    pub number: usize,
    pub state: TrialState,
    pub params: BTreeMap<String, ParameterValue>,
    pub value: Option<f64>,
    /// Values reported during training, keyed by step.
    pub intermediate_values: BTreeMap<u64, f64>,
    /// Successive-halving rung values, keyed by rung index.
    pub rungs: BTreeMap<u32, f64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl TrialRecord {
    pub fn new(study_id: Uuid, number: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            study_id,
            number,
            state: TrialState::Running,
            params: BTreeMap::new(),
            value: None,
            intermediate_values: BTreeMap::new(),
            rungs: BTreeMap::new(),
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        }
    }

    pub fn last_step(&self) -> Option<u64> {
        self.intermediate_values.keys().next_back().copied()
    }

    pub fn mark_complete(&mut self, value: f64) {
        self.state = TrialState::Complete;
        self.value = Some(value);
        self.finished_at = Some(Utc::now());
    }

    /// Pruned trials keep their last reported value.
    pub fn mark_pruned(&mut self) {
        self.state = TrialState::Pruned;
        self.value = self
            .last_step()
            .and_then(|step| self.intermediate_values.get(&step).copied());
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: String) {
        self.state = TrialState::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    pub fn duration_seconds(&self) -> Option<f64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds() as f64 / 1000.0)
    }
}

/// The part of a trial that pruners compare against.
#[derive(Debug, Clone, PartialEq)]
pub struct RungRecord {
    pub id: Uuid,
    pub number: usize,
    pub state: TrialState,
    pub last_step: Option<u64>,
    pub rungs: BTreeMap<u32, f64>,
}

impl From<&TrialRecord> for RungRecord {
    fn from(trial: &TrialRecord) -> Self {
        Self {
            id: trial.id,
            number: trial.number,
            state: trial.state,
            last_step: trial.last_step(),
            rungs: trial.rungs.clone(),
        }
    }
}

/// Handle passed to the objective while a trial is running.
pub struct Trial<'s> {
    record: TrialRecord,
    study_name: &'s str,
    direction: ObjectiveDirection,
    storage: &'s dyn StudyStorage,
    pruner: &'s dyn Pruner,
}

impl<'s> Trial<'s> {
    pub(crate) fn new(
        record: TrialRecord,
        study_name: &'s str,
        direction: ObjectiveDirection,
        storage: &'s dyn StudyStorage,
        pruner: &'s dyn Pruner,
    ) -> Self {
        Self {
            record,
            study_name,
            direction,
            storage,
            pruner,
        }
    }

    pub fn number(&self) -> usize {
        self.record.number
    }

    pub fn params(&self) -> &BTreeMap<String, ParameterValue> {
        &self.record.params
    }

    pub fn record(&self) -> &TrialRecord {
        &self.record
    }

    pub(crate) fn into_record(self) -> TrialRecord {
        self.record
    }

    /// Record an intermediate objective value at `step`.
    pub fn report(&mut self, step: u64, value: f64) -> BtResult<()> {
        if !value.is_finite() {
            return Err(validation_error!(
                "trial {} reported a non-finite value {value} at step {step}",
                self.record.number
            ));
        }
        if self.record.intermediate_values.contains_key(&step) {
            tracing::warn!(
                "Trial {} already reported a value at step {step}; ignoring",
                self.record.number
            );
            return Ok(());
        }
        self.record.intermediate_values.insert(step, value);
        self.storage.update_trial(&self.record)
    }

    /// Ask the pruner whether this trial should stop now.
    pub fn should_prune(&mut self) -> BtResult<bool> {
        if !self.pruner.needs_peers(self.study_name, &self.record) {
            return Ok(false);
        }
        let others: Vec<RungRecord> = self
            .storage
            .get_rung_records(&self.record.study_id)?
            .into_iter()
            .filter(|t| t.id != self.record.id)
            .collect();
        let ctx = PruneContext {
            study_name: self.study_name,
            direction: self.direction,
            trials: &others,
        };
        let rungs_before = self.record.rungs.len();
        let prune = self.pruner.prune(&ctx, &mut self.record);
        if self.record.rungs.len() != rungs_before {
            self.storage.update_trial(&self.record)?;
        }
        Ok(prune)
    }

    /// The error an objective returns to signal that this trial was pruned.
    pub fn pruned_error(&self) -> BtError {
        StudyError::TrialPruned {
            trial_number: self.record.number,
            step: self.record.last_step().unwrap_or(0),
        }
        .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trial_lifecycle() {
        let mut trial = TrialRecord::new(Uuid::new_v4(), 4);
        assert_eq!(trial.state, TrialState::Running);
        assert!(trial.finished_at.is_none());

        trial.mark_complete(0.81);
        assert_eq!(trial.state, TrialState::Complete);
        assert_eq!(trial.value, Some(0.81));
        assert!(trial.finished_at.is_some());
        assert!(trial.duration_seconds().unwrap() >= 0.0);
    }

    #[test]
    fn pruned_trial_keeps_last_intermediate_value() {
        let mut trial = TrialRecord::new(Uuid::new_v4(), 0);
        trial.intermediate_values.insert(0, 0.6);
        trial.intermediate_values.insert(4, 0.7);
        trial.mark_pruned();
        assert_eq!(trial.state, TrialState::Pruned);
        assert_eq!(trial.last_step(), Some(4));
        assert_eq!(trial.value, Some(0.7));
    }

    #[test]
    fn trial_failure() {
        let mut trial = TrialRecord::new(Uuid::new_v4(), 0);
        trial.mark_failed("booster exploded".into());
        assert_eq!(trial.state, TrialState::Failed);
        assert_eq!(trial.error.as_deref(), Some("booster exploded"));
    }

    #[test]
    fn direction_comparison_and_parsing() {
        assert!(ObjectiveDirection::Maximize.is_better(0.9, 0.8));
        assert!(ObjectiveDirection::Minimize.is_better(0.1, 0.8));
        assert!(!ObjectiveDirection::Maximize.is_better(0.8, 0.8));
        assert_eq!(
            "MINIMIZE".parse::<ObjectiveDirection>().unwrap(),
            ObjectiveDirection::Minimize
        );
        assert!("sideways".parse::<ObjectiveDirection>().is_err());
        assert_eq!("pruned".parse::<TrialState>().unwrap(), TrialState::Pruned);
        assert!("zombie".parse::<TrialState>().is_err());
    }
}
