use bt_types::{BtResult, StudyError};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use uuid::Uuid;

use super::StudyStorage;
use crate::study::StudySummary;
use crate::trial::{ObjectiveDirection, RungRecord, TrialRecord};

#[derive(Debug, Default)]
struct State {
    studies: Vec<StudySummary>,
    trials: BTreeMap<Uuid, Vec<TrialRecord>>,
}

/// Process-local storage; contents are lost when the process exits.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    state: RwLock<State>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StudyStorage for InMemoryStorage {
    fn create_study(&self, name: &str, direction: ObjectiveDirection) -> BtResult<StudySummary> {
        let mut state = self.state.write();
        if state.studies.iter().any(|s| s.name == name) {
            return Err(StudyError::AlreadyExists {
                study_name: name.to_string(),
            }
            .into());
        }
        let study = StudySummary {
            id: Uuid::new_v4(),
            name: name.to_string(),
            direction,
            created_at: Utc::now(),
        };
        state.studies.push(study.clone());
        state.trials.insert(study.id, Vec::new());
        Ok(study)
    }

    fn get_study(&self, name: &str) -> BtResult<Option<StudySummary>> {
        Ok(self.state.read().studies.iter().find(|s| s.name == name).cloned())
    }

    fn list_studies(&self) -> BtResult<Vec<StudySummary>> {
        Ok(self.state.read().studies.clone())
    }

    fn create_trial(&self, study_id: &Uuid) -> BtResult<TrialRecord> {
        let mut state = self.state.write();
        let trials = state.trials.get_mut(study_id).ok_or_else(|| StudyError::NotFound {
            study_name: study_id.to_string(),
        })?;
        let number = trials.iter().map(|t| t.number + 1).max().unwrap_or(0);
        let trial = TrialRecord::new(*study_id, number);
        trials.push(trial.clone());
        Ok(trial)
    }

    fn update_trial(&self, trial: &TrialRecord) -> BtResult<()> {
        let mut state = self.state.write();
        let slot = state
            .trials
            .get_mut(&trial.study_id)
            .and_then(|trials| trials.iter_mut().find(|t| t.id == trial.id))
            .ok_or_else(|| StudyError::TrialNotFound {
                trial_id: trial.id.to_string(),
            })?;
        *slot = trial.clone();
        Ok(())
    }

    fn get_trials(&self, study_id: &Uuid) -> BtResult<Vec<TrialRecord>> {
        let state = self.state.read();
        let mut trials = state.trials.get(study_id).cloned().unwrap_or_default();
        trials.sort_by_key(|t| t.number);
        Ok(trials)
    }

    fn get_rung_records(&self, study_id: &Uuid) -> BtResult<Vec<RungRecord>> {
        let state = self.state.read();
        let mut records: Vec<RungRecord> = state
            .trials
            .get(study_id)
            .map(|trials| trials.iter().map(RungRecord::from).collect())
            .unwrap_or_default();
        records.sort_by_key(|r| r.number);
        Ok(records)
    }

    fn backend(&self) -> &str {
        "memory"
    }
}
