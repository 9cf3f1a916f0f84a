//! Persistent study storage.

mod duck;
mod memory;

pub use duck::DuckDbStorage;
pub use memory::InMemoryStorage;

use bt_types::{BtResult, StudyError};
use std::sync::Arc;
use uuid::Uuid;

use crate::study::StudySummary;
use crate::trial::{ObjectiveDirection, RungRecord, TrialRecord};

/// Backend holding studies and their trials.
///
/// Implementations must allocate trial numbers atomically: two callers of
/// `create_trial` on the same study never receive the same number.
pub trait StudyStorage: Send + Sync {
    fn create_study(&self, name: &str, direction: ObjectiveDirection) -> BtResult<StudySummary>;

    fn get_study(&self, name: &str) -> BtResult<Option<StudySummary>>;

    fn list_studies(&self) -> BtResult<Vec<StudySummary>>;

    /// Insert a new running trial numbered one past the study's highest number.
    fn create_trial(&self, study_id: &Uuid) -> BtResult<TrialRecord>;

    fn update_trial(&self, trial: &TrialRecord) -> BtResult<()>;

    /// All trials of a study ordered by number.
    fn get_trials(&self, study_id: &Uuid) -> BtResult<Vec<TrialRecord>>;

    /// The pruning view of every trial of a study, ordered by number.
    ///
    /// Called on every pruning check, so backends should avoid decoding
    /// parameters and intermediate values here.
    fn get_rung_records(&self, study_id: &Uuid) -> BtResult<Vec<RungRecord>>;

    fn backend(&self) -> &str;
}

/// Open the storage named by `url`.
///
/// Accepted forms: `memory://`, `duckdb://:memory:` and `duckdb://<path>`.
pub fn open_storage(url: &str) -> BtResult<Arc<dyn StudyStorage>> {
    if url == "memory://" || url == "memory" {
        return Ok(Arc::new(InMemoryStorage::new()));
    }
    if let Some(target) = url.strip_prefix("duckdb://") {
        let storage = if target.is_empty() || target == ":memory:" {
            DuckDbStorage::in_memory()?
        } else {
            DuckDbStorage::open(target)?
        };
        return Ok(Arc::new(storage));
    }
    Err(StudyError::UnsupportedStorage {
        url: url.to_string(),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trial::TrialState;
    use bt_types::BtError;

    /// Behaviour every backend shares.
    fn exercise_backend(storage: &dyn StudyStorage) {
        assert!(storage.get_study("tuning").unwrap().is_none());
        let study = storage
            .create_study("tuning", ObjectiveDirection::Maximize)
            .unwrap();
        assert!(matches!(
            storage.create_study("tuning", ObjectiveDirection::Maximize),
            Err(BtError::Study(StudyError::AlreadyExists { .. }))
        ));
        let other = storage
            .create_study("other", ObjectiveDirection::Minimize)
            .unwrap();

        let loaded = storage.get_study("tuning").unwrap().unwrap();
        assert_eq!(loaded.id, study.id);
        assert_eq!(loaded.direction, ObjectiveDirection::Maximize);
        assert_eq!(storage.list_studies().unwrap().len(), 2);

        let first = storage.create_trial(&study.id).unwrap();
        let second = storage.create_trial(&study.id).unwrap();
        let elsewhere = storage.create_trial(&other.id).unwrap();
        assert_eq!(first.number, 0);
        assert_eq!(second.number, 1);
        assert_eq!(elsewhere.number, 0);

        let mut updated = second.clone();
        updated
            .params
            .insert("num_leaves".into(), crate::ParameterValue::Int(64));
        updated.intermediate_values.insert(0, 0.61);
        updated.intermediate_values.insert(1, 0.64);
        updated.rungs.insert(0, 0.64);
        updated.mark_complete(0.7);
        storage.update_trial(&updated).unwrap();

        let trials = storage.get_trials(&study.id).unwrap();
        assert_eq!(trials.len(), 2);
        assert_eq!(trials[0].state, TrialState::Running);
        assert_eq!(trials[1].state, TrialState::Complete);
        assert_eq!(trials[1].value, Some(0.7));
        assert_eq!(trials[1].params, updated.params);
        assert_eq!(trials[1].intermediate_values, updated.intermediate_values);
        assert_eq!(trials[1].rungs, updated.rungs);
        assert!(trials[1].finished_at.is_some());

        let rung_records = storage.get_rung_records(&study.id).unwrap();
        assert_eq!(rung_records.len(), 2);
        assert_eq!(rung_records[0], RungRecord::from(&first));
        assert_eq!(rung_records[1].number, 1);
        assert_eq!(rung_records[1].state, TrialState::Complete);
        assert_eq!(rung_records[1].last_step, Some(1));
        assert_eq!(rung_records[1].rungs, updated.rungs);

        let unknown = crate::TrialRecord::new(study.id, 99);
        assert!(matches!(
            storage.update_trial(&unknown),
            Err(BtError::Study(StudyError::TrialNotFound { .. }))
        ));
    }

    #[test]
    fn memory_backend_contract() {
        exercise_backend(&InMemoryStorage::new());
    }

    #[test]
    fn duckdb_backend_contract() {
        exercise_backend(&DuckDbStorage::in_memory().unwrap());
    }

    #[test]
    fn open_storage_dispatches_on_scheme() {
        assert_eq!(open_storage("memory://").unwrap().backend(), "memory");
        assert_eq!(open_storage("duckdb://:memory:").unwrap().backend(), "duckdb");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("studies.duckdb");
        let url = format!("duckdb://{}", path.display());
        assert_eq!(open_storage(&url).unwrap().backend(), "duckdb");
        assert!(path.exists());

        assert!(matches!(
            open_storage("mysql://root@localhost/optuna"),
            Err(BtError::Study(StudyError::UnsupportedStorage { .. }))
        ));
    }
}
