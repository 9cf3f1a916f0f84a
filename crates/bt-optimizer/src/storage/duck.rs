use bt_types::{BtError, BtResult, StudyError};
use chrono::{DateTime, Utc};
use duckdb::{params, Connection, OptionalExt, Row};
use parking_lot::Mutex;
use std::path::Path;
use uuid::Uuid;

use super::StudyStorage;
use crate::study::StudySummary;
use crate::trial::{ObjectiveDirection, RungRecord, TrialRecord};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS studies (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        direction TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS trials (
        id TEXT PRIMARY KEY,
        study_id TEXT NOT NULL,
        number BIGINT NOT NULL,
        state TEXT NOT NULL,
        params TEXT NOT NULL,
        value DOUBLE,
        intermediate_values TEXT NOT NULL,
        last_step BIGINT,
        rungs TEXT NOT NULL,
        started_at TEXT NOT NULL,
        finished_at TEXT,
        error TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_trials_study_id ON trials(study_id);";

const TRIAL_COLUMNS: &str = "id, study_id, number, state, params, value, intermediate_values, \
     rungs, started_at, finished_at, error";

/// Study storage backed by a DuckDB database file.
pub struct DuckDbStorage {
    connection: Mutex<Connection>,
}

fn connection_error(e: duckdb::Error) -> BtError {
    StudyError::DatabaseConnection {
        message: e.to_string(),
    }
    .into()
}

fn query_error(query: &str) -> impl Fn(duckdb::Error) -> BtError + '_ {
    move |e| {
        StudyError::QueryFailed {
            query: query.to_string(),
            error: e.to_string(),
        }
        .into()
    }
}

fn corruption(message: impl Into<String>) -> BtError {
    StudyError::Corruption {
        message: message.into(),
    }
    .into()
}

fn parse_uuid(text: &str) -> BtResult<Uuid> {
    Uuid::parse_str(text).map_err(|e| corruption(format!("bad id {text}: {e}")))
}

fn step_column(trial: &TrialRecord) -> Option<i64> {
    trial.last_step().and_then(|step| i64::try_from(step).ok())
}

fn parse_time(text: &str) -> BtResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| corruption(format!("bad timestamp {text}: {e}")))
}

/// Columns of one `trials` row before decoding.
struct TrialRow {
    id: String,
    study_id: String,
    number: i64,
    state: String,
    params: String,
    value: Option<f64>,
    intermediate_values: String,
    rungs: String,
    started_at: String,
    finished_at: Option<String>,
    error: Option<String>,
}

impl TrialRow {
    fn from_row(row: &Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            study_id: row.get(1)?,
            number: row.get(2)?,
            state: row.get(3)?,
            params: row.get(4)?,
            value: row.get(5)?,
            intermediate_values: row.get(6)?,
            rungs: row.get(7)?,
            started_at: row.get(8)?,
            finished_at: row.get(9)?,
            error: row.get(10)?,
        })
    }

    fn decode(self) -> BtResult<TrialRecord> {
        Ok(TrialRecord {
            id: parse_uuid(&self.id)?,
            study_id: parse_uuid(&self.study_id)?,
            number: usize::try_from(self.number)
                .map_err(|_| corruption(format!("negative trial number {}", self.number)))?,
            state: self.state.parse()?,
            params: serde_json::from_str(&self.params)?,
            value: self.value,
            intermediate_values: serde_json::from_str(&self.intermediate_values)?,
            rungs: serde_json::from_str(&self.rungs)?,
            started_at: parse_time(&self.started_at)?,
            finished_at: self.finished_at.as_deref().map(parse_time).transpose()?,
            error: self.error,
        })
    }
}

impl DuckDbStorage {
    pub fn open<P: AsRef<Path>>(db_path: P) -> BtResult<Self> {
        let connection = Connection::open(db_path.as_ref()).map_err(connection_error)?;
        tracing::debug!("Opened study storage at {}", db_path.as_ref().display());
        Self::with_connection(connection)
    }

    pub fn in_memory() -> BtResult<Self> {
        Self::with_connection(Connection::open_in_memory().map_err(connection_error)?)
    }

    fn with_connection(connection: Connection) -> BtResult<Self> {
        connection.execute_batch(SCHEMA).map_err(connection_error)?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    fn study_from_row(row: &Row<'_>) -> duckdb::Result<(String, String, String, String)> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
    }

    fn decode_study(columns: (String, String, String, String)) -> BtResult<StudySummary> {
        let (id, name, direction, created_at) = columns;
        Ok(StudySummary {
            id: parse_uuid(&id)?,
            name,
            direction: direction
                .parse()
                .map_err(|_| corruption(format!("bad direction {direction}")))?,
            created_at: parse_time(&created_at)?,
        })
    }
}

impl StudyStorage for DuckDbStorage {
    fn create_study(&self, name: &str, direction: ObjectiveDirection) -> BtResult<StudySummary> {
        if self.get_study(name)?.is_some() {
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
        let sql = "INSERT INTO studies (id, name, direction, created_at) VALUES (?, ?, ?, ?)";
        self.connection
            .lock()
            .execute(
                sql,
                params![
                    study.id.to_string(),
                    study.name,
                    direction.as_str(),
                    study.created_at.to_rfc3339()
                ],
            )
            .map_err(query_error(sql))?;
        tracing::info!("Created study {} ({})", study.name, direction);
        Ok(study)
    }

    fn get_study(&self, name: &str) -> BtResult<Option<StudySummary>> {
        let sql = "SELECT id, name, direction, created_at FROM studies WHERE name = ?";
        let columns = self
            .connection
            .lock()
            .query_row(sql, params![name], Self::study_from_row)
            .optional()
            .map_err(query_error(sql))?;
        columns.map(Self::decode_study).transpose()
    }

    fn list_studies(&self) -> BtResult<Vec<StudySummary>> {
        let sql = "SELECT id, name, direction, created_at FROM studies ORDER BY created_at";
        let conn = self.connection.lock();
        let mut stmt = conn.prepare(sql).map_err(query_error(sql))?;
        let rows = stmt
            .query_map([], Self::study_from_row)
            .map_err(query_error(sql))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(query_error(sql))?;
        rows.into_iter().map(Self::decode_study).collect()
    }

    fn create_trial(&self, study_id: &Uuid) -> BtResult<TrialRecord> {
        let mut conn = self.connection.lock();
        let tx = conn.transaction().map_err(connection_error)?;

        let next_sql = "SELECT COALESCE(MAX(number), -1) + 1 FROM trials WHERE study_id = ?";
        let number: i64 = tx
            .query_row(next_sql, params![study_id.to_string()], |row| row.get(0))
            .map_err(query_error(next_sql))?;
        let trial = TrialRecord::new(*study_id, number as usize);

        let insert_sql = format!(
            "INSERT INTO trials ({TRIAL_COLUMNS}, last_step) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        tx.execute(
            &insert_sql,
            params![
                trial.id.to_string(),
                trial.study_id.to_string(),
                number,
                trial.state.as_str(),
                serde_json::to_string(&trial.params)?,
                trial.value,
                serde_json::to_string(&trial.intermediate_values)?,
                serde_json::to_string(&trial.rungs)?,
                trial.started_at.to_rfc3339(),
                trial.finished_at.map(|t| t.to_rfc3339()),
                trial.error,
                step_column(&trial),
            ],
        )
        .map_err(query_error(&insert_sql))?;

        tx.commit().map_err(connection_error)?;
        Ok(trial)
    }

    fn update_trial(&self, trial: &TrialRecord) -> BtResult<()> {
        let sql = "UPDATE trials SET state = ?, params = ?, value = ?, intermediate_values = ?, \
                   last_step = ?, rungs = ?, finished_at = ?, error = ? WHERE id = ?";
        let changed = self
            .connection
            .lock()
            .execute(
                sql,
                params![
                    trial.state.as_str(),
                    serde_json::to_string(&trial.params)?,
                    trial.value,
                    serde_json::to_string(&trial.intermediate_values)?,
                    step_column(trial),
                    serde_json::to_string(&trial.rungs)?,
                    trial.finished_at.map(|t| t.to_rfc3339()),
                    trial.error,
                    trial.id.to_string(),
                ],
            )
            .map_err(query_error(sql))?;
        if changed == 0 {
            return Err(StudyError::TrialNotFound {
                trial_id: trial.id.to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn get_trials(&self, study_id: &Uuid) -> BtResult<Vec<TrialRecord>> {
        let sql = format!("SELECT {TRIAL_COLUMNS} FROM trials WHERE study_id = ? ORDER BY number");
        let conn = self.connection.lock();
        let mut stmt = conn.prepare(&sql).map_err(query_error(&sql))?;
        let rows = stmt
            .query_map(params![study_id.to_string()], TrialRow::from_row)
            .map_err(query_error(&sql))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(query_error(&sql))?;
        rows.into_iter().map(TrialRow::decode).collect()
    }

    fn get_rung_records(&self, study_id: &Uuid) -> BtResult<Vec<RungRecord>> {
        let sql = "SELECT id, number, state, last_step, rungs FROM trials \
                   WHERE study_id = ? ORDER BY number";
        let conn = self.connection.lock();
        let mut stmt = conn.prepare(sql).map_err(query_error(sql))?;
        let rows = stmt
            .query_map(params![study_id.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .map_err(query_error(sql))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(query_error(sql))?;
        rows.into_iter()
            .map(|(id, number, state, last_step, rungs)| -> BtResult<RungRecord> {
                Ok(RungRecord {
                    id: parse_uuid(&id)?,
                    number: usize::try_from(number)
                        .map_err(|_| corruption(format!("negative trial number {number}")))?,
                    state: state.parse()?,
                    last_step: last_step
                        .map(u64::try_from)
                        .transpose()
                        .map_err(|_| corruption(format!("negative step in trial {number}")))?,
                    rungs: serde_json::from_str(&rungs)?,
                })
            })
            .collect()
    }

    fn backend(&self) -> &str {
        "duckdb"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn studies_survive_reopening_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("optuna.duckdb");

        let study_id = {
            let storage = DuckDbStorage::open(&path).unwrap();
            let study = storage
                .create_study("LightGBM_study", ObjectiveDirection::Maximize)
                .unwrap();
            let mut trial = storage.create_trial(&study.id).unwrap();
            trial.mark_complete(0.75);
            storage.update_trial(&trial).unwrap();
            study.id
        };

        let storage = DuckDbStorage::open(&path).unwrap();
        let study = storage.get_study("LightGBM_study").unwrap().unwrap();
        assert_eq!(study.id, study_id);
        let trials = storage.get_trials(&study_id).unwrap();
        assert_eq!(trials.len(), 1);
        assert_eq!(trials[0].value, Some(0.75));

        // Numbering continues where the previous session stopped.
        assert_eq!(storage.create_trial(&study_id).unwrap().number, 1);
    }

    #[test]
    fn corrupt_rows_are_reported() {
        let storage = DuckDbStorage::in_memory().unwrap();
        let study = storage
            .create_study("s", ObjectiveDirection::Maximize)
            .unwrap();
        let trial = storage.create_trial(&study.id).unwrap();
        storage
            .connection
            .lock()
            .execute(
                "UPDATE trials SET state = 'zombie' WHERE id = ?",
                params![trial.id.to_string()],
            )
            .unwrap();
        assert!(matches!(
            storage.get_trials(&study.id),
            Err(BtError::Study(StudyError::Corruption { .. }))
        ));
    }
}
