//! SQLite-backed lineage repository.
//!
//! Four tables mirror the artifact graph: `datasets`, `models`,
//! `evaluations` and `pruned_models`. Names carry `UNIQUE` constraints and
//! every edge is a real foreign key, so the database itself rejects dangling
//! references and duplicate names. Each write runs in its own transaction.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use serde::Serialize;
use tracing::{error, info};

use crate::error::{ArtifactKind, LineageError};

use super::records::{
    DatasetId, DatasetRecord, EvaluationId, EvaluationRecord, MacroSettings, ModelId, ModelRecord,
    PrunedModelId, PrunedModelRecord,
};
use super::repository::{LineageRepository, LineageResult};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS datasets (
    id          INTEGER PRIMARY KEY,
    name        TEXT NOT NULL UNIQUE,
    rows        INTEGER NOT NULL,
    macro       TEXT NOT NULL,
    created_at  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS models (
    id          INTEGER PRIMARY KEY,
    name        TEXT NOT NULL UNIQUE,
    dataset_id  INTEGER NOT NULL REFERENCES datasets(id),
    created_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_models_dataset_id ON models(dataset_id);
CREATE TABLE IF NOT EXISTS evaluations (
    id          INTEGER PRIMARY KEY,
    model_id    INTEGER NOT NULL REFERENCES models(id),
    dataset_id  INTEGER NOT NULL REFERENCES datasets(id),
    auc         REAL NOT NULL,
    created_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_evaluations_model_id ON evaluations(model_id);
CREATE INDEX IF NOT EXISTS idx_evaluations_dataset_id ON evaluations(dataset_id);
CREATE TABLE IF NOT EXISTS pruned_models (
    id             INTEGER PRIMARY KEY,
    pruned_name    TEXT NOT NULL UNIQUE,
    base_model_id  INTEGER NOT NULL REFERENCES models(id),
    created_at     TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_pruned_models_base_model_id ON pruned_models(base_model_id);
";

/// Row counts per lineage table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LineageCounts {
    pub datasets: u64,
    pub models: u64,
    pub evaluations: u64,
    pub pruned_models: u64,
}

/// Lineage repository over a single SQLite connection.
pub struct SqliteLineage {
    conn: Mutex<Connection>,
}

impl SqliteLineage {
    /// Open (or create) the database file and ensure the schema exists.
    pub fn open(path: &Path) -> LineageResult<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// A private in-memory database, mostly useful for tests.
    pub fn open_in_memory() -> LineageResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> LineageResult<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let repo = Self {
            conn: Mutex::new(conn),
        };
        repo.init_schema()?;
        Ok(repo)
    }

    /// Create the lineage tables and indexes. Idempotent.
    pub fn init_schema(&self) -> LineageResult<()> {
        self.lock().execute_batch(SCHEMA)?;
        Ok(())
    }

    pub fn counts(&self) -> LineageResult<LineageCounts> {
        let conn = self.lock();
        let count = |table: &str| -> LineageResult<u64> {
            let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })?;
            Ok(n.max(0) as u64)
        };
        Ok(LineageCounts {
            datasets: count("datasets")?,
            models: count("models")?,
            evaluations: count("evaluations")?,
            pruned_models: count("pruned_models")?,
        })
    }

    // A panic mid-transaction drops the `Transaction`, which rolls back, so
    // the connection behind a poisoned lock is still consistent.
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write<T>(&self, f: impl FnOnce(&Transaction<'_>) -> LineageResult<T>) -> LineageResult<T> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

fn parse_timestamp(raw: &str) -> LineageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| LineageError::Corrupt {
            column: "created_at",
            value: raw.to_string(),
        })
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn insert_error(err: rusqlite::Error, kind: ArtifactKind, name: &str) -> LineageError {
    if is_unique_violation(&err) {
        LineageError::DuplicateName {
            kind,
            name: name.to_string(),
        }
    } else {
        LineageError::Database(err)
    }
}

fn resolve_dataset(tx: &Transaction<'_>, name: &str) -> LineageResult<i64> {
    tx.query_row("SELECT id FROM datasets WHERE name = ?1", [name], |row| {
        row.get(0)
    })
    .optional()?
    .ok_or_else(|| LineageError::NotFound {
        kind: ArtifactKind::Dataset,
        name: name.to_string(),
    })
}

fn resolve_model(tx: &Transaction<'_>, name: &str) -> LineageResult<i64> {
    tx.query_row("SELECT id FROM models WHERE name = ?1", [name], |row| {
        row.get(0)
    })
    .optional()?
    .ok_or_else(|| LineageError::NotFound {
        kind: ArtifactKind::Model,
        name: name.to_string(),
    })
}

fn log_write<T>(result: &LineageResult<T>, what: &str, name: &str) {
    match result {
        Ok(_) => info!(artifact = what, name, "recorded lineage"),
        Err(e) => error!(artifact = what, name, error = %e, "failed to record lineage"),
    }
}

struct DatasetRow {
    id: i64,
    name: String,
    rows: i64,
    macro_json: String,
    created_at: String,
}

impl DatasetRow {
    fn into_record(self) -> LineageResult<DatasetRecord> {
        let macro_settings: MacroSettings = serde_json::from_str(&self.macro_json)?;
        Ok(DatasetRecord {
            id: DatasetId(self.id),
            name: self.name,
            rows: u64::try_from(self.rows).map_err(|_| LineageError::Corrupt {
                column: "rows",
                value: self.rows.to_string(),
            })?,
            macro_settings,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

struct ModelRow {
    id: i64,
    name: String,
    dataset_id: i64,
    dataset_name: String,
    created_at: String,
}

impl ModelRow {
    fn into_record(self) -> LineageResult<ModelRecord> {
        Ok(ModelRecord {
            id: ModelId(self.id),
            name: self.name,
            dataset_id: DatasetId(self.dataset_id),
            dataset_name: self.dataset_name,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

struct EvaluationRow {
    id: i64,
    model_id: i64,
    model_name: String,
    dataset_id: i64,
    dataset_name: String,
    auc: f64,
    created_at: String,
}

impl EvaluationRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            model_id: row.get(1)?,
            model_name: row.get(2)?,
            dataset_id: row.get(3)?,
            dataset_name: row.get(4)?,
            auc: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn into_record(self) -> LineageResult<EvaluationRecord> {
        Ok(EvaluationRecord {
            id: EvaluationId(self.id),
            model_id: ModelId(self.model_id),
            model_name: self.model_name,
            dataset_id: DatasetId(self.dataset_id),
            dataset_name: self.dataset_name,
            auc: self.auc,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

const EVALUATION_SELECT: &str = "
SELECT e.id, e.model_id, m.name, e.dataset_id, d.name, e.auc, e.created_at
FROM evaluations e
JOIN models m ON m.id = e.model_id
JOIN datasets d ON d.id = e.dataset_id";

impl LineageRepository for SqliteLineage {
    fn record_dataset(
        &self,
        name: &str,
        rows: u64,
        macro_settings: &MacroSettings,
    ) -> LineageResult<DatasetId> {
        let result = self.write(|tx| {
            // JSON has no NaN or infinity; serde_json would store them as null.
            if let Some((&field, &value)) = macro_settings.iter().find(|(_, v)| !v.is_finite()) {
                return Err(LineageError::NonFiniteMacro { field, value });
            }
            let rows = i64::try_from(rows).map_err(|_| LineageError::Corrupt {
                column: "rows",
                value: rows.to_string(),
            })?;
            let macro_json = serde_json::to_string(macro_settings)?;
            tx.execute(
                "INSERT INTO datasets (name, rows, macro, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![name, rows, macro_json, now_rfc3339()],
            )
            .map_err(|e| insert_error(e, ArtifactKind::Dataset, name))?;
            Ok(DatasetId(tx.last_insert_rowid()))
        });
        log_write(&result, "dataset", name);
        result
    }

    fn record_model(
        &self,
        name: &str,
        dataset_name: &str,
        created_at: Option<DateTime<Utc>>,
    ) -> LineageResult<ModelId> {
        let result = self.write(|tx| {
            let dataset_id = resolve_dataset(tx, dataset_name)?;
            let created_at = created_at.unwrap_or_else(Utc::now).to_rfc3339();
            tx.execute(
                "INSERT INTO models (name, dataset_id, created_at) VALUES (?1, ?2, ?3)",
                params![name, dataset_id, created_at],
            )
            .map_err(|e| insert_error(e, ArtifactKind::Model, name))?;
            Ok(ModelId(tx.last_insert_rowid()))
        });
        log_write(&result, "model", name);
        result
    }

    fn record_evaluation(
        &self,
        model_name: &str,
        dataset_name: &str,
        auc: f64,
    ) -> LineageResult<EvaluationId> {
        let result = self.write(|tx| {
            let model_id = resolve_model(tx, model_name)?;
            let dataset_id = resolve_dataset(tx, dataset_name)?;
            tx.execute(
                "INSERT INTO evaluations (model_id, dataset_id, auc, created_at) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![model_id, dataset_id, auc, now_rfc3339()],
            )?;
            Ok(EvaluationId(tx.last_insert_rowid()))
        });
        log_write(&result, "evaluation", model_name);
        result
    }

    fn record_pruned_model(
        &self,
        pruned_name: &str,
        base_model_name: &str,
    ) -> LineageResult<PrunedModelId> {
        let result = self.write(|tx| {
            let base_model_id = resolve_model(tx, base_model_name)?;
            tx.execute(
                "INSERT INTO pruned_models (pruned_name, base_model_id, created_at) \
                 VALUES (?1, ?2, ?3)",
                params![pruned_name, base_model_id, now_rfc3339()],
            )
            .map_err(|e| insert_error(e, ArtifactKind::PrunedModel, pruned_name))?;
            Ok(PrunedModelId(tx.last_insert_rowid()))
        });
        log_write(&result, "pruned_model", pruned_name);
        result
    }

    fn dataset(&self, name: &str) -> LineageResult<Option<DatasetRecord>> {
        let row = self
            .lock()
            .query_row(
                "SELECT id, name, rows, macro, created_at FROM datasets WHERE name = ?1",
                [name],
                |row| {
                    Ok(DatasetRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        rows: row.get(2)?,
                        macro_json: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        row.map(DatasetRow::into_record).transpose()
    }

    fn model(&self, name: &str) -> LineageResult<Option<ModelRecord>> {
        let row = self
            .lock()
            .query_row(
                "SELECT m.id, m.name, m.dataset_id, d.name, m.created_at
                 FROM models m JOIN datasets d ON d.id = m.dataset_id
                 WHERE m.name = ?1",
                [name],
                |row| {
                    Ok(ModelRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        dataset_id: row.get(2)?,
                        dataset_name: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        row.map(ModelRow::into_record).transpose()
    }

    fn pruned_model(&self, pruned_name: &str) -> LineageResult<Option<PrunedModelRecord>> {
        let row = self
            .lock()
            .query_row(
                "SELECT p.id, p.pruned_name, p.base_model_id, m.name, p.created_at
                 FROM pruned_models p JOIN models m ON m.id = p.base_model_id
                 WHERE p.pruned_name = ?1",
                [pruned_name],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;
        row.map(|(id, pruned_name, base_model_id, base_model_name, created_at)| {
            Ok(PrunedModelRecord {
                id: PrunedModelId(id),
                pruned_name,
                base_model_id: ModelId(base_model_id),
                base_model_name,
                created_at: parse_timestamp(&created_at)?,
            })
        })
        .transpose()
    }

    fn evaluation(&self, id: EvaluationId) -> LineageResult<Option<EvaluationRecord>> {
        let row = self
            .lock()
            .query_row(
                &format!("{EVALUATION_SELECT} WHERE e.id = ?1"),
                [id.0],
                EvaluationRow::from_row,
            )
            .optional()?;
        row.map(EvaluationRow::into_record).transpose()
    }

    fn evaluations_for_model(&self, model_name: &str) -> LineageResult<Vec<EvaluationRecord>> {
        let rows = {
            let conn = self.lock();
            let mut stmt =
                conn.prepare(&format!("{EVALUATION_SELECT} WHERE m.name = ?1 ORDER BY e.id"))?;
            let rows = stmt
                .query_map([model_name], EvaluationRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        rows.into_iter().map(EvaluationRow::into_record).collect()
    }
}
