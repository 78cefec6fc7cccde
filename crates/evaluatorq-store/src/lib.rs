use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use evaluatorq_types::{
    DataPoint, DataPointResult, EvaluatorScore, JobResult, RunReport, ScoreResult,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store connection lock poisoned")]
    Poisoned,
    #[error("run {0} not found")]
    RunNotFound(i64),
}

/// SQLite-backed history of evaluation runs.
#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEntity {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub outcome: String,
    pub summary: Option<serde_json::Value>,
}

impl Store {
    /// Open (or create) a store at the given path, e.g. "runs.db".
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        store.init_schema()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned.into())
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS runs (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT,
                created_at TEXT NOT NULL,
                duration_ms INTEGER NOT NULL,
                outcome TEXT NOT NULL,
                summary TEXT
            );
            CREATE TABLE IF NOT EXISTS data_points (
                id INTEGER PRIMARY KEY,
                run_id INTEGER NOT NULL,
                row_index INTEGER NOT NULL,
                inputs TEXT NOT NULL,
                expected_output TEXT,
                error TEXT,
                has_jobs BOOLEAN NOT NULL,
                FOREIGN KEY(run_id) REFERENCES runs(id)
            );
            CREATE TABLE IF NOT EXISTS job_results (
                id INTEGER PRIMARY KEY,
                data_point_id INTEGER NOT NULL,
                position INTEGER NOT NULL,
                job_name TEXT NOT NULL,
                output TEXT NOT NULL,
                error TEXT,
                has_scores BOOLEAN NOT NULL,
                FOREIGN KEY(data_point_id) REFERENCES data_points(id)
            );
            CREATE TABLE IF NOT EXISTS evaluator_scores (
                id INTEGER PRIMARY KEY,
                job_result_id INTEGER NOT NULL,
                position INTEGER NOT NULL,
                evaluator_name TEXT NOT NULL,
                value TEXT NOT NULL,
                explanation TEXT,
                pass BOOLEAN,
                error TEXT,
                FOREIGN KEY(job_result_id) REFERENCES job_results(id)
            );",
        )?;

        Ok(())
    }

    /// Save a finished run with its full result tree. Returns the run id.
    pub fn save_run(&self, report: &RunReport) -> Result<i64> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let outcome = if report.outcome().is_failed() { "failed" } else { "passed" };

        tx.execute(
            "INSERT INTO runs (name, description, created_at, duration_ms, outcome, summary)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                report.name,
                report.description,
                Utc::now().to_rfc3339(),
                report.duration_ms as i64,
                outcome,
                serde_json::to_string(&report.summary).ok()
            ],
        )?;
        let run_id = tx.last_insert_rowid();

        for (row, dpr) in report.results.iter().enumerate() {
            save_data_point(&tx, run_id, row, dpr)?;
        }

        tx.commit()?;
        Ok(run_id)
    }

    /// All stored runs, newest first.
    pub fn list_runs(&self) -> Result<Vec<RunEntity>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, description, created_at, duration_ms, outcome, summary
             FROM runs ORDER BY id DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        })?;

        let mut runs = Vec::new();
        for row in rows {
            let (id, name, description, created_at, duration_ms, outcome, summary) = row?;
            runs.push(RunEntity {
                id,
                name,
                description,
                created_at: DateTime::parse_from_rfc3339(&created_at)
                    .with_context(|| format!("run {id} has a bad timestamp"))?
                    .with_timezone(&Utc),
                duration_ms,
                outcome,
                summary: summary.and_then(|s| serde_json::from_str(&s).ok()),
            });
        }
        Ok(runs)
    }

    /// Rebuild the report of a stored run.
    pub fn load_run(&self, run_id: i64) -> Result<RunReport> {
        let conn = self.lock()?;
        let header = conn
            .query_row(
                "SELECT name, description, duration_ms FROM runs WHERE id = ?1",
                params![run_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;
        let Some((name, description, duration_ms)) = header else {
            return Err(StoreError::RunNotFound(run_id).into());
        };

        let mut results = Vec::new();
        let mut dp_stmt = conn.prepare(
            "SELECT id, inputs, expected_output, error, has_jobs
             FROM data_points WHERE run_id = ?1 ORDER BY row_index",
        )?;
        let data_points = dp_stmt
            .query_map(params![run_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, bool>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        for (dp_id, inputs, expected, error, has_jobs) in data_points {
            let data_point = DataPoint {
                inputs: serde_json::from_str(&inputs)?,
                expected_output: expected.map(|e| serde_json::from_str(&e)).transpose()?,
            };
            let job_results = if has_jobs {
                Some(load_job_results(&conn, dp_id)?)
            } else {
                None
            };
            results.push(DataPointResult {
                data_point,
                error,
                job_results,
            });
        }

        let mut report = RunReport::new(name, results, duration_ms.max(0) as u64);
        report.description = description;
        Ok(report)
    }
}

fn save_data_point(tx: &Transaction<'_>, run_id: i64, row: usize, dpr: &DataPointResult) -> Result<()> {
    tx.execute(
        "INSERT INTO data_points (run_id, row_index, inputs, expected_output, error, has_jobs)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            run_id,
            row as i64,
            serde_json::Value::Object(dpr.data_point.inputs.clone()).to_string(),
            dpr.data_point.expected_output.as_ref().map(|v| v.to_string()),
            dpr.error,
            dpr.job_results.is_some()
        ],
    )?;
    let data_point_id = tx.last_insert_rowid();

    for (position, jr) in dpr.job_results.iter().flatten().enumerate() {
        tx.execute(
            "INSERT INTO job_results (data_point_id, position, job_name, output, error, has_scores)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                data_point_id,
                position as i64,
                jr.job_name,
                jr.output.to_string(),
                jr.error,
                jr.evaluator_scores.is_some()
            ],
        )?;
        let job_result_id = tx.last_insert_rowid();

        for (position, score) in jr.evaluator_scores.iter().flatten().enumerate() {
            tx.execute(
                "INSERT INTO evaluator_scores (job_result_id, position, evaluator_name, value, explanation, pass, error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    job_result_id,
                    position as i64,
                    score.evaluator_name,
                    serde_json::to_string(&score.score.value)?,
                    score.score.explanation,
                    score.score.pass,
                    score.error
                ],
            )?;
        }
    }
    Ok(())
}

fn load_job_results(conn: &Connection, data_point_id: i64) -> Result<Vec<JobResult>> {
    let mut stmt = conn.prepare(
        "SELECT id, job_name, output, error, has_scores
         FROM job_results WHERE data_point_id = ?1 ORDER BY position",
    )?;
    let rows = stmt
        .query_map(params![data_point_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, bool>(4)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut out = Vec::with_capacity(rows.len());
    for (id, job_name, output, error, has_scores) in rows {
        let evaluator_scores = if has_scores {
            Some(load_scores(conn, id)?)
        } else {
            None
        };
        out.push(JobResult {
            job_name,
            output: serde_json::from_str(&output)?,
            error,
            evaluator_scores,
        });
    }
    Ok(out)
}

fn load_scores(conn: &Connection, job_result_id: i64) -> Result<Vec<EvaluatorScore>> {
    let mut stmt = conn.prepare(
        "SELECT evaluator_name, value, explanation, pass, error
         FROM evaluator_scores WHERE job_result_id = ?1 ORDER BY position",
    )?;
    let rows = stmt
        .query_map(params![job_result_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<bool>>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    rows.into_iter()
        .map(|(evaluator_name, value, explanation, pass, error)| -> Result<EvaluatorScore> {
            Ok(EvaluatorScore {
                evaluator_name,
                score: ScoreResult {
                    value: serde_json::from_str(&value)?,
                    explanation,
                    pass,
                },
                error,
            })
        })
        .collect()
}
