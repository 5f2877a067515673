//! Embedded libSQL run ledger (offline mode).
//!
//! The [`Storage`] struct wraps a local libSQL database recording every bid
//! evaluation run and each stage invocation inside it. The CLI is the sole
//! writer; `tenderfit runs` reads through the same handle.

mod migrations;

use std::path::Path;

use libsql::{Connection, Database, Row, params};
use serde::{Deserialize, Serialize};
use tenderfit_shared::{Result, TenderFitError, now_rfc3339};
use uuid::Uuid;

/// Lifecycle of an evaluation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            other => Err(TenderFitError::Storage(format!("unknown run status: {other}"))),
        }
    }
}

/// A row of the `runs` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub bid_id: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub status: RunStatus,
    pub decision: Option<String>,
    pub fit_score: Option<f64>,
    pub report_json_path: Option<String>,
    pub report_md_path: Option<String>,
    pub error: Option<String>,
    /// Stage invocations, populated by [`Storage::list_runs`].
    #[serde(default)]
    pub stages: Vec<StageRunRecord>,
}

/// A row of the `stage_runs` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRunRecord {
    pub stage: String,
    pub attempt: u32,
    pub cache_hit: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Final outcome of a successful run.
#[derive(Debug, Clone)]
pub struct RunSuccess<'a> {
    pub decision: &'a str,
    pub fit_score: f64,
    pub report_json_path: &'a str,
    pub report_md_path: &'a str,
}

fn storage_err(e: libsql::Error) -> TenderFitError {
    TenderFitError::Storage(e.to_string())
}

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

impl Storage {
    /// Open or create a database at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| TenderFitError::io(parent, e))?;
            }
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        let storage = Self { db, conn };
        storage.run_migrations().await?;
        Ok(storage)
    }

    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    TenderFitError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
                _ => 0,
            },
            Err(_) => 0,
        }
    }

    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    /// Start a run for `bid_id`. Returns the new run id.
    pub async fn insert_run(&self, bid_id: &str) -> Result<String> {
        let run_id = Uuid::now_v7().to_string();
        self.conn
            .execute(
                "INSERT INTO runs (run_id, bid_id, started_at, status) VALUES (?1, ?2, ?3, ?4)",
                params![
                    run_id.as_str(),
                    bid_id,
                    now_rfc3339(),
                    RunStatus::Running.as_str()
                ],
            )
            .await
            .map_err(storage_err)?;
        tracing::debug!(%run_id, bid_id, "run started");
        Ok(run_id)
    }

    /// Mark a run as succeeded with its decision and report locations.
    pub async fn finish_run_success(&self, run_id: &str, outcome: RunSuccess<'_>) -> Result<()> {
        self.conn
            .execute(
                "UPDATE runs SET status = ?1, finished_at = ?2, decision = ?3, fit_score = ?4,
                   report_json_path = ?5, report_md_path = ?6
                 WHERE run_id = ?7",
                params![
                    RunStatus::Succeeded.as_str(),
                    now_rfc3339(),
                    outcome.decision,
                    outcome.fit_score,
                    outcome.report_json_path,
                    outcome.report_md_path,
                    run_id
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Mark a run as failed.
    pub async fn finish_run_failure(&self, run_id: &str, error: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE runs SET status = ?1, finished_at = ?2, error = ?3 WHERE run_id = ?4",
                params![RunStatus::Failed.as_str(), now_rfc3339(), error, run_id],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Record one stage invocation attempt.
    pub async fn record_stage(&self, run_id: &str, stage: &StageRunRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO stage_runs (run_id, stage, attempt, cache_hit, duration_ms, error, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    run_id,
                    stage.stage.as_str(),
                    i64::from(stage.attempt),
                    i64::from(stage.cache_hit),
                    stage.duration_ms as i64,
                    stage.error.as_deref(),
                    now_rfc3339()
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Get one run (without stage rows).
    pub async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT run_id, bid_id, started_at, finished_at, status, decision, fit_score,
                        report_json_path, report_md_path, error
                 FROM runs WHERE run_id = ?1",
                params![run_id],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(Some(run_from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// List runs, newest first, optionally filtered by bid, with their stage rows.
    pub async fn list_runs(&self, bid_id: Option<&str>) -> Result<Vec<RunRecord>> {
        let sql = "SELECT run_id, bid_id, started_at, finished_at, status, decision, fit_score,
                          report_json_path, report_md_path, error
                   FROM runs WHERE (?1 IS NULL OR bid_id = ?1)
                   ORDER BY run_id DESC";
        let mut rows = self
            .conn
            .query(sql, params![bid_id])
            .await
            .map_err(storage_err)?;

        let mut runs = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            runs.push(run_from_row(&row)?);
        }
        for run in &mut runs {
            run.stages = self.stage_runs(&run.run_id).await?;
        }
        Ok(runs)
    }

    /// Stage rows for one run, in recording order.
    pub async fn stage_runs(&self, run_id: &str) -> Result<Vec<StageRunRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT stage, attempt, cache_hit, duration_ms, error
                 FROM stage_runs WHERE run_id = ?1 ORDER BY id",
                params![run_id],
            )
            .await
            .map_err(storage_err)?;

        let mut stages = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            stages.push(StageRunRecord {
                stage: row.get::<String>(0).map_err(storage_err)?,
                attempt: row.get::<u32>(1).map_err(storage_err)?,
                cache_hit: row.get::<i64>(2).map_err(storage_err)? != 0,
                duration_ms: row.get::<i64>(3).map_err(storage_err)?.max(0) as u64,
                error: row.get::<Option<String>>(4).map_err(storage_err)?,
            });
        }
        Ok(stages)
    }
}

fn run_from_row(row: &Row) -> Result<RunRecord> {
    Ok(RunRecord {
        run_id: row.get::<String>(0).map_err(storage_err)?,
        bid_id: row.get::<String>(1).map_err(storage_err)?,
        started_at: row.get::<String>(2).map_err(storage_err)?,
        finished_at: row.get::<Option<String>>(3).map_err(storage_err)?,
        status: RunStatus::parse(&row.get::<String>(4).map_err(storage_err)?)?,
        decision: row.get::<Option<String>>(5).map_err(storage_err)?,
        fit_score: row.get::<Option<f64>>(6).map_err(storage_err)?,
        report_json_path: row.get::<Option<String>>(7).map_err(storage_err)?,
        report_md_path: row.get::<Option<String>>(8).map_err(storage_err)?,
        error: row.get::<Option<String>>(9).map_err(storage_err)?,
        stages: Vec::new(),
    })
}
