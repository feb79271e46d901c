//! SQLite-based run store

use crate::core::state::{AuditEntry, FailureKind, PipelineRun, RunStatus, StageResult};
use crate::persistence::{RunStatistics, RunStore, RunSummary};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;

/// SQLite run store
pub struct SqliteRunStore {
    pool: SqlitePool,
}

impl SqliteRunStore {
    /// Open (or create) a store at `db_path`
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!(
            "sqlite:{}",
            db_path.as_ref().display()
        ))?
        .create_if_missing(true);

        let pool = SqlitePool::connect_with(options)
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Default database location under the user data directory
    pub fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vedops")
            .join("runs.db")
    }

    /// Create store with default path
    pub async fn with_default_path() -> Result<Self> {
        let db_path = Self::default_path();
        if let Some(dir) = db_path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        Self::new(db_path).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pipeline_runs (
                id TEXT PRIMARY KEY,
                pipeline_name TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                started_at TEXT,
                finished_at TEXT,
                error TEXT,
                progress REAL NOT NULL DEFAULT 0.0,
                config TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS stage_results (
                run_id TEXT NOT NULL REFERENCES pipeline_runs(id) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                stage TEXT NOT NULL,
                role TEXT NOT NULL,
                status TEXT NOT NULL,
                output TEXT,
                error TEXT,
                error_kind TEXT,
                attempts INTEGER NOT NULL DEFAULT 0,
                retries INTEGER NOT NULL DEFAULT 0,
                started_at TEXT,
                finished_at TEXT,
                duration_ms INTEGER,
                PRIMARY KEY (run_id, stage)
            );

            CREATE TABLE IF NOT EXISTS audit_log (
                run_id TEXT NOT NULL REFERENCES pipeline_runs(id) ON DELETE CASCADE,
                seq INTEGER NOT NULL,
                stage TEXT NOT NULL,
                status TEXT NOT NULL,
                attempts INTEGER NOT NULL,
                message TEXT,
                recorded_at TEXT NOT NULL,
                PRIMARY KEY (run_id, seq)
            );

            CREATE INDEX IF NOT EXISTS idx_runs_pipeline_name ON pipeline_runs(pipeline_name);
            CREATE INDEX IF NOT EXISTS idx_runs_created_at ON pipeline_runs(created_at);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Convert DateTime<Utc> to NaiveDateTime for SQLite
    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    /// Convert NaiveDateTime to DateTime<Utc>
    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    fn optional_time(row: &SqliteRow, column: &str) -> Option<DateTime<Utc>> {
        row.get::<Option<NaiveDateTime>, _>(column).map(Self::from_naive)
    }

    fn stage_from_row(row: &SqliteRow) -> Result<StageResult> {
        let output = row
            .get::<Option<String>, _>("output")
            .map(|json| serde_json::from_str(&json))
            .transpose()
            .context("Corrupt stage output")?;
        let error_kind = row
            .get::<Option<String>, _>("error_kind")
            .map(|kind| kind.parse::<FailureKind>())
            .transpose()?;

        Ok(StageResult {
            stage: row.get("stage"),
            role: row.get("role"),
            status: row.get::<String, _>("status").parse()?,
            output,
            error: row.get("error"),
            error_kind,
            attempts: row.get::<i64, _>("attempts") as u32,
            retries: row.get::<i64, _>("retries") as u32,
            started_at: Self::optional_time(row, "started_at"),
            finished_at: Self::optional_time(row, "finished_at"),
            duration_ms: row.get::<Option<i64>, _>("duration_ms").map(|d| d as u64),
        })
    }

    fn summary_from_row(row: &SqliteRow) -> Result<RunSummary> {
        Ok(RunSummary {
            run_id: Uuid::parse_str(&row.get::<String, _>("id"))?,
            pipeline_name: row.get("pipeline_name"),
            status: row.get::<String, _>("status").parse::<RunStatus>()?,
            created_at: Self::from_naive(row.get("created_at")),
            finished_at: Self::optional_time(row, "finished_at"),
            progress: row.get("progress"),
            succeeded_stages: row.get::<i64, _>("succeeded_stages") as usize,
            failed_stages: row.get::<i64, _>("failed_stages") as usize,
            total_stages: row.get::<i64, _>("total_stages") as usize,
            error: row.get("error"),
        })
    }
}

#[async_trait::async_trait]
impl RunStore for SqliteRunStore {
    async fn save(&self, run: &PipelineRun) -> Result<()> {
        let run_id = run.id.to_string();
        let config = serde_json::to_string(&run.config).context("Failed to serialize config")?;

        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        sqlx::query(
            r#"
            INSERT INTO pipeline_runs
            (id, pipeline_name, status, created_at, started_at, finished_at, error, progress, config)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                started_at = excluded.started_at,
                finished_at = excluded.finished_at,
                error = excluded.error,
                progress = excluded.progress
            "#,
        )
        .bind(&run_id)
        .bind(&run.pipeline_name)
        .bind(run.status.as_str())
        .bind(Self::to_naive(run.created_at))
        .bind(run.started_at.map(Self::to_naive))
        .bind(run.finished_at.map(Self::to_naive))
        .bind(&run.error)
        .bind(run.progress())
        .bind(config)
        .execute(&mut *tx)
        .await
        .context("Failed to save run")?;

        for (position, stage) in run.stages.iter().enumerate() {
            let output = stage
                .output
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;

            sqlx::query(
                r#"
                INSERT OR REPLACE INTO stage_results
                (run_id, position, stage, role, status, output, error, error_kind,
                 attempts, retries, started_at, finished_at, duration_ms)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                "#,
            )
            .bind(&run_id)
            .bind(position as i64)
            .bind(&stage.stage)
            .bind(&stage.role)
            .bind(stage.status.as_str())
            .bind(output)
            .bind(&stage.error)
            .bind(stage.error_kind.map(|k| k.as_str()))
            .bind(stage.attempts as i64)
            .bind(stage.retries as i64)
            .bind(stage.started_at.map(Self::to_naive))
            .bind(stage.finished_at.map(Self::to_naive))
            .bind(stage.duration_ms.map(|d| d as i64))
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to save stage '{}'", stage.stage))?;
        }

        // Audit entries are append-only
        for (seq, entry) in run.audit.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO audit_log
                (run_id, seq, stage, status, attempts, message, recorded_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(&run_id)
            .bind(seq as i64)
            .bind(&entry.stage)
            .bind(entry.status.as_str())
            .bind(entry.attempts as i64)
            .bind(&entry.message)
            .bind(Self::to_naive(entry.recorded_at))
            .execute(&mut *tx)
            .await
            .context("Failed to append audit entry")?;
        }

        tx.commit().await.context("Failed to commit run")?;

        Ok(())
    }

    async fn load(&self, run_id: Uuid) -> Result<Option<PipelineRun>> {
        let id = run_id.to_string();

        let Some(row) = sqlx::query(
            r#"
            SELECT id, pipeline_name, status, created_at, started_at, finished_at, error, config
            FROM pipeline_runs
            WHERE id = ?1
            "#,
        )
        .bind(&id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load run")?
        else {
            return Ok(None);
        };

        let stage_rows = sqlx::query(
            r#"
            SELECT stage, role, status, output, error, error_kind, attempts, retries,
                   started_at, finished_at, duration_ms
            FROM stage_results
            WHERE run_id = ?1
            ORDER BY position ASC
            "#,
        )
        .bind(&id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load stage results")?;

        let audit_rows = sqlx::query(
            r#"
            SELECT stage, status, attempts, message, recorded_at
            FROM audit_log
            WHERE run_id = ?1
            ORDER BY seq ASC
            "#,
        )
        .bind(&id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load audit log")?;

        let stages = stage_rows
            .iter()
            .map(Self::stage_from_row)
            .collect::<Result<Vec<_>>>()?;

        let audit = audit_rows
            .iter()
            .map(|row| -> Result<AuditEntry> {
                Ok(AuditEntry {
                    stage: row.get("stage"),
                    status: row.get::<String, _>("status").parse()?,
                    attempts: row.get::<i64, _>("attempts") as u32,
                    message: row.get("message"),
                    recorded_at: Self::from_naive(row.get("recorded_at")),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(PipelineRun {
            id: Uuid::parse_str(&row.get::<String, _>("id"))?,
            pipeline_name: row.get("pipeline_name"),
            config: serde_json::from_str(&row.get::<String, _>("config"))
                .context("Corrupt run config")?,
            stages,
            status: row.get::<String, _>("status").parse()?,
            created_at: Self::from_naive(row.get("created_at")),
            started_at: Self::optional_time(&row, "started_at"),
            finished_at: Self::optional_time(&row, "finished_at"),
            error: row.get("error"),
            audit,
        }))
    }

    async fn list(&self, pipeline: Option<&str>, limit: usize) -> Result<Vec<RunSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT r.id, r.pipeline_name, r.status, r.created_at, r.finished_at, r.error, r.progress,
                   COUNT(s.stage) AS total_stages,
                   COALESCE(SUM(CASE WHEN s.status = 'succeeded' THEN 1 ELSE 0 END), 0) AS succeeded_stages,
                   COALESCE(SUM(CASE WHEN s.status = 'failed' THEN 1 ELSE 0 END), 0) AS failed_stages
            FROM pipeline_runs r
            LEFT JOIN stage_results s ON s.run_id = r.id
            WHERE ?1 IS NULL OR r.pipeline_name = ?1
            GROUP BY r.id
            ORDER BY r.created_at DESC
            LIMIT ?2
            "#,
        )
        .bind(pipeline)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list runs")?;

        rows.iter().map(Self::summary_from_row).collect()
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT pipeline_name
            FROM pipeline_runs
            ORDER BY pipeline_name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list pipelines")?;

        Ok(rows.iter().map(|row| row.get("pipeline_name")).collect())
    }

    async fn statistics(
        &self,
        pipeline: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<RunStatistics> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total_runs,
                   COALESCE(SUM(CASE WHEN status = 'succeeded' THEN 1 ELSE 0 END), 0) AS succeeded_runs,
                   COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0) AS failed_runs,
                   COALESCE(SUM(CASE WHEN status = 'cancelled' THEN 1 ELSE 0 END), 0) AS cancelled_runs,
                   AVG(duration_ms) AS avg_duration_ms,
                   MIN(duration_ms) AS min_duration_ms,
                   MAX(duration_ms) AS max_duration_ms
            FROM (
                SELECT status,
                       CASE WHEN started_at IS NOT NULL AND finished_at IS NOT NULL
                            THEN (julianday(finished_at) - julianday(started_at)) * 86400000.0
                       END AS duration_ms
                FROM pipeline_runs
                WHERE (?1 IS NULL OR pipeline_name = ?1)
                  AND (?2 IS NULL OR created_at >= ?2)
            )
            "#,
        )
        .bind(pipeline)
        .bind(since.map(Self::to_naive))
        .fetch_one(&self.pool)
        .await
        .context("Failed to compute run statistics")?;

        let millis = |column: &str| {
            row.get::<Option<f64>, _>(column)
                .map(|ms| ms.max(0.0).round() as u64)
        };

        Ok(RunStatistics {
            total_runs: row.get::<i64, _>("total_runs") as usize,
            succeeded_runs: row.get::<i64, _>("succeeded_runs") as usize,
            failed_runs: row.get::<i64, _>("failed_runs") as usize,
            cancelled_runs: row.get::<i64, _>("cancelled_runs") as usize,
            avg_duration_ms: row.get("avg_duration_ms"),
            min_duration_ms: millis("min_duration_ms"),
            max_duration_ms: millis("max_duration_ms"),
        })
    }
}
