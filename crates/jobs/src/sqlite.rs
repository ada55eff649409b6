//! SQLite job backend.
//!
//! One table, `jobs`, with an integer `seq` preserving insertion order.
//! Timestamps are stored as integer microseconds since the epoch so that
//! ordering and age comparisons happen in SQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use skein_core::error::JobError;
use skein_core::job::{Job, JobBackend, JobStatus, PruneCriteria, PruneRequest};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

/// A durable job backend on a single SQLite file.
pub struct SqliteJobBackend {
    pool: SqlitePool,
}

impl SqliteJobBackend {
    /// Open (or create) the database at `path`.
    ///
    /// Pass `":memory:"` for an ephemeral database; it is limited to one
    /// connection so every query sees the same data.
    pub async fn new(path: &str) -> Result<Self, JobError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| JobError::Unavailable(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let max_connections = if path.contains(":memory:") { 1 } else { 4 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| JobError::Unavailable(format!("Failed to open SQLite: {e}")))?;

        let backend = Self { pool };
        backend.run_migrations().await?;
        info!("SQLite job backend initialized at {path}");
        Ok(backend)
    }

    /// Create from an existing pool.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, JobError> {
        let backend = Self { pool };
        backend.run_migrations().await?;
        Ok(backend)
    }

    async fn run_migrations(&self) -> Result<(), JobError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                seq          INTEGER PRIMARY KEY AUTOINCREMENT,
                id           TEXT UNIQUE NOT NULL,
                title        TEXT NOT NULL,
                description  TEXT,
                priority     INTEGER NOT NULL DEFAULT 0,
                status       TEXT NOT NULL,
                created_at   INTEGER NOT NULL,
                updated_at   INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| JobError::Unavailable(format!("jobs table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_jobs_claim ON jobs(status, priority DESC, created_at ASC)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| JobError::Unavailable(format!("claim index: {e}")))?;

        debug!("SQLite job migrations complete");
        Ok(())
    }

    fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> Result<Job, JobError> {
        let column = |name: &str, e: sqlx::Error| JobError::Unavailable(format!("{name} column: {e}"));

        let id: String = row.try_get("id").map_err(|e| column("id", e))?;
        let title: String = row.try_get("title").map_err(|e| column("title", e))?;
        let description: Option<String> =
            row.try_get("description").map_err(|e| column("description", e))?;
        let priority: i64 = row.try_get("priority").map_err(|e| column("priority", e))?;
        let status: String = row.try_get("status").map_err(|e| column("status", e))?;
        let created_at: i64 = row.try_get("created_at").map_err(|e| column("created_at", e))?;
        let updated_at: i64 = row.try_get("updated_at").map_err(|e| column("updated_at", e))?;

        Ok(Job {
            status: JobStatus::from_str(&status)
                .map_err(|_| JobError::Unavailable(format!("job {id} has unknown status '{status}'")))?,
            created_at: from_micros(&id, created_at)?,
            updated_at: from_micros(&id, updated_at)?,
            id,
            title,
            description,
            priority,
        })
    }
}

fn from_micros(id: &str, micros: i64) -> Result<DateTime<Utc>, JobError> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| JobError::Unavailable(format!("job {id} has an out-of-range timestamp")))
}

#[async_trait]
impl JobBackend for SqliteJobBackend {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn insert(&self, job: &Job) -> Result<(), JobError> {
        sqlx::query(
            r#"
            INSERT INTO jobs (id, title, description, priority, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&job.id)
        .bind(&job.title)
        .bind(&job.description)
        .bind(job.priority)
        .bind(job.status.as_str())
        .bind(job.created_at.timestamp_micros())
        .bind(job.updated_at.timestamp_micros())
        .execute(&self.pool)
        .await
        .map_err(|e| JobError::Unavailable(format!("INSERT failed: {e}")))?;

        debug!(job_id = %job.id, "Inserted job");
        Ok(())
    }

    async fn replace(&self, job: &Job, expected: JobStatus) -> Result<bool, JobError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET title = ?2, description = ?3, priority = ?4, status = ?5, updated_at = ?6
            WHERE id = ?1 AND status = ?7
            "#,
        )
        .bind(&job.id)
        .bind(&job.title)
        .bind(&job.description)
        .bind(job.priority)
        .bind(job.status.as_str())
        .bind(job.updated_at.timestamp_micros())
        .bind(expected.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| JobError::Unavailable(format!("UPDATE failed: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: &str) -> Result<bool, JobError> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| JobError::Unavailable(format!("DELETE failed: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, id: &str) -> Result<Option<Job>, JobError> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| JobError::Unavailable(format!("SELECT failed: {e}")))?;

        row.as_ref().map(Self::row_to_job).transpose()
    }

    async fn list_all(&self) -> Result<Vec<Job>, JobError> {
        let rows = sqlx::query("SELECT * FROM jobs ORDER BY seq ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| JobError::Unavailable(format!("List failed: {e}")))?;

        rows.iter().map(Self::row_to_job).collect()
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Job>, JobError> {
        // Select and transition in one statement so two claimers can never
        // observe the same pending row.
        let row = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'in_progress', updated_at = ?1
            WHERE id = (
                SELECT id FROM jobs
                WHERE status = 'pending'
                ORDER BY priority DESC, created_at ASC, seq ASC
                LIMIT 1
            )
            AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(now.timestamp_micros())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| JobError::Unavailable(format!("Claim failed: {e}")))?;

        row.as_ref().map(Self::row_to_job).transpose()
    }

    async fn prune(&self, request: &PruneRequest, now: DateTime<Utc>) -> Result<Vec<String>, JobError> {
        let verb = if request.dry_run { "SELECT id FROM jobs" } else { "DELETE FROM jobs" };
        let returning = if request.dry_run { "" } else { "RETURNING id" };

        let rows = match &request.criteria {
            PruneCriteria::OlderThanDays(days) => {
                let cutoff = PruneRequest::cutoff(now, *days)?;
                let sql = format!(
                    "{verb} WHERE status != 'in_progress' AND updated_at < ?1 {returning}"
                );
                sqlx::query(&sql)
                    .bind(cutoff.timestamp_micros())
                    .fetch_all(&self.pool)
                    .await
            }
            PruneCriteria::Query(text) => {
                let sql = format!(
                    "{verb} WHERE status != 'in_progress' \
                     AND (instr(lower(title), ?1) > 0 OR instr(lower(coalesce(description, '')), ?1) > 0) \
                     {returning}"
                );
                sqlx::query(&sql)
                    .bind(text.to_ascii_lowercase())
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(|e| JobError::Unavailable(format!("Prune failed: {e}")))?;

        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("id")
                    .map_err(|e| JobError::Unavailable(format!("id column: {e}")))
            })
            .collect()
    }
}
