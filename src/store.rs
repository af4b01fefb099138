// src/store.rs
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domain::{ExecutionRecord, ExecutionStatus, JobDefinition};

/// Read-only access to stored job definitions. The CRUD collaborator owns
/// writes; the engine only loads.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn find_active(&self) -> Result<Vec<JobDefinition>>;
    async fn find_by_id(&self, id: i64) -> Result<Option<JobDefinition>>;
}

/// Append/update access to execution history. Written exclusively by the
/// runner; read-only to the dashboard collaborator. Concurrent writers never
/// collide: every record gets its own id.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Persist a fresh STARTED record and return it with its assigned id.
    async fn create(
        &self,
        job_id: Option<i64>,
        job_name: &str,
        start_time: DateTime<Utc>,
        message: &str,
    ) -> Result<ExecutionRecord>;

    /// Persist the terminal state of a record previously created here.
    async fn finalize(&self, record: &ExecutionRecord) -> Result<()>;

    async fn recent(&self, limit: i64) -> Result<Vec<ExecutionRecord>>;
    async fn for_job(&self, job_id: i64) -> Result<Vec<ExecutionRecord>>;
}

// ---------------------------------------------------------
// Postgres-backed stores
// ---------------------------------------------------------

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: i64,
    job_name: String,
    cron_expression: String,
    target_db_name: String,
    sql_query: String,
    description: Option<String>,
    active: bool,
}

impl From<JobRow> for JobDefinition {
    fn from(r: JobRow) -> Self {
        JobDefinition {
            id: r.id,
            job_name: r.job_name,
            cron_expression: r.cron_expression,
            target_db_name: r.target_db_name,
            sql_query: r.sql_query,
            description: r.description,
            active: r.active,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct HistoryRow {
    id: i64,
    scheduled_job_id: Option<i64>,
    job_name: String,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    status: String,
    message: Option<String>,
    duration_ms: Option<i64>,
}

impl TryFrom<HistoryRow> for ExecutionRecord {
    type Error = anyhow::Error;

    fn try_from(r: HistoryRow) -> Result<Self> {
        let status = ExecutionStatus::parse(&r.status)
            .ok_or_else(|| anyhow!("unknown execution status '{}' in row {}", r.status, r.id))?;
        Ok(ExecutionRecord {
            id: r.id,
            scheduled_job_id: r.scheduled_job_id,
            job_name: r.job_name,
            start_time: r.start_time,
            end_time: r.end_time,
            status,
            message: r.message,
            duration_ms: r.duration_ms,
        })
    }
}

pub struct SqlJobStore {
    pool: PgPool,
}

impl SqlJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for SqlJobStore {
    async fn find_active(&self) -> Result<Vec<JobDefinition>> {
        let rows = sqlx::query_as::<_, JobRow>(
            "SELECT id, job_name, cron_expression, target_db_name, sql_query, description, active \
             FROM scheduled_jobs WHERE active = TRUE",
        )
        .fetch_all(&self.pool)
        .await
        .context("loading active jobs")?;
        Ok(rows.into_iter().map(JobDefinition::from).collect())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<JobDefinition>> {
        let row = sqlx::query_as::<_, JobRow>(
            "SELECT id, job_name, cron_expression, target_db_name, sql_query, description, active \
             FROM scheduled_jobs WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("loading job {id}"))?;
        Ok(row.map(JobDefinition::from))
    }
}

pub struct SqlHistoryStore {
    pool: PgPool,
}

impl SqlHistoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HistoryStore for SqlHistoryStore {
    async fn create(
        &self,
        job_id: Option<i64>,
        job_name: &str,
        start_time: DateTime<Utc>,
        message: &str,
    ) -> Result<ExecutionRecord> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO execution_history \
             (scheduled_job_id, job_name, start_time, status, message) \
             VALUES ($1, $2, $3, $4, $5) RETURNING id",
        )
        .bind(job_id)
        .bind(job_name)
        .bind(start_time)
        .bind(ExecutionStatus::Started.as_str())
        .bind(message)
        .fetch_one(&self.pool)
        .await
        .context("inserting STARTED execution record")?;

        Ok(ExecutionRecord {
            id,
            scheduled_job_id: job_id,
            job_name: job_name.to_string(),
            start_time,
            end_time: None,
            status: ExecutionStatus::Started,
            message: Some(message.to_string()),
            duration_ms: None,
        })
    }

    async fn finalize(&self, record: &ExecutionRecord) -> Result<()> {
        sqlx::query(
            "UPDATE execution_history \
             SET end_time = $2, status = $3, message = $4, duration_ms = $5 \
             WHERE id = $1",
        )
        .bind(record.id)
        .bind(record.end_time)
        .bind(record.status.as_str())
        .bind(&record.message)
        .bind(record.duration_ms)
        .execute(&self.pool)
        .await
        .with_context(|| format!("finalizing execution record {}", record.id))?;
        Ok(())
    }

    async fn recent(&self, limit: i64) -> Result<Vec<ExecutionRecord>> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            "SELECT id, scheduled_job_id, job_name, start_time, end_time, status, message, duration_ms \
             FROM execution_history ORDER BY start_time DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("loading recent history")?;
        rows.into_iter().map(ExecutionRecord::try_from).collect()
    }

    async fn for_job(&self, job_id: i64) -> Result<Vec<ExecutionRecord>> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            "SELECT id, scheduled_job_id, job_name, start_time, end_time, status, message, duration_ms \
             FROM execution_history WHERE scheduled_job_id = $1 ORDER BY start_time DESC",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("loading history for job {job_id}"))?;
        rows.into_iter().map(ExecutionRecord::try_from).collect()
    }
}
