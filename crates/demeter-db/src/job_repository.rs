use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use demeter_core::error::HarvestError;
use demeter_core::job::{CreateHarvestJobRequest, HarvestJob, JobStatus};
use demeter_core::job_queue::JobQueue;

fn db_err(e: sqlx::Error) -> HarvestError {
    HarvestError::Database(e.to_string())
}

/// PostgreSQL-backed job queue using `SELECT FOR UPDATE SKIP LOCKED`.
///
/// Jobs are claimed per named queue; a worker only sees jobs whose
/// `queue_name` matches its own.
#[derive(Clone)]
pub struct HarvestJobRepository {
    pool: Pool<Postgres>,
}

impl HarvestJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct HarvestJobRow {
    id: Uuid,
    operator: String,
    collection_url: String,
    queue_name: String,
    job_timeout_secs: i64,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    retry_count: i32,
    max_retries: i32,
    next_retry_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    record_count: Option<i64>,
    worker_id: Option<String>,
}

impl From<HarvestJobRow> for HarvestJob {
    fn from(row: HarvestJobRow) -> Self {
        HarvestJob {
            id: row.id,
            operator: row.operator,
            collection_url: row.collection_url,
            queue_name: row.queue_name,
            job_timeout_secs: row.job_timeout_secs.max(1) as u64,
            status: row.status.parse().unwrap_or(JobStatus::Pending),
            created_at: row.created_at,
            updated_at: row.updated_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            retry_count: row.retry_count as u32,
            max_retries: row.max_retries as u32,
            next_retry_at: row.next_retry_at,
            error_message: row.error_message,
            record_count: row.record_count.map(|n| n as u64),
            worker_id: row.worker_id,
        }
    }
}

impl JobQueue for HarvestJobRepository {
    async fn create_job(&self, request: CreateHarvestJobRequest) -> Result<HarvestJob, HarvestError> {
        let row = sqlx::query_as::<_, HarvestJobRow>(
            r#"
            INSERT INTO harvest_jobs (operator, collection_url, queue_name, job_timeout_secs, max_retries)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(&request.operator)
        .bind(&request.collection_url)
        .bind(&request.flags.queue_name)
        .bind(request.flags.job_timeout.as_secs().max(1) as i64)
        .bind(request.max_retries.unwrap_or(3) as i32)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.into())
    }

    async fn claim_job(
        &self,
        worker_id: &str,
        queue_name: &str,
    ) -> Result<Option<HarvestJob>, HarvestError> {
        let row = sqlx::query_as::<_, HarvestJobRow>(
            r#"
            UPDATE harvest_jobs
            SET status = 'running', worker_id = $1, started_at = NOW(), updated_at = NOW()
            WHERE id = (
                SELECT id FROM harvest_jobs
                WHERE status = 'pending'
                  AND queue_name = $2
                  AND (next_retry_at IS NULL OR next_retry_at <= NOW())
                ORDER BY next_retry_at NULLS FIRST, created_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(worker_id)
        .bind(queue_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(Into::into))
    }

    async fn complete_job(&self, job_id: Uuid, record_count: u64) -> Result<(), HarvestError> {
        sqlx::query(
            r#"
            UPDATE harvest_jobs
            SET status = 'completed', completed_at = NOW(), updated_at = NOW(),
                record_count = $2, error_message = NULL, worker_id = NULL
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(record_count as i64)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn fail_job(
        &self,
        job_id: Uuid,
        error: &str,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), HarvestError> {
        sqlx::query(
            r#"
            UPDATE harvest_jobs
            SET
                status = CASE WHEN $3::timestamptz IS NOT NULL THEN 'pending' ELSE 'failed' END,
                retry_count = CASE WHEN $3::timestamptz IS NOT NULL THEN retry_count + 1 ELSE retry_count END,
                completed_at = CASE WHEN $3::timestamptz IS NOT NULL THEN NULL ELSE NOW() END,
                next_retry_at = $3,
                error_message = $2,
                updated_at = NOW(),
                worker_id = NULL,
                started_at = CASE WHEN $3::timestamptz IS NOT NULL THEN NULL ELSE started_at END
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(error)
        .bind(next_retry_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn cancel_job(&self, job_id: Uuid) -> Result<(), HarvestError> {
        sqlx::query(
            r#"
            UPDATE harvest_jobs
            SET status = 'cancelled', updated_at = NOW(), worker_id = NULL
            WHERE id = $1 AND status NOT IN ('completed', 'cancelled')
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<HarvestJob>, HarvestError> {
        let row = sqlx::query_as::<_, HarvestJobRow>(r#"SELECT * FROM harvest_jobs WHERE id = $1"#)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(row.map(Into::into))
    }

    async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<HarvestJob>, HarvestError> {
        let rows = sqlx::query_as::<_, HarvestJobRow>(
            r#"
            SELECT * FROM harvest_jobs
            WHERE ($1::varchar IS NULL OR status = $1)
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(status.map(|s| s.as_str()))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn release_worker_jobs(&self, worker_id: &str) -> Result<u64, HarvestError> {
        let result = sqlx::query(
            r#"
            UPDATE harvest_jobs
            SET status = 'pending', worker_id = NULL, started_at = NULL, updated_at = NOW()
            WHERE worker_id = $1 AND status = 'running'
            "#,
        )
        .bind(worker_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected())
    }

    async fn count_by_status(&self, status: JobStatus) -> Result<i64, HarvestError> {
        let (count,): (i64,) =
            sqlx::query_as(r#"SELECT COUNT(*) FROM harvest_jobs WHERE status = $1"#)
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)?;

        Ok(count)
    }

    async fn ping(&self) -> Result<(), HarvestError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| HarvestError::QueueUnavailable(e.to_string()))?;
        Ok(())
    }
}
