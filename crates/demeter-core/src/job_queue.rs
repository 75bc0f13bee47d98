use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::HarvestError;
use crate::job::{CreateHarvestJobRequest, HarvestJob, JobStatus};

/// Persistent queue of harvest jobs.
///
/// Implementations must support atomic claiming via `SELECT FOR UPDATE SKIP LOCKED`
/// or equivalent to prevent multiple workers from claiming the same job.
pub trait JobQueue: Send + Sync + Clone {
    fn create_job(
        &self,
        request: CreateHarvestJobRequest,
    ) -> impl Future<Output = Result<HarvestJob, HarvestError>> + Send;

    /// Atomically claim the next pending job on `queue_name`.
    ///
    /// Returns `None` if no jobs are available.
    fn claim_job(
        &self,
        worker_id: &str,
        queue_name: &str,
    ) -> impl Future<Output = Result<Option<HarvestJob>, HarvestError>> + Send;

    fn complete_job(
        &self,
        job_id: Uuid,
        record_count: u64,
    ) -> impl Future<Output = Result<(), HarvestError>> + Send;

    /// Mark a job as failed. If `next_retry_at` is provided, the job is
    /// reset to `pending` for retry; otherwise it is marked as permanently `failed`.
    fn fail_job(
        &self,
        job_id: Uuid,
        error: &str,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> impl Future<Output = Result<(), HarvestError>> + Send;

    fn cancel_job(&self, job_id: Uuid) -> impl Future<Output = Result<(), HarvestError>> + Send;

    fn get_job(
        &self,
        job_id: Uuid,
    ) -> impl Future<Output = Result<Option<HarvestJob>, HarvestError>> + Send;

    fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<HarvestJob>, HarvestError>> + Send;

    /// Release all jobs held by a specific worker (for graceful shutdown).
    fn release_worker_jobs(
        &self,
        worker_id: &str,
    ) -> impl Future<Output = Result<u64, HarvestError>> + Send;

    fn count_by_status(
        &self,
        status: JobStatus,
    ) -> impl Future<Output = Result<i64, HarvestError>> + Send;

    /// Liveness probe of the queue backend.
    fn ping(&self) -> impl Future<Output = Result<(), HarvestError>> + Send;
}
