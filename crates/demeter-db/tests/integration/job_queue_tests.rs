use std::time::Duration;

use demeter_core::job::{CreateHarvestJobRequest, JobStatus, RunFlags};
use demeter_core::job_queue::JobQueue;
use demeter_db::HarvestJobRepository;

use crate::integration::common::setup_test_db;

fn test_request() -> CreateHarvestJobRequest {
    request_on("default")
}

fn request_on(queue: &str) -> CreateHarvestJobRequest {
    CreateHarvestJobRequest::new(
        "ops@example.edu",
        "https://registry.example.org/api/v1/collection/26/",
        RunFlags::new(queue, Duration::from_secs(3600)),
    )
}

#[tokio::test]
async fn create_job_and_verify_fields() {
    let (pool, _container) = setup_test_db().await;
    let repo = HarvestJobRepository::new(pool);

    let job = repo.create_job(test_request()).await.unwrap();

    assert_eq!(job.operator, "ops@example.edu");
    assert_eq!(job.collection_url, "https://registry.example.org/api/v1/collection/26/");
    assert_eq!(job.queue_name, "default");
    assert_eq!(job.job_timeout_secs, 3600);
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.retry_count, 0);
    assert_eq!(job.max_retries, 3);
    assert!(job.record_count.is_none());
    assert!(job.worker_id.is_none());
}

#[tokio::test]
async fn create_job_with_custom_max_retries() {
    let (pool, _container) = setup_test_db().await;
    let repo = HarvestJobRepository::new(pool);

    let job = repo.create_job(test_request().with_max_retries(10)).await.unwrap();

    assert_eq!(job.max_retries, 10);
}

#[tokio::test]
async fn claim_job_sets_running_and_worker() {
    let (pool, _container) = setup_test_db().await;
    let repo = HarvestJobRepository::new(pool);

    repo.create_job(test_request()).await.unwrap();

    let claimed = repo
        .claim_job("worker-1", "default")
        .await
        .unwrap()
        .expect("Should claim the job");

    assert_eq!(claimed.status, JobStatus::Running);
    assert_eq!(claimed.worker_id.as_deref(), Some("worker-1"));
    assert!(claimed.started_at.is_some());
}

#[tokio::test]
async fn claim_job_is_scoped_to_queue() {
    let (pool, _container) = setup_test_db().await;
    let repo = HarvestJobRepository::new(pool);

    repo.create_job(request_on("harvest-long")).await.unwrap();

    assert!(repo.claim_job("worker-1", "default").await.unwrap().is_none());

    let claimed = repo.claim_job("worker-2", "harvest-long").await.unwrap();
    assert_eq!(claimed.unwrap().queue_name, "harvest-long");
}

#[tokio::test]
async fn claim_job_skips_running_jobs() {
    let (pool, _container) = setup_test_db().await;
    let repo = HarvestJobRepository::new(pool);

    repo.create_job(test_request()).await.unwrap();

    assert!(repo.claim_job("worker-1", "default").await.unwrap().is_some());
    assert!(repo.claim_job("worker-2", "default").await.unwrap().is_none());
}

#[tokio::test]
async fn concurrent_claims_never_share_a_job() {
    let (pool, _container) = setup_test_db().await;
    let repo = HarvestJobRepository::new(pool);

    for _ in 0..4 {
        repo.create_job(test_request()).await.unwrap();
    }

    let claims = (0..8).map(|i| {
        let repo = repo.clone();
        tokio::spawn(async move { repo.claim_job(&format!("worker-{i}"), "default").await })
    });
    let mut ids = Vec::new();
    for handle in claims {
        if let Some(job) = handle.await.unwrap().unwrap() {
            ids.push(job.id);
        }
    }

    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 4);
}

#[tokio::test]
async fn complete_job_records_count() {
    let (pool, _container) = setup_test_db().await;
    let repo = HarvestJobRepository::new(pool);

    let job = repo.create_job(test_request()).await.unwrap();
    repo.claim_job("worker-1", "default").await.unwrap();

    repo.complete_job(job.id, 128).await.unwrap();

    let updated = repo.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(updated.status, JobStatus::Completed);
    assert_eq!(updated.record_count, Some(128));
    assert!(updated.completed_at.is_some());
    assert!(updated.worker_id.is_none());
}

#[tokio::test]
async fn fail_job_with_retry_resets_to_pending() {
    let (pool, _container) = setup_test_db().await;
    let repo = HarvestJobRepository::new(pool);

    let job = repo.create_job(test_request()).await.unwrap();
    repo.claim_job("worker-1", "default").await.unwrap();

    let next_retry = chrono::Utc::now() + chrono::TimeDelta::minutes(5);
    repo.fail_job(job.id, "HTTP 503", Some(next_retry))
        .await
        .unwrap();

    let updated = repo.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(updated.status, JobStatus::Pending);
    assert_eq!(updated.retry_count, 1);
    assert!(updated.next_retry_at.is_some());
    assert_eq!(updated.error_message.as_deref(), Some("HTTP 503"));
    assert!(updated.worker_id.is_none());

    // Not claimable before its retry time.
    assert!(repo.claim_job("worker-2", "default").await.unwrap().is_none());
}

#[tokio::test]
async fn fail_job_without_retry_marks_failed() {
    let (pool, _container) = setup_test_db().await;
    let repo = HarvestJobRepository::new(pool);

    let job = repo.create_job(test_request()).await.unwrap();
    repo.claim_job("worker-1", "default").await.unwrap();

    repo.fail_job(job.id, "Integrity error", None).await.unwrap();

    let updated = repo.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(updated.status, JobStatus::Failed);
    assert_eq!(updated.retry_count, 0);
    assert_eq!(updated.error_message.as_deref(), Some("Integrity error"));
}

#[tokio::test]
async fn cancel_job_ignores_completed() {
    let (pool, _container) = setup_test_db().await;
    let repo = HarvestJobRepository::new(pool);

    let pending = repo.create_job(test_request()).await.unwrap();
    let done = repo.create_job(test_request()).await.unwrap();
    repo.complete_job(done.id, 1).await.unwrap();

    repo.cancel_job(pending.id).await.unwrap();
    repo.cancel_job(done.id).await.unwrap();

    assert_eq!(
        repo.get_job(pending.id).await.unwrap().unwrap().status,
        JobStatus::Cancelled
    );
    assert_eq!(
        repo.get_job(done.id).await.unwrap().unwrap().status,
        JobStatus::Completed
    );
}

#[tokio::test]
async fn release_worker_jobs_on_shutdown() {
    let (pool, _container) = setup_test_db().await;
    let repo = HarvestJobRepository::new(pool);

    repo.create_job(test_request()).await.unwrap();
    repo.create_job(test_request()).await.unwrap();
    repo.claim_job("worker-1", "default").await.unwrap();
    repo.claim_job("worker-1", "default").await.unwrap();

    let released = repo.release_worker_jobs("worker-1").await.unwrap();

    assert_eq!(released, 2);
    assert_eq!(repo.count_by_status(JobStatus::Pending).await.unwrap(), 2);
}

#[tokio::test]
async fn list_jobs_with_status_filter() {
    let (pool, _container) = setup_test_db().await;
    let repo = HarvestJobRepository::new(pool);

    repo.create_job(test_request()).await.unwrap();
    repo.create_job(test_request()).await.unwrap();
    repo.claim_job("worker-1", "default").await.unwrap();

    assert_eq!(repo.list_jobs(Some(JobStatus::Pending), 10).await.unwrap().len(), 1);
    assert_eq!(repo.list_jobs(Some(JobStatus::Running), 10).await.unwrap().len(), 1);
    assert_eq!(repo.list_jobs(None, 10).await.unwrap().len(), 2);
    assert_eq!(repo.list_jobs(None, 1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn ping_succeeds_against_live_database() {
    let (pool, _container) = setup_test_db().await;
    let repo = HarvestJobRepository::new(pool);

    repo.ping().await.unwrap();
}
