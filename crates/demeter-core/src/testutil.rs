//! Test utilities: mock implementations of all core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use url::Url;
use uuid::Uuid;

use crate::config::RunConfig;
use crate::error::HarvestError;
use crate::harvest::{HarvestEvent, HarvestReporter};
use crate::job::{CreateHarvestJobRequest, HarvestJob, JobStatus};
use crate::job_queue::JobQueue;
use crate::models::{Collection, HarvestType, IngestionStatus, RegistryUnit, RunStatus};
use crate::traits::{CollectionResolver, ComputeWaker, Fetcher, Notifier, ObjectStore, StatusStore};

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// Mock fetcher that replays queued responses and records every URL.
#[derive(Clone)]
pub struct MockFetcher {
    /// Queue of responses. Each call pops the first element.
    /// If empty, returns an HTTP error naming the unexpected URL.
    responses: Arc<Mutex<VecDeque<Result<String, HarvestError>>>>,
    requests: Arc<Mutex<Vec<String>>>,
    delay: Option<Duration>,
}

impl MockFetcher {
    pub fn with_responses(responses: Vec<Result<String, HarvestError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into())),
            requests: Arc::new(Mutex::new(Vec::new())),
            delay: None,
        }
    }

    /// Sleeps before answering each request.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<String, HarvestError> {
        self.requests.lock().unwrap().push(url.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.responses.lock().unwrap().pop_front();
        next.unwrap_or_else(|| {
            Err(HarvestError::Http(format!(
                "MockFetcher: no response queued for {url}"
            )))
        })
    }
}

// ---------------------------------------------------------------------------
// MemoryObjectStore
// ---------------------------------------------------------------------------

/// In-memory object store.
#[derive(Clone, Default)]
pub struct MemoryObjectStore {
    objects: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored keys in lexical order.
    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    /// Parses a stored JSONL object.
    pub fn get_json_lines(&self, key: &str) -> Vec<serde_json::Value> {
        let objects = self.objects.lock().unwrap();
        let body = String::from_utf8(objects[key].clone()).unwrap();
        body.lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }
}

impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<(), HarvestError> {
        self.objects.lock().unwrap().insert(key.to_string(), body);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, HarvestError> {
        Ok(self.objects.lock().unwrap().get(key).cloned())
    }
}

// ---------------------------------------------------------------------------
// MemoryStatusStore
// ---------------------------------------------------------------------------

/// Status store that keeps every written version of every document.
#[derive(Clone, Default)]
pub struct MemoryStatusStore {
    history: Arc<Mutex<Vec<IngestionStatus>>>,
    reject: Option<RunStatus>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails every update that would move a document to `status`.
    pub fn rejecting(status: RunStatus) -> Self {
        Self {
            reject: Some(status),
            ..Self::default()
        }
    }

    /// Every create/update, in call order.
    pub fn history(&self) -> Vec<IngestionStatus> {
        self.history.lock().unwrap().clone()
    }
}

impl StatusStore for MemoryStatusStore {
    async fn create(&self, status: &IngestionStatus) -> Result<(), HarvestError> {
        self.history.lock().unwrap().push(status.clone());
        Ok(())
    }

    async fn update(&self, status: &IngestionStatus) -> Result<(), HarvestError> {
        let mut history = self.history.lock().unwrap();
        if !history.iter().any(|s| s.id == status.id) {
            return Err(HarvestError::Database(format!("no status document {}", status.id)));
        }
        if self.reject.as_ref() == Some(&status.status) {
            return Err(HarvestError::Database(format!("write of {} rejected", status.status)));
        }
        history.push(status.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<IngestionStatus>, HarvestError> {
        let history = self.history.lock().unwrap();
        Ok(history.iter().rev().find(|s| s.id == id).cloned())
    }
}

// ---------------------------------------------------------------------------
// MockNotifier / MockWaker
// ---------------------------------------------------------------------------

/// Notifier that records subjects, optionally failing every delivery.
#[derive(Clone, Default)]
pub struct MockNotifier {
    subjects: Arc<Mutex<Vec<String>>>,
    fail: bool,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn subjects(&self) -> Vec<String> {
        self.subjects.lock().unwrap().clone()
    }
}

impl Notifier for MockNotifier {
    async fn notify(&self, subject: &str, _body: &str) -> Result<(), HarvestError> {
        if self.fail {
            return Err(HarvestError::Notification("webhook unreachable".into()));
        }
        self.subjects.lock().unwrap().push(subject.to_string());
        Ok(())
    }
}

/// Waker that counts calls.
#[derive(Clone, Default)]
pub struct MockWaker {
    calls: Arc<Mutex<u32>>,
    fail: bool,
}

impl MockWaker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

impl ComputeWaker for MockWaker {
    async fn wake(&self) -> Result<(), HarvestError> {
        *self.calls.lock().unwrap() += 1;
        if self.fail {
            return Err(HarvestError::Http("wake endpoint returned 503".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockResolver
// ---------------------------------------------------------------------------

/// Resolver returning a fixed collection, or an error once.
#[derive(Clone)]
pub struct MockResolver {
    collection: Option<Collection>,
    error: Arc<Mutex<Option<HarvestError>>>,
}

impl MockResolver {
    pub fn new(collection: Collection) -> Self {
        Self {
            collection: Some(collection),
            error: Arc::new(Mutex::new(None)),
        }
    }

    pub fn failing(error: HarvestError) -> Self {
        Self {
            collection: None,
            error: Arc::new(Mutex::new(Some(error))),
        }
    }
}

impl CollectionResolver for MockResolver {
    async fn resolve(&self, url: &str) -> Result<Collection, HarvestError> {
        if let Some(e) = self.error.lock().unwrap().take() {
            return Err(e);
        }
        self.collection
            .clone()
            .ok_or_else(|| HarvestError::Configuration(format!("no collection at {url}")))
    }
}

// ---------------------------------------------------------------------------
// MockJobQueue
// ---------------------------------------------------------------------------

/// Recorded failure: (job_id, error_message, next_retry_at).
pub type FailedJobRecord = (Uuid, String, Option<chrono::DateTime<Utc>>);

/// Recorded completion: (job_id, record_count).
pub type CompletedJobRecord = (Uuid, u64);

/// Mock job queue backed by an in-memory Vec.
#[derive(Clone)]
pub struct MockJobQueue {
    jobs: Arc<Mutex<Vec<HarvestJob>>>,
    ping_failures: Arc<Mutex<u32>>,
    pings: Arc<Mutex<u32>>,
    pub failed_jobs: Arc<Mutex<Vec<FailedJobRecord>>>,
    pub completed_jobs: Arc<Mutex<Vec<CompletedJobRecord>>>,
    pub released_workers: Arc<Mutex<Vec<String>>>,
}

impl MockJobQueue {
    pub fn empty() -> Self {
        Self {
            jobs: Arc::new(Mutex::new(Vec::new())),
            ping_failures: Arc::new(Mutex::new(0)),
            pings: Arc::new(Mutex::new(0)),
            failed_jobs: Arc::new(Mutex::new(Vec::new())),
            completed_jobs: Arc::new(Mutex::new(Vec::new())),
            released_workers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queue with one pending job ready to be claimed.
    pub fn with_job(job: HarvestJob) -> Self {
        let queue = Self::empty();
        queue.jobs.lock().unwrap().push(job);
        queue
    }

    /// Queue whose first `failures` pings fail.
    pub fn with_ping_failures(failures: u32) -> Self {
        let queue = Self::empty();
        *queue.ping_failures.lock().unwrap() = failures;
        queue
    }

    pub fn jobs(&self) -> Vec<HarvestJob> {
        self.jobs.lock().unwrap().clone()
    }

    pub fn ping_count(&self) -> u32 {
        *self.pings.lock().unwrap()
    }

    pub fn count_jobs(&self, status: JobStatus) -> usize {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|j| j.status == status)
            .count()
    }
}

impl JobQueue for MockJobQueue {
    async fn create_job(&self, request: CreateHarvestJobRequest) -> Result<HarvestJob, HarvestError> {
        let job = HarvestJob {
            id: Uuid::new_v4(),
            operator: request.operator,
            collection_url: request.collection_url,
            queue_name: request.flags.queue_name,
            job_timeout_secs: request.flags.job_timeout.as_secs(),
            status: JobStatus::Pending,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            started_at: None,
            completed_at: None,
            retry_count: 0,
            max_retries: request.max_retries.unwrap_or(3),
            next_retry_at: None,
            error_message: None,
            record_count: None,
            worker_id: None,
        };
        self.jobs.lock().unwrap().push(job.clone());
        Ok(job)
    }

    async fn claim_job(
        &self,
        worker_id: &str,
        queue_name: &str,
    ) -> Result<Option<HarvestJob>, HarvestError> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(pos) = jobs
            .iter()
            .position(|j| j.status == JobStatus::Pending && j.queue_name == queue_name)
        {
            jobs[pos].status = JobStatus::Running;
            jobs[pos].worker_id = Some(worker_id.to_string());
            jobs[pos].started_at = Some(Utc::now());
            Ok(Some(jobs[pos].clone()))
        } else {
            Ok(None)
        }
    }

    async fn complete_job(&self, job_id: Uuid, record_count: u64) -> Result<(), HarvestError> {
        self.completed_jobs
            .lock()
            .unwrap()
            .push((job_id, record_count));

        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.iter_mut().find(|j| j.id == job_id) {
            job.status = JobStatus::Completed;
            job.record_count = Some(record_count);
            job.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn fail_job(
        &self,
        job_id: Uuid,
        error: &str,
        next_retry_at: Option<chrono::DateTime<Utc>>,
    ) -> Result<(), HarvestError> {
        self.failed_jobs
            .lock()
            .unwrap()
            .push((job_id, error.to_string(), next_retry_at));

        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.iter_mut().find(|j| j.id == job_id) {
            if next_retry_at.is_some() {
                job.status = JobStatus::Pending;
                job.retry_count += 1;
                job.next_retry_at = next_retry_at;
            } else {
                job.status = JobStatus::Failed;
            }
            job.error_message = Some(error.to_string());
            job.worker_id = None;
        }
        Ok(())
    }

    async fn cancel_job(&self, job_id: Uuid) -> Result<(), HarvestError> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.iter_mut().find(|j| j.id == job_id) {
            job.status = JobStatus::Cancelled;
        }
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<HarvestJob>, HarvestError> {
        let jobs = self.jobs.lock().unwrap();
        Ok(jobs.iter().find(|j| j.id == job_id).cloned())
    }

    async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<HarvestJob>, HarvestError> {
        let jobs = self.jobs.lock().unwrap();
        let filtered: Vec<_> = jobs
            .iter()
            .filter(|j| status.is_none_or(|s| j.status == s))
            .take(limit)
            .cloned()
            .collect();
        Ok(filtered)
    }

    async fn release_worker_jobs(&self, worker_id: &str) -> Result<u64, HarvestError> {
        self.released_workers
            .lock()
            .unwrap()
            .push(worker_id.to_string());

        let mut jobs = self.jobs.lock().unwrap();
        let mut count = 0u64;
        for job in jobs.iter_mut() {
            if job.worker_id.as_deref() == Some(worker_id) && job.status == JobStatus::Running {
                job.status = JobStatus::Pending;
                job.worker_id = None;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn count_by_status(&self, status: JobStatus) -> Result<i64, HarvestError> {
        Ok(self.count_jobs(status) as i64)
    }

    async fn ping(&self) -> Result<(), HarvestError> {
        *self.pings.lock().unwrap() += 1;
        let mut failures = self.ping_failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(HarvestError::QueueUnavailable("connection refused".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Reporters
// ---------------------------------------------------------------------------

/// Mock worker reporter that records events.
#[derive(Default)]
pub struct MockReporter {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl crate::worker::WorkerReporter for MockReporter {
    fn report(&self, event: crate::worker::WorkerEvent<'_>) {
        let label = match &event {
            crate::worker::WorkerEvent::Started { .. } => "Started",
            crate::worker::WorkerEvent::Polling => "Polling",
            crate::worker::WorkerEvent::JobClaimed { .. } => "JobClaimed",
            crate::worker::WorkerEvent::JobStarted { .. } => "JobStarted",
            crate::worker::WorkerEvent::JobCompleted { .. } => "JobCompleted",
            crate::worker::WorkerEvent::JobFailed { .. } => "JobFailed",
            crate::worker::WorkerEvent::ShuttingDown { .. } => "ShuttingDown",
            crate::worker::WorkerEvent::Stopped { .. } => "Stopped",
        };
        self.events.lock().unwrap().push(label.to_string());
    }
}

/// Mock harvest reporter that records event labels and checkpoint counts.
#[derive(Default)]
pub struct MockHarvestReporter {
    events: Arc<Mutex<Vec<String>>>,
    checkpoints: Arc<Mutex<Vec<u64>>>,
}

impl MockHarvestReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn checkpoints(&self) -> Vec<u64> {
        self.checkpoints.lock().unwrap().clone()
    }
}

impl HarvestReporter for MockHarvestReporter {
    fn report(&self, event: HarvestEvent<'_>) {
        let label = match &event {
            HarvestEvent::Started { .. } => "Started",
            HarvestEvent::Checkpoint { count, .. } => {
                self.checkpoints.lock().unwrap().push(*count);
                "Checkpoint"
            }
            HarvestEvent::BatchPersisted { .. } => "BatchPersisted",
            HarvestEvent::Finished { .. } => "Finished",
            HarvestEvent::Failed { .. } => "Failed",
        };
        self.events.lock().unwrap().push(label.to_string());
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// Run configuration pointing at a throwaway scratch directory.
pub fn test_run_config() -> RunConfig {
    RunConfig::new(
        std::env::temp_dir().join(format!("demeter-tests-{}", Uuid::new_v4())),
        Url::parse("https://registry.example.org").unwrap(),
    )
}

/// Collection 26 with campuses `a`, `b`, repository `r`, slug `s`.
pub fn make_test_collection(harvest_type: HarvestType) -> Collection {
    let unit = |uri: &str, slug: &str, name: &str| RegistryUnit {
        resource_uri: uri.to_string(),
        slug: slug.to_string(),
        name: name.to_string(),
    };
    Collection {
        id: 26,
        name: "Test Collection".to_string(),
        slug: "s".to_string(),
        harvest_type,
        url_harvest: "https://oai.example.edu/oai".to_string(),
        harvest_extra_data: String::new(),
        campus: vec![
            unit("/api/v1/campus/1/", "a", "Campus A"),
            unit("/api/v1/campus/2/", "b", "Campus B"),
        ],
        repository: vec![unit("/api/v1/repository/4/", "r", "Repository R")],
        enrichments_item: vec!["/select-id".to_string()],
        thresholds: serde_json::Value::Null,
        ready_for_publication: true,
        resource_uri: "/api/v1/collection/26/".to_string(),
        extra: serde_json::Map::new(),
    }
}

/// Create a dummy HarvestJob for testing.
pub fn make_test_job() -> HarvestJob {
    HarvestJob {
        id: Uuid::new_v4(),
        operator: "ops@example.edu".to_string(),
        collection_url: "https://registry.example.org/api/v1/collection/26/".to_string(),
        queue_name: crate::job::DEFAULT_QUEUE.to_string(),
        job_timeout_secs: 3600,
        status: JobStatus::Pending,
        created_at: Utc::now(),
        updated_at: Utc::now(),
        started_at: None,
        completed_at: None,
        retry_count: 0,
        max_retries: 3,
        next_retry_at: None,
        error_message: None,
        record_count: None,
        worker_id: None,
    }
}

/// OAI-PMH `ListRecords` page with simple DC records `start..start+count`.
pub fn oai_list_records_page(
    start: u64,
    count: u64,
    token: Option<&str>,
    complete_list_size: Option<u64>,
) -> String {
    let records: String = (start..start + count)
        .map(|i| {
            format!(
                r#"<record><header><identifier>oai:test:{i}</identifier><datestamp>2024-01-01</datestamp></header>
                <metadata><oai_dc:dc xmlns:oai_dc="http://www.openarchives.org/OAI/2.0/oai_dc/" xmlns:dc="http://purl.org/dc/elements/1.1/">
                <dc:title>Record {i}</dc:title><dc:identifier>ark:/test/{i}</dc:identifier>
                </oai_dc:dc></metadata></record>"#
            )
        })
        .collect();
    let size_attr = complete_list_size
        .map(|n| format!(r#" completeListSize="{n}""#))
        .unwrap_or_default();
    let resumption = match (token, complete_list_size) {
        (Some(token), _) => format!("<resumptionToken{size_attr}>{token}</resumptionToken>"),
        (None, Some(_)) => format!("<resumptionToken{size_attr}/>"),
        (None, None) => String::new(),
    };
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
        <OAI-PMH xmlns="http://www.openarchives.org/OAI/2.0/"><responseDate>2024-01-01T00:00:00Z</responseDate>
        <request verb="ListRecords">https://oai.example.edu/oai</request>
        <ListRecords>{records}{resumption}</ListRecords></OAI-PMH>"#
    )
}

/// OAI-PMH response for an empty set.
pub fn oai_no_records() -> String {
    r#"<?xml version="1.0" encoding="UTF-8"?>
    <OAI-PMH xmlns="http://www.openarchives.org/OAI/2.0/"><responseDate>2024-01-01T00:00:00Z</responseDate>
    <request verb="ListRecords">https://oai.example.edu/oai</request>
    <error code="noRecordsMatch">No records match the request</error></OAI-PMH>"#
        .to_string()
}
