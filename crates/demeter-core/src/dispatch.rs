use std::time::Duration;

use tokio::time::Instant;

use crate::error::HarvestError;
use crate::job::{CreateHarvestJobRequest, HarvestJob, RunFlags};
use crate::job_queue::JobQueue;
use crate::traits::ComputeWaker;

/// Readiness polling for the queue backend.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub poll_interval: Duration,
    pub ready_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(20),
            ready_timeout: Duration::from_secs(600),
        }
    }
}

/// Schedules harvest runs onto the job queue.
pub struct JobDispatcher<Q: JobQueue, W: ComputeWaker> {
    queue: Q,
    waker: W,
    config: DispatchConfig,
}

impl<Q: JobQueue, W: ComputeWaker> JobDispatcher<Q, W> {
    pub fn new(queue: Q, waker: W, config: DispatchConfig) -> Self {
        Self {
            queue,
            waker,
            config,
        }
    }

    /// Enqueues one independent job per collection reference.
    ///
    /// Waits for the queue backend first. Nothing is enqueued if it never
    /// becomes reachable.
    pub async fn enqueue(
        &self,
        operator: &str,
        collection_urls: &[String],
        queue_name: &str,
        job_timeout: Duration,
    ) -> Result<Vec<HarvestJob>, HarvestError> {
        if collection_urls.is_empty() {
            return Err(HarvestError::Configuration(
                "No collections given to enqueue".into(),
            ));
        }

        self.wait_until_ready().await?;

        let flags = RunFlags::new(queue_name, job_timeout);
        let mut jobs = Vec::with_capacity(collection_urls.len());
        for url in collection_urls {
            let job = self
                .queue
                .create_job(CreateHarvestJobRequest::new(operator, url.as_str(), flags.clone()))
                .await?;
            tracing::info!(job_id = %job.id, collection_url = %url, queue = %queue_name, "Harvest job enqueued");
            jobs.push(job);
        }
        Ok(jobs)
    }

    async fn wait_until_ready(&self) -> Result<(), HarvestError> {
        let deadline = Instant::now() + self.config.ready_timeout;
        let mut woken = false;

        loop {
            let error = match self.queue.ping().await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            if !woken {
                woken = true;
                tracing::info!(error = %error, "Queue backend not ready, waking compute");
                if let Err(e) = self.waker.wake().await {
                    tracing::warn!(error = %e, "Compute wake request failed");
                }
            } else {
                tracing::debug!(error = %error, "Queue backend still not ready");
            }

            if Instant::now() + self.config.poll_interval > deadline {
                return Err(HarvestError::QueueUnavailable(format!(
                    "queue backend not ready after {}s: {error}",
                    self.config.ready_timeout.as_secs()
                )));
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}
