use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::RunConfig;
use crate::error::HarvestError;
use crate::harvest::{HarvestController, HarvestServices, TracingHarvestReporter};
use crate::job::{HarvestJob, WorkerConfig};
use crate::job_queue::JobQueue;
use crate::traits::{CollectionResolver, Fetcher, Notifier, ObjectStore, StatusStore};

/// Events emitted by the worker for monitoring/logging.
#[derive(Debug, Clone)]
pub enum WorkerEvent<'a> {
    Started {
        worker_id: &'a str,
        queue_name: &'a str,
    },
    Polling,
    JobClaimed {
        job: &'a HarvestJob,
    },
    JobStarted {
        job_id: Uuid,
        collection_url: &'a str,
    },
    JobCompleted {
        job_id: Uuid,
        record_count: u64,
    },
    JobFailed {
        job_id: Uuid,
        error: &'a str,
        will_retry: bool,
    },
    ShuttingDown {
        worker_id: &'a str,
        jobs_released: u64,
    },
    Stopped {
        worker_id: &'a str,
    },
}

/// Trait for receiving worker events (decoupled logging).
pub trait WorkerReporter: Send + Sync {
    fn report(&self, event: WorkerEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingWorkerReporter;

impl WorkerReporter for TracingWorkerReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        match event {
            WorkerEvent::Started {
                worker_id,
                queue_name,
            } => {
                tracing::info!(%worker_id, queue = %queue_name, "Worker started");
            }
            WorkerEvent::Polling => {
                tracing::debug!("Polling for jobs");
            }
            WorkerEvent::JobClaimed { job } => {
                tracing::info!(job_id = %job.id, collection_url = %job.collection_url, "Job claimed");
            }
            WorkerEvent::JobStarted {
                job_id,
                collection_url,
            } => {
                tracing::info!(%job_id, %collection_url, "Processing job");
            }
            WorkerEvent::JobCompleted {
                job_id,
                record_count,
            } => {
                tracing::info!(%job_id, record_count, "Job completed");
            }
            WorkerEvent::JobFailed {
                job_id,
                error,
                will_retry,
            } => {
                tracing::warn!(%job_id, %error, %will_retry, "Job failed");
            }
            WorkerEvent::ShuttingDown {
                worker_id,
                jobs_released,
            } => {
                tracing::info!(%worker_id, %jobs_released, "Worker shutting down");
            }
            WorkerEvent::Stopped { worker_id } => {
                tracing::info!(%worker_id, "Worker stopped");
            }
        }
    }
}

/// Worker that polls the job queue and runs one harvest per claimed job.
pub struct WorkerService<Q, R, F, O, S, N>
where
    Q: JobQueue,
    R: CollectionResolver,
    F: Fetcher,
    O: ObjectStore,
    S: StatusStore,
    N: Notifier,
{
    queue: Q,
    resolver: R,
    services: HarvestServices<F, O, S, N>,
    run_config: RunConfig,
    config: WorkerConfig,
}

impl<Q, R, F, O, S, N> WorkerService<Q, R, F, O, S, N>
where
    Q: JobQueue,
    R: CollectionResolver,
    F: Fetcher,
    O: ObjectStore,
    S: StatusStore,
    N: Notifier,
{
    pub fn new(
        queue: Q,
        resolver: R,
        services: HarvestServices<F, O, S, N>,
        run_config: RunConfig,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            resolver,
            services,
            run_config,
            config,
        }
    }

    /// Run the worker loop until cancellation.
    pub async fn run<WR: WorkerReporter>(
        &self,
        cancel_token: CancellationToken,
        reporter: &WR,
    ) -> Result<(), HarvestError> {
        reporter.report(WorkerEvent::Started {
            worker_id: &self.config.worker_id,
            queue_name: &self.config.queue_name,
        });

        loop {
            if cancel_token.is_cancelled() {
                break;
            }

            reporter.report(WorkerEvent::Polling);

            match self
                .queue
                .claim_job(&self.config.worker_id, &self.config.queue_name)
                .await
            {
                Ok(Some(job)) => {
                    reporter.report(WorkerEvent::JobClaimed { job: &job });
                    self.process_job(&job, reporter).await;
                }
                Ok(None) => {
                    tokio::select! {
                        () = tokio::time::sleep(self.config.poll_interval) => {}
                        () = cancel_token.cancelled() => break,
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to claim job");
                    tokio::select! {
                        () = tokio::time::sleep(self.config.poll_interval * 2) => {}
                        () = cancel_token.cancelled() => break,
                    }
                }
            }
        }

        // Graceful shutdown: release all claimed jobs
        let released = self
            .queue
            .release_worker_jobs(&self.config.worker_id)
            .await
            .unwrap_or(0);

        reporter.report(WorkerEvent::ShuttingDown {
            worker_id: &self.config.worker_id,
            jobs_released: released,
        });
        reporter.report(WorkerEvent::Stopped {
            worker_id: &self.config.worker_id,
        });

        Ok(())
    }

    async fn process_job<WR: WorkerReporter>(&self, job: &HarvestJob, reporter: &WR) {
        reporter.report(WorkerEvent::JobStarted {
            job_id: job.id,
            collection_url: &job.collection_url,
        });

        match self.harvest(job).await {
            Ok(record_count) => {
                reporter.report(WorkerEvent::JobCompleted {
                    job_id: job.id,
                    record_count,
                });
                if let Err(e) = self.queue.complete_job(job.id, record_count).await {
                    tracing::error!(job_id = %job.id, error = %e, "Failed to mark job completed");
                }
            }
            Err(e) => {
                let error_msg = e.to_string();
                let can_retry = job.can_retry() && e.is_retryable();
                reporter.report(WorkerEvent::JobFailed {
                    job_id: job.id,
                    error: &error_msg,
                    will_retry: can_retry,
                });

                let next_retry = if can_retry {
                    Some(job.calculate_next_retry(&self.config.retry_config))
                } else {
                    None
                };

                if let Err(e) = self.queue.fail_job(job.id, &error_msg, next_retry).await {
                    tracing::error!(job_id = %job.id, error = %e, "Failed to mark job as failed");
                }
            }
        }
    }

    /// Resolves the collection and runs the harvest, bounded by the job's
    /// timeout.
    async fn harvest(&self, job: &HarvestJob) -> Result<u64, HarvestError> {
        let collection = self.resolver.resolve(&job.collection_url).await?;
        let controller = HarvestController::new(
            job.operator.clone(),
            collection,
            self.run_config.clone(),
            self.services.clone(),
        );

        match tokio::time::timeout(job.job_timeout(), controller.run(&TracingHarvestReporter)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    job_id = %job.id,
                    run_id = %controller.run_id(),
                    timeout_secs = job.job_timeout_secs,
                    "Harvest exceeded job timeout"
                );
                Err(HarvestError::Timeout(job.job_timeout_secs))
            }
        }
    }
}
