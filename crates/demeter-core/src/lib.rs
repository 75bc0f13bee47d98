pub mod adapter;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod harvest;
pub mod job;
pub mod job_queue;
pub mod models;
pub mod registry;
pub mod storage;
pub mod traits;
pub mod worker;
pub mod xml;

#[cfg(test)]
pub(crate) mod testutil;

pub use adapter::{AdapterState, Page, SourceAdapter};
pub use config::{PagingRetry, RunConfig, SourceCredentials};
pub use dispatch::{DispatchConfig, JobDispatcher};
pub use error::HarvestError;
pub use harvest::{
    HarvestController, HarvestEvent, HarvestReporter, HarvestServices, TracingHarvestReporter,
};
pub use job::{
    CreateHarvestJobRequest, DEFAULT_JOB_TIMEOUT, DEFAULT_QUEUE, HarvestJob, JobStatus,
    RetryConfig, RunFlags, WorkerConfig,
};
pub use job_queue::JobQueue;
pub use models::{Batch, Collection, HarvestType, IngestionStatus, Record, RunStatus};
pub use registry::{CachedResolver, RegistryResolver};
pub use storage::{LocalObjectStore, ScratchBuffer};
pub use traits::{
    CollectionResolver, ComputeWaker, Fetcher, LogNotifier, Notifier, NoopWaker, ObjectStore,
    StatusStore,
};
pub use worker::{TracingWorkerReporter, WorkerEvent, WorkerReporter, WorkerService};
