use std::future::Future;

use uuid::Uuid;

use crate::error::HarvestError;
use crate::models::{Collection, IngestionStatus};

/// Fetches a raw response body from a URL.
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<String, HarvestError>> + Send;
}

/// Key-value sink for harvested pages and source for precomputed indexes.
pub trait ObjectStore: Send + Sync + Clone {
    fn put(
        &self,
        key: &str,
        body: Vec<u8>,
    ) -> impl Future<Output = Result<(), HarvestError>> + Send;

    /// Returns `None` when the key does not exist.
    fn get(&self, key: &str)
    -> impl Future<Output = Result<Option<Vec<u8>>, HarvestError>> + Send;
}

/// Persists ingestion status documents.
pub trait StatusStore: Send + Sync + Clone {
    fn create(
        &self,
        status: &IngestionStatus,
    ) -> impl Future<Output = Result<(), HarvestError>> + Send;

    fn update(
        &self,
        status: &IngestionStatus,
    ) -> impl Future<Output = Result<(), HarvestError>> + Send;

    fn get(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<IngestionStatus>, HarvestError>> + Send;
}

/// Resolves a registry API URL to a collection snapshot.
pub trait CollectionResolver: Send + Sync + Clone {
    fn resolve(&self, url: &str) -> impl Future<Output = Result<Collection, HarvestError>> + Send;
}

/// Operator notification channel. Callers treat delivery as best-effort.
pub trait Notifier: Send + Sync + Clone {
    fn notify(
        &self,
        subject: &str,
        body: &str,
    ) -> impl Future<Output = Result<(), HarvestError>> + Send;
}

/// Side effect asking the platform to bring worker compute online.
pub trait ComputeWaker: Send + Sync + Clone {
    fn wake(&self) -> impl Future<Output = Result<(), HarvestError>> + Send;
}

/// Notifier that only writes to the log.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    async fn notify(&self, subject: &str, body: &str) -> Result<(), HarvestError> {
        tracing::info!(%subject, %body, "Operator notification");
        Ok(())
    }
}

/// A waker for deployments where compute is always on.
#[derive(Debug, Clone, Default)]
pub struct NoopWaker;

impl ComputeWaker for NoopWaker {
    async fn wake(&self) -> Result<(), HarvestError> {
        Ok(())
    }
}
