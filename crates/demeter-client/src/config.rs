use std::path::PathBuf;

use demeter_core::error::HarvestError;
use demeter_core::storage::LocalObjectStore;
use demeter_core::traits::ObjectStore;

use crate::s3::S3ObjectStore;

/// Where harvested pages are written.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageConfig {
    /// S3 bucket; when unset, pages go to `data_dir` on local disk.
    pub bucket: Option<String>,
    pub endpoint: Option<String>,
    pub data_dir: PathBuf,
}

impl StorageConfig {
    /// Read configuration from environment variables.
    ///
    /// - `DEMETER_S3_BUCKET` (optional)
    /// - `DEMETER_S3_ENDPOINT` (optional, only meaningful with a bucket)
    /// - `DEMETER_DATA_DIR` (optional, defaults to `./data`)
    pub fn from_env() -> Result<Self, HarvestError> {
        let bucket = non_empty_var("DEMETER_S3_BUCKET");
        let endpoint = non_empty_var("DEMETER_S3_ENDPOINT");
        if endpoint.is_some() && bucket.is_none() {
            return Err(HarvestError::Configuration(
                "DEMETER_S3_ENDPOINT is set but DEMETER_S3_BUCKET is not".into(),
            ));
        }

        Ok(Self {
            bucket,
            endpoint,
            data_dir: non_empty_var("DEMETER_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data")),
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// The configured object store.
#[derive(Clone)]
pub enum DataStore {
    Local(LocalObjectStore),
    S3(S3ObjectStore),
}

impl DataStore {
    pub async fn from_config(config: &StorageConfig) -> Self {
        match &config.bucket {
            Some(bucket) => {
                DataStore::S3(S3ObjectStore::connect(bucket.clone(), config.endpoint.as_deref()).await)
            }
            None => {
                tracing::info!(dir = %config.data_dir.display(), "Writing harvested pages to local disk");
                DataStore::Local(LocalObjectStore::new(&config.data_dir))
            }
        }
    }
}

impl ObjectStore for DataStore {
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<(), HarvestError> {
        match self {
            DataStore::Local(store) => store.put(key, body).await,
            DataStore::S3(store) => store.put(key, body).await,
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, HarvestError> {
        match self {
            DataStore::Local(store) => store.get(key).await,
            DataStore::S3(store) => store.get(key).await,
        }
    }
}
