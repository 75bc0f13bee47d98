//! Durable sinks for harvested batches.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::HarvestError;
use crate::models::Batch;
use crate::traits::ObjectStore;

/// Object key of the `page`-th batch (0-based) of a run.
pub fn batch_key(collection_id: u64, run_start: DateTime<Utc>, page: u64) -> String {
    format!(
        "data-fetched/{collection_id}/{}/page-{page}.jsonl",
        run_start.format("%Y-%m-%d-%H%M")
    )
}

/// Serializes a batch as newline-delimited JSON.
pub fn to_jsonl(batch: &Batch) -> Result<Vec<u8>, HarvestError> {
    let mut out = Vec::new();
    for record in batch {
        serde_json::to_writer(&mut out, record)?;
        out.push(b'\n');
    }
    Ok(out)
}

fn storage_err(path: &Path, e: std::io::Error) -> HarvestError {
    HarvestError::Storage(format!("{}: {e}", path.display()))
}

/// Filesystem-backed [`ObjectStore`]; keys map to paths below `root`.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, HarvestError> {
        if key.split('/').any(|segment| segment == "..") || key.starts_with('/') {
            return Err(HarvestError::Storage(format!("refusing object key '{key}'")));
        }
        Ok(self.root.join(key))
    }
}

impl ObjectStore for LocalObjectStore {
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<(), HarvestError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| storage_err(parent, e))?;
        }
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| storage_err(&path, e))
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, HarvestError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_err(&path, e)),
        }
    }
}

/// Local scratch copy of a run: one JSON-array file per batch.
#[derive(Debug)]
pub struct ScratchBuffer {
    dir: PathBuf,
}

impl ScratchBuffer {
    /// Directory holding the batches of one run.
    pub fn run_dir(scratch_dir: &Path, collection_id: u64, run_start: DateTime<Utc>) -> PathBuf {
        scratch_dir
            .join(collection_id.to_string())
            .join(run_start.format("%Y-%m-%d-%H%M%S").to_string())
    }

    /// Creates the run directory.
    pub async fn open(
        scratch_dir: &Path,
        collection_id: u64,
        run_start: DateTime<Utc>,
    ) -> Result<Self, HarvestError> {
        let dir = Self::run_dir(scratch_dir, collection_id, run_start);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| storage_err(&dir, e))?;
        Ok(Self { dir })
    }

    /// Writes the batch to `{uuid}.json` and returns the file path.
    pub async fn write(&self, batch: &Batch) -> Result<PathBuf, HarvestError> {
        let path = self.dir.join(format!("{}.json", Uuid::new_v4()));
        let body = serde_json::to_vec(batch)?;
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| storage_err(&path, e))?;
        Ok(path)
    }
}
