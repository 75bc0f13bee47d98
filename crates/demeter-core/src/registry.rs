use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;

use crate::error::HarvestError;
use crate::models::Collection;
use crate::traits::{CollectionResolver, Fetcher};

/// Appends `format=json` unless the URL already asks for a format.
pub fn with_json_format(url: &str) -> String {
    if url.contains("format=") {
        url.to_string()
    } else if url.contains('?') {
        format!("{url}&format=json")
    } else {
        format!("{url}?format=json")
    }
}

/// Resolves collections straight from the registry API.
#[derive(Clone)]
pub struct RegistryResolver<F: Fetcher> {
    fetcher: F,
}

impl<F: Fetcher> RegistryResolver<F> {
    pub fn new(fetcher: F) -> Self {
        Self { fetcher }
    }
}

impl<F: Fetcher> CollectionResolver for RegistryResolver<F> {
    async fn resolve(&self, url: &str) -> Result<Collection, HarvestError> {
        let url = with_json_format(url);
        let body = self.fetcher.fetch(&url).await?;
        let collection: Collection = serde_json::from_str(&body).map_err(|e| {
            HarvestError::Configuration(format!("Registry returned an unusable collection at {url}: {e}"))
        })?;
        tracing::debug!(
            collection_id = collection.id,
            harvest_type = %collection.harvest_type,
            "Resolved collection"
        );
        Ok(collection)
    }
}

/// Memoizing wrapper around another resolver.
///
/// Entries expire after `ttl`; the cache holds at most `capacity` collections.
#[derive(Clone)]
pub struct CachedResolver<R: CollectionResolver> {
    inner: R,
    cache: Cache<String, Arc<Collection>>,
}

impl<R: CollectionResolver> CachedResolver<R> {
    pub fn new(inner: R, capacity: u64, ttl: Duration) -> Self {
        Self {
            inner,
            cache: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
        }
    }
}

impl<R: CollectionResolver> CollectionResolver for CachedResolver<R> {
    async fn resolve(&self, url: &str) -> Result<Collection, HarvestError> {
        if let Some(hit) = self.cache.get(url).await {
            return Ok((*hit).clone());
        }
        let collection = self.inner.resolve(url).await?;
        self.cache
            .insert(url.to_string(), Arc::new(collection.clone()))
            .await;
        Ok(collection)
    }
}
