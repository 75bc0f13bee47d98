//! Harvest orchestration: drive one adapter to completion, decorate and
//! persist every batch, and keep the ingestion status document current.

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use url::Url;
use uuid::Uuid;

use crate::adapter::{Page, SourceAdapter};
use crate::config::RunConfig;
use crate::error::HarvestError;
use crate::models::{Collection, IngestionStatus, Record, RegistryUnit};
use crate::storage::{ScratchBuffer, batch_key, to_jsonl};
use crate::traits::{Fetcher, Notifier, ObjectStore, StatusStore};

/// Events emitted during a harvest run.
#[derive(Debug, Clone)]
pub enum HarvestEvent<'a> {
    Started {
        collection_id: u64,
        run_id: Uuid,
    },
    Checkpoint {
        collection_id: u64,
        count: u64,
    },
    BatchPersisted {
        page: u64,
        records: usize,
        key: &'a str,
    },
    Finished {
        collection_id: u64,
        count: u64,
    },
    Failed {
        collection_id: u64,
        error: &'a str,
    },
}

/// Trait for receiving harvest events (decoupled logging).
pub trait HarvestReporter: Send + Sync {
    fn report(&self, event: HarvestEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingHarvestReporter;

impl HarvestReporter for TracingHarvestReporter {
    fn report(&self, event: HarvestEvent<'_>) {
        match event {
            HarvestEvent::Started {
                collection_id,
                run_id,
            } => {
                tracing::info!(collection_id, %run_id, "Harvest started");
            }
            HarvestEvent::Checkpoint {
                collection_id,
                count,
            } => {
                tracing::info!(collection_id, count, "{count} records harvested");
            }
            HarvestEvent::BatchPersisted { page, records, key } => {
                tracing::debug!(page, records, %key, "Batch persisted");
            }
            HarvestEvent::Finished {
                collection_id,
                count,
            } => {
                tracing::info!(collection_id, count, "Harvest complete");
            }
            HarvestEvent::Failed {
                collection_id,
                error,
            } => {
                tracing::error!(collection_id, %error, "Harvest failed");
            }
        }
    }
}

/// External collaborators of a harvest run.
#[derive(Clone)]
pub struct HarvestServices<F, O, S, N>
where
    F: Fetcher,
    O: ObjectStore,
    S: StatusStore,
    N: Notifier,
{
    pub fetcher: F,
    /// Sink for harvested pages; also holds precomputed structural indexes.
    pub store: O,
    pub status_store: S,
    pub notifier: N,
}

/// Whether `count` is a progress checkpoint: every 100 records up to
/// 1,000, every 1,000 up to 10,000, every 10,000 after that.
pub fn checkpoint_due(count: u64) -> bool {
    let step = match count {
        0 => return false,
        1..=1_000 => 100,
        1_001..=10_000 => 1_000,
        _ => 10_000,
    };
    count % step == 0
}

/// Drives one collection harvest from first request to final status.
pub struct HarvestController<F, O, S, N>
where
    F: Fetcher,
    O: ObjectStore,
    S: StatusStore,
    N: Notifier,
{
    operator: String,
    collection: Collection,
    config: RunConfig,
    services: HarvestServices<F, O, S, N>,
    run_id: Uuid,
    run_start: DateTime<Utc>,
}

impl<F, O, S, N> HarvestController<F, O, S, N>
where
    F: Fetcher,
    O: ObjectStore,
    S: StatusStore,
    N: Notifier,
{
    pub fn new(
        operator: impl Into<String>,
        collection: Collection,
        config: RunConfig,
        services: HarvestServices<F, O, S, N>,
    ) -> Self {
        Self {
            operator: operator.into(),
            collection,
            config,
            services,
            run_id: Uuid::new_v4(),
            run_start: Utc::now(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Harvests the collection and returns the number of records persisted.
    ///
    /// The status document is created before the first request and
    /// finalized exactly once, to `complete` or `error`. Zero records is an
    /// error.
    pub async fn run<R: HarvestReporter>(&self, reporter: &R) -> Result<u64, HarvestError> {
        SourceAdapter::<F, O>::ensure_supported(&self.collection.harvest_type)?;

        let collection_id = self.collection.id;
        let data_dir = ScratchBuffer::run_dir(&self.config.scratch_dir, collection_id, self.run_start);
        let mut status = IngestionStatus::running(
            self.run_id,
            collection_id,
            &self.operator,
            data_dir.display().to_string(),
            self.run_start,
        );
        self.services.status_store.create(&status).await?;

        reporter.report(HarvestEvent::Started {
            collection_id,
            run_id: self.run_id,
        });
        self.notify(
            &format!("Harvest started for {}", self.collection.slug),
            &format!(
                "{} started harvesting collection {} ({}) as run {}",
                self.operator, collection_id, self.collection.name, self.run_id
            ),
        )
        .await;

        let outcome = match self.harvest(reporter).await {
            Ok(count) => {
                status.complete(count);
                self.services.status_store.update(&status).await.map(|()| count)
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(count) => {
                reporter.report(HarvestEvent::Finished {
                    collection_id,
                    count,
                });
                Ok(count)
            }
            Err(e) => {
                let message = e.to_string();
                status.fail(&message);
                if let Err(store_err) = self.services.status_store.update(&status).await {
                    tracing::error!(
                        collection_id,
                        error = %store_err,
                        "Failed to record harvest failure in status store"
                    );
                }
                reporter.report(HarvestEvent::Failed {
                    collection_id,
                    error: &message,
                });
                self.notify(
                    &format!("Harvest failed for {}", self.collection.slug),
                    &format!("Run {} for collection {collection_id}: {message}", self.run_id),
                )
                .await;
                Err(e)
            }
        }
    }

    async fn harvest<R: HarvestReporter>(&self, reporter: &R) -> Result<u64, HarvestError> {
        let collection_id = self.collection.id;
        let mut adapter = SourceAdapter::build(
            &self.collection,
            self.services.fetcher.clone(),
            self.services.store.clone(),
            &self.config,
        )
        .await?;
        let scratch = ScratchBuffer::open(&self.config.scratch_dir, collection_id, self.run_start).await?;
        let provenance = collection_dict(&self.collection, &self.config.registry_base)?;

        let mut count = 0u64;
        let mut page = 0u64;
        loop {
            let mut batch = match adapter.next().await {
                Page::Batch(batch) => batch,
                Page::Exhausted => break,
                Page::Failed(e) => return Err(e),
            };

            for record in batch.iter_mut() {
                decorate(record, &provenance);
                count += 1;
                if checkpoint_due(count) {
                    reporter.report(HarvestEvent::Checkpoint {
                        collection_id,
                        count,
                    });
                }
            }

            scratch.write(&batch).await?;
            let key = batch_key(collection_id, self.run_start, page);
            self.services.store.put(&key, to_jsonl(&batch)?).await?;
            reporter.report(HarvestEvent::BatchPersisted {
                page,
                records: batch.len(),
                key: &key,
            });
            page += 1;
        }

        if count == 0 {
            return Err(HarvestError::EmptyResult { collection_id });
        }
        if !checkpoint_due(count) {
            reporter.report(HarvestEvent::Checkpoint {
                collection_id,
                count,
            });
        }
        Ok(count)
    }

    /// Builds a record id from the registry slugs and the first identifier.
    ///
    /// Segments are campus slugs, repository slugs, the collection slug, and
    /// the identifier with whitespace turned into hyphens; empty segments are
    /// skipped.
    pub fn create_id(&self, identifiers: &Value) -> Result<String, HarvestError> {
        let first = match identifiers {
            Value::Array(items) if !items.is_empty() => items
                .iter()
                .map(|item| item.as_str())
                .collect::<Option<Vec<_>>>()
                .and_then(|items| items.first().copied()),
            _ => None,
        }
        .ok_or_else(|| {
            HarvestError::ContractViolation(format!(
                "create_id expects a non-empty list of strings, got {identifiers}"
            ))
        })?;

        let slugs = |units: &[RegistryUnit]| {
            units
                .iter()
                .map(|u| u.slug.as_str())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join("-")
        };
        let identifier: String = first
            .chars()
            .map(|c| if c.is_whitespace() { '-' } else { c })
            .collect();

        let segments = [
            slugs(&self.collection.campus),
            slugs(&self.collection.repository),
            self.collection.slug.clone(),
            identifier,
        ];
        Ok(segments
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("-"))
    }

    async fn notify(&self, subject: &str, body: &str) {
        if let Err(e) = self.services.notifier.notify(subject, body).await {
            tracing::warn!(
                collection_id = self.collection.id,
                error = %e,
                "Operator notification failed"
            );
        }
    }
}

/// Provenance attached to every record of a collection.
pub fn collection_dict(collection: &Collection, registry_base: &Url) -> Result<Value, HarvestError> {
    let absolute = |uri: &str| -> Result<String, HarvestError> {
        registry_base
            .join(uri)
            .map(String::from)
            .map_err(|e| HarvestError::Configuration(format!("Cannot resolve registry URI '{uri}': {e}")))
    };
    let units = |units: &[RegistryUnit]| -> Result<Vec<Value>, HarvestError> {
        units
            .iter()
            .map(|unit| {
                Ok(json!({
                    "@id": absolute(&unit.resource_uri)?,
                    "name": unit.name,
                    "slug": unit.slug,
                }))
            })
            .collect()
    };

    let resource_uri = if collection.resource_uri.is_empty() {
        format!("/api/v1/collection/{}/", collection.id)
    } else {
        collection.resource_uri.clone()
    };

    Ok(json!({
        "@id": absolute(&resource_uri)?,
        "id": collection.id.to_string(),
        "name": collection.name,
        "slug": collection.slug,
        "harvest_type": collection.harvest_type.as_str(),
        "ready_for_publication": collection.ready_for_publication,
        "enrichments_item": collection.enrichments_item,
        "campus": units(&collection.campus)?,
        "repository": units(&collection.repository)?,
    }))
}

/// Sets `collection` to the provenance list, moving any value the source
/// already put there to `source_collection_name`.
pub fn decorate(record: &mut Record, provenance: &Value) {
    if let Some(original) = record.remove("collection") {
        record.insert("source_collection_name".into(), original);
    }
    record.insert("collection".into(), Value::Array(vec![provenance.clone()]));
}
