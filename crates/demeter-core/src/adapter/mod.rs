//! Source adapters: one pull contract over many upstream pagination schemes.
//!
//! # States
//!
//! ```text
//! Initialized --next()/prefetch--> Fetching --+--> Exhausted
//!                                             |
//!                                             +--> Failed
//! ```
//!
//! Each variant implements `next_batch`, returning `Ok(Some(batch))` with a
//! non-empty batch, `Ok(None)` once the source is drained, or an error. The
//! [`SourceAdapter`] wrapper turns that into a [`Page`] and enforces that
//! terminal states stay terminal.

mod flickr;
mod marc;
mod nuxeo;
mod oac;
mod oai;
mod solr;
mod youtube;

use url::Url;

pub use flickr::FlickrAdapter;
pub use marc::{MarcAdapter, marc_record_to_json};
pub use nuxeo::NuxeoAdapter;
pub use oac::{OacAdapter, OacGroup};
pub use oai::{MetadataFormat, OaiAdapter};
pub use solr::SolrAdapter;
pub use youtube::YoutubeAdapter;

use crate::config::RunConfig;
use crate::error::HarvestError;
use crate::models::{Batch, Collection, HarvestType};
use crate::traits::{Fetcher, ObjectStore};

/// Outcome of one pull.
#[derive(Debug)]
pub enum Page {
    /// A non-empty batch of records.
    Batch(Batch),
    /// The source is drained. Ordinary termination.
    Exhausted,
    /// Unrecoverable failure for this adapter instance.
    Failed(HarvestError),
}

/// Lifecycle of a [`SourceAdapter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Initialized,
    Fetching,
    Exhausted,
    Failed,
}

impl AdapterState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AdapterState::Exhausted | AdapterState::Failed)
    }
}

enum Variant<F: Fetcher, O: ObjectStore> {
    Oai(OaiAdapter<F>),
    Oac(OacAdapter<F>),
    Solr(SolrAdapter<F>),
    Nuxeo(NuxeoAdapter<F, O>),
    Flickr(FlickrAdapter<F>),
    Youtube(YoutubeAdapter<F>),
    Marc(MarcAdapter<F>),
}

/// Pull-based fetch engine for one collection.
pub struct SourceAdapter<F: Fetcher, O: ObjectStore> {
    variant: Variant<F, O>,
    state: AdapterState,
}

impl<F: Fetcher, O: ObjectStore> SourceAdapter<F, O> {
    /// Rejects harvest types with no adapter. Performs no I/O.
    pub fn ensure_supported(harvest_type: &HarvestType) -> Result<(), HarvestError> {
        match harvest_type {
            HarvestType::Unsupported(code) => Err(HarvestError::Configuration(format!(
                "Unsupported harvest type '{code}'"
            ))),
            _ => Ok(()),
        }
    }

    /// Builds the adapter matching the collection's harvest type.
    ///
    /// Grouped-paging and cursor sources fetch their first page here to
    /// learn the reported total; the adapter then starts in `Fetching`.
    pub async fn build(
        collection: &Collection,
        fetcher: F,
        index_store: O,
        config: &RunConfig,
    ) -> Result<Self, HarvestError> {
        let variant = match &collection.harvest_type {
            HarvestType::Oai => Variant::Oai(OaiAdapter::new(collection, fetcher)?),
            HarvestType::Oac => Variant::Oac(OacAdapter::connect(collection, fetcher, config).await?),
            HarvestType::Solr => {
                Variant::Solr(SolrAdapter::connect(collection, fetcher, config).await?)
            }
            HarvestType::Nuxeo => {
                Variant::Nuxeo(NuxeoAdapter::new(collection, fetcher, index_store, config)?)
            }
            HarvestType::Flickr => Variant::Flickr(FlickrAdapter::new(collection, fetcher, config)?),
            HarvestType::Youtube => {
                Variant::Youtube(YoutubeAdapter::new(collection, fetcher, config)?)
            }
            HarvestType::Marc => Variant::Marc(MarcAdapter::new(collection, fetcher, config)?),
            HarvestType::Unsupported(code) => {
                return Err(HarvestError::Configuration(format!(
                    "Unsupported harvest type '{code}'"
                )));
            }
        };

        let state = match &variant {
            Variant::Oac(_) | Variant::Solr(_) => AdapterState::Fetching,
            _ => AdapterState::Initialized,
        };

        tracing::debug!(
            collection_id = collection.id,
            harvest_type = %collection.harvest_type,
            ?state,
            "Source adapter ready"
        );

        Ok(Self { variant, state })
    }

    pub fn state(&self) -> AdapterState {
        self.state
    }

    /// Pulls the next batch.
    pub async fn next(&mut self) -> Page {
        if self.state.is_terminal() {
            return Page::Failed(HarvestError::ContractViolation(format!(
                "next() called on an adapter in terminal state {:?}",
                self.state
            )));
        }
        self.state = AdapterState::Fetching;

        let result = match &mut self.variant {
            Variant::Oai(adapter) => adapter.next_batch().await,
            Variant::Oac(adapter) => adapter.next_batch().await,
            Variant::Solr(adapter) => adapter.next_batch().await,
            Variant::Nuxeo(adapter) => adapter.next_batch().await,
            Variant::Flickr(adapter) => adapter.next_batch().await,
            Variant::Youtube(adapter) => adapter.next_batch().await,
            Variant::Marc(adapter) => adapter.next_batch().await,
        };

        match result {
            Ok(Some(batch)) if !batch.is_empty() => Page::Batch(batch),
            Ok(Some(_)) => {
                self.state = AdapterState::Failed;
                Page::Failed(HarvestError::ContractViolation(
                    "adapter produced an empty batch".into(),
                ))
            }
            Ok(None) => {
                self.state = AdapterState::Exhausted;
                Page::Exhausted
            }
            Err(e) => {
                self.state = AdapterState::Failed;
                Page::Failed(e)
            }
        }
    }
}

/// Appends query parameters to a base URL.
pub(crate) fn build_url(base: &str, params: &[(&str, &str)]) -> Result<String, HarvestError> {
    let mut url = Url::parse(base)
        .map_err(|e| HarvestError::Configuration(format!("Invalid harvest URL '{base}': {e}")))?;
    {
        let mut query = url.query_pairs_mut();
        for (key, value) in params {
            query.append_pair(key, value);
        }
    }
    Ok(url.into())
}

/// Splits `harvest_extra_data` into key/value pairs.
///
/// A value without `=` is a bare argument and comes back under `bare_key`.
pub(crate) fn extra_data_pairs(extra: &str, bare_key: &str) -> Vec<(String, String)> {
    let extra = extra.trim();
    if extra.is_empty() {
        return Vec::new();
    }
    if !extra.contains('=') {
        return vec![(bare_key.to_string(), extra.to_string())];
    }
    url::form_urlencoded::parse(extra.trim_start_matches('?').as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// Fails unless the number of records fetched matches the upstream total.
pub(crate) fn verify_total(source: &str, fetched: u64, reported: u64) -> Result<(), HarvestError> {
    if fetched == reported {
        Ok(())
    } else {
        Err(HarvestError::Integrity(format!(
            "{source}: fetched {fetched} records but upstream reported {reported}"
        )))
    }
}

pub(crate) fn parse_json(source: &str, body: &str) -> Result<serde_json::Value, HarvestError> {
    serde_json::from_str(body)
        .map_err(|e| HarvestError::Protocol(format!("{source}: response is not valid JSON: {e}")))
}

/// Reads a count that some APIs serve as a number and others as a string.
pub(crate) fn loose_count(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
