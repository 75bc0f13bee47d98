use serde_json::Value;

use super::{build_url, extra_data_pairs, loose_count, parse_json, verify_total};
use crate::config::RunConfig;
use crate::error::HarvestError;
use crate::models::{Batch, Collection};
use crate::traits::Fetcher;

const START_CURSOR: &str = "*";

/// Solr `cursorMark` harvest.
///
/// The first page is requested at construction to learn `numFound`. The
/// adapter stops as soon as the fetched count reaches that total, without
/// asking for the page after the last.
pub struct SolrAdapter<F: Fetcher> {
    fetcher: F,
    url: String,
    params: Vec<(String, String)>,
    rows: u32,
    cursor: String,
    num_found: u64,
    fetched: u64,
    pending: Option<Batch>,
}

impl<F: Fetcher> SolrAdapter<F> {
    pub async fn connect(
        collection: &Collection,
        fetcher: F,
        config: &RunConfig,
    ) -> Result<Self, HarvestError> {
        let url = collection.url_harvest.trim().to_string();
        if url.is_empty() {
            return Err(HarvestError::Configuration(format!(
                "Collection {} has no Solr URL",
                collection.id
            )));
        }

        let mut adapter = Self {
            fetcher,
            url,
            params: extra_data_pairs(&collection.harvest_extra_data, "q"),
            rows: config.page_size,
            cursor: START_CURSOR.to_string(),
            num_found: 0,
            fetched: 0,
            pending: None,
        };

        let first = adapter.fetch_page().await?;
        adapter.pending = Some(first);
        tracing::info!(url = %adapter.url, num_found = adapter.num_found, "Solr cursor opened");
        Ok(adapter)
    }

    pub(crate) async fn next_batch(&mut self) -> Result<Option<Batch>, HarvestError> {
        let batch = match self.pending.take() {
            Some(batch) => batch,
            None => {
                if self.fetched >= self.num_found {
                    return Ok(None);
                }
                self.fetch_page().await?
            }
        };

        if batch.is_empty() {
            verify_total("Solr", self.fetched, self.num_found)?;
            return Ok(None);
        }
        Ok(Some(batch))
    }

    /// Fetches the page at the current cursor and advances it.
    async fn fetch_page(&mut self) -> Result<Batch, HarvestError> {
        let rows = self.rows.to_string();
        let mut params: Vec<(&str, &str)> = self
            .params
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        params.extend([
            ("rows", rows.as_str()),
            ("sort", "id asc"),
            ("cursorMark", self.cursor.as_str()),
            ("wt", "json"),
        ]);
        let url = build_url(&self.url, &params)?;

        let body = self.fetcher.fetch(&url).await?;
        let json = parse_json("Solr", &body)?;

        let num_found = loose_count(&json["response"]["numFound"]).ok_or_else(|| {
            HarvestError::Protocol("Solr response has no response.numFound".into())
        })?;
        let docs = match &json["response"]["docs"] {
            Value::Array(docs) => docs
                .iter()
                .filter_map(|doc| doc.as_object().cloned())
                .collect::<Batch>(),
            _ => return Err(HarvestError::Protocol("Solr response has no docs".into())),
        };
        let next_cursor = json["nextCursorMark"].as_str().map(str::to_string);

        self.num_found = num_found;
        self.fetched += docs.len() as u64;

        if self.fetched > self.num_found {
            return Err(HarvestError::Integrity(format!(
                "Solr returned {} documents but numFound is {}",
                self.fetched, self.num_found
            )));
        }
        if docs.is_empty() && self.fetched < self.num_found {
            return Err(HarvestError::Integrity(format!(
                "Solr returned an empty page after {} of {} documents",
                self.fetched, self.num_found
            )));
        }

        match next_cursor {
            Some(next) if next == self.cursor && self.fetched < self.num_found => {
                return Err(HarvestError::Integrity(format!(
                    "Solr cursor stuck at '{next}' after {} of {} documents",
                    self.fetched, self.num_found
                )));
            }
            Some(next) => self.cursor = next,
            None if self.fetched < self.num_found => {
                return Err(HarvestError::Protocol(
                    "Solr response has no nextCursorMark".into(),
                ));
            }
            None => {}
        }

        tracing::debug!(
            fetched = self.fetched,
            num_found = self.num_found,
            "Fetched Solr page"
        );
        Ok(docs)
    }
}
