use std::fmt;

use super::{build_url, verify_total};
use crate::config::{PagingRetry, RunConfig};
use crate::error::HarvestError;
use crate::models::{Batch, Collection, Record};
use crate::traits::Fetcher;
use crate::xml::{self, Element, fields_to_record};

/// Result facets served by the archive search API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OacGroup {
    Image,
    Text,
    /// Reported in totals but never harvested.
    Website,
}

impl OacGroup {
    /// Harvest priority. `Website` is never selected.
    const ORDER: [OacGroup; 2] = [OacGroup::Image, OacGroup::Text];

    pub fn as_str(&self) -> &'static str {
        match self {
            OacGroup::Image => "image",
            OacGroup::Text => "text",
            OacGroup::Website => "website",
        }
    }

    fn from_value(value: &str) -> Option<Self> {
        match value {
            "image" => Some(OacGroup::Image),
            "text" => Some(OacGroup::Text),
            "website" => Some(OacGroup::Website),
            _ => None,
        }
    }

    fn index(&self) -> usize {
        match self {
            OacGroup::Image => 0,
            OacGroup::Text => 1,
            OacGroup::Website => 2,
        }
    }
}

impl fmt::Display for OacGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct GroupCursor {
    /// Last document index delivered (1-based, inclusive). 0 before the
    /// first page.
    end: u64,
    total: u64,
}

impl GroupCursor {
    fn is_done(&self) -> bool {
        self.end >= self.total
    }
}

struct GroupPage {
    totals: [u64; 3],
    docs: Batch,
    end_doc: Option<u64>,
}

/// Grouped-paging harvest over the image and text facets of an archive
/// search API.
pub struct OacAdapter<F: Fetcher> {
    fetcher: F,
    url: String,
    page_size: u32,
    retry: PagingRetry,
    cursors: [GroupCursor; 3],
    current: Option<OacGroup>,
    pending: Option<Batch>,
    fetched: u64,
}

impl<F: Fetcher> OacAdapter<F> {
    /// Fetches the first image page to learn every group's total.
    pub async fn connect(
        collection: &Collection,
        fetcher: F,
        config: &RunConfig,
    ) -> Result<Self, HarvestError> {
        let url = collection.url_harvest.trim().to_string();
        if url.is_empty() {
            return Err(HarvestError::Configuration(format!(
                "Collection {} has no search URL",
                collection.id
            )));
        }

        let mut adapter = Self {
            fetcher,
            url,
            page_size: config.page_size,
            retry: config.retry.clone(),
            cursors: [GroupCursor::default(); 3],
            current: None,
            pending: None,
            fetched: 0,
        };

        let first = adapter.fetch_group(OacGroup::Image, 1).await?;
        for (cursor, total) in adapter.cursors.iter_mut().zip(first.totals) {
            cursor.total = total;
        }

        let image = adapter.cursors[OacGroup::Image.index()].total;
        let text = adapter.cursors[OacGroup::Text.index()].total;
        if image + text == 0 {
            return Err(HarvestError::NoResults(format!(
                "no image or text documents at {}",
                adapter.url
            )));
        }

        if image > 0 {
            adapter.accept(OacGroup::Image, first.docs.len() as u64, first.end_doc)?;
            adapter.pending = Some(first.docs);
            adapter.current = Some(OacGroup::Image);
        } else {
            adapter.current = Some(OacGroup::Text);
        }

        tracing::info!(
            url = %adapter.url,
            image,
            text,
            website = adapter.cursors[OacGroup::Website.index()].total,
            "Grouped search totals"
        );
        Ok(adapter)
    }

    pub(crate) async fn next_batch(&mut self) -> Result<Option<Batch>, HarvestError> {
        if let Some(batch) = self.pending.take() {
            self.deliver(batch.len() as u64)?;
            return Ok(Some(batch));
        }

        loop {
            let Some(group) = self.current else {
                verify_total("grouped search", self.fetched, self.expected())?;
                return Ok(None);
            };

            let cursor = self.cursors[group.index()];
            if cursor.is_done() {
                self.current = OacGroup::ORDER
                    .iter()
                    .copied()
                    .skip_while(|g| *g != group)
                    .nth(1);
                tracing::debug!(from = %group, to = ?self.current, "Switching result group");
                continue;
            }

            let page = self.fetch_group(group, cursor.end + 1).await?;
            self.accept(group, page.docs.len() as u64, page.end_doc)?;
            self.deliver(page.docs.len() as u64)?;
            return Ok(Some(page.docs));
        }
    }

    fn expected(&self) -> u64 {
        self.cursors[OacGroup::Image.index()].total + self.cursors[OacGroup::Text.index()].total
    }

    /// Counts delivered documents; more than the image and text totals
    /// means the server handed out documents twice.
    fn deliver(&mut self, count: u64) -> Result<(), HarvestError> {
        self.fetched += count;
        let expected = self.expected();
        if self.fetched > expected {
            return Err(HarvestError::Integrity(format!(
                "grouped search delivered {} documents, only {expected} reported",
                self.fetched
            )));
        }
        Ok(())
    }

    /// Advances a group's cursor. The cursor must move forward and stay
    /// within the group's total.
    fn accept(&mut self, group: OacGroup, count: u64, end_doc: Option<u64>) -> Result<(), HarvestError> {
        let cursor = &mut self.cursors[group.index()];
        if count == 0 {
            return Err(HarvestError::Integrity(format!(
                "empty {group} page after {} of {} documents",
                cursor.end, cursor.total
            )));
        }

        let end = end_doc.unwrap_or(cursor.end + count);
        if end <= cursor.end {
            return Err(HarvestError::Integrity(format!(
                "{group} page ended at document {end}, already past {}",
                cursor.end
            )));
        }
        if end > cursor.total {
            return Err(HarvestError::Integrity(format!(
                "{group} page ended at document {end} of {}",
                cursor.total
            )));
        }
        cursor.end = end;
        Ok(())
    }

    /// One page of a group, retried with backoff on transient failures.
    async fn fetch_group(&self, group: OacGroup, start: u64) -> Result<GroupPage, HarvestError> {
        let url = build_url(
            &self.url,
            &[
                ("docsPerPage", &self.page_size.to_string()),
                ("startDoc", &start.to_string()),
                ("group", group.as_str()),
            ],
        )?;

        let mut attempt = 1;
        loop {
            let result = match self.fetcher.fetch(&url).await {
                Ok(body) => parse_page(&body, group),
                Err(e) => Err(e),
            };
            match result {
                Ok(page) => return Ok(page),
                Err(e) if e.is_transient_decode() && attempt < self.retry.attempts => {
                    let delay = self.retry.delay_after(attempt);
                    tracing::warn!(
                        error = %e,
                        attempt,
                        delay_secs = delay.as_secs(),
                        %group,
                        start,
                        "Grouped search page failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn parse_page(body: &str, wanted: OacGroup) -> Result<GroupPage, HarvestError> {
    let root = xml::parse(body)?;
    if root.name != "crossQueryResult" {
        return Err(HarvestError::Protocol(format!(
            "expected crossQueryResult, found <{}>",
            root.name
        )));
    }

    let mut groups = Vec::new();
    root.find_all("group", &mut groups);

    let mut totals = [0u64; 3];
    let mut docs = Vec::new();
    let mut end_doc = None;
    for element in groups {
        let Some(group) = element.attr("value").and_then(OacGroup::from_value) else {
            continue;
        };
        totals[group.index()] = parse_count(element, "totalDocs")?;
        if group == wanted {
            docs = element.children_named("docHit").map(doc_to_record).collect();
            end_doc = element
                .attr("endDoc")
                .and_then(|v| v.trim().parse().ok())
                .filter(|end| *end > 0);
        }
    }

    Ok(GroupPage {
        totals,
        docs,
        end_doc,
    })
}

fn parse_count(element: &Element, attr: &str) -> Result<u64, HarvestError> {
    match element.attr(attr) {
        None => Ok(0),
        Some(raw) => raw.trim().parse().map_err(|_| {
            HarvestError::Protocol(format!("non-numeric {attr} '{raw}' in result group"))
        }),
    }
}

fn doc_to_record(hit: &Element) -> Record {
    match hit.child("meta") {
        Some(meta) => fields_to_record(&meta.children, |e| e.name.clone()),
        None => Record::new(),
    }
}
