use std::collections::VecDeque;

use serde_json::{Map, Value};

use super::{build_url, extra_data_pairs, marc_record_to_json, verify_total};
use crate::error::HarvestError;
use crate::models::{Batch, Collection, Record};
use crate::traits::Fetcher;
use crate::xml::{self, Element, fields_to_record};

const DEFAULT_PREFIX: &str = "oai_dc";

/// How the `<metadata>` payload of each record is flattened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataFormat {
    /// Simple Dublin Core. Keys are element local names.
    Dc,
    /// Qualified Dublin Core. Keys keep their prefix (`dcterms:abstract`).
    Qdc,
    MarcXml,
    /// DIDL packages. Components flatten into `component_{n}` keys.
    Didl,
    /// Anything else is read like simple DC.
    Other(String),
}

impl MetadataFormat {
    pub fn from_prefix(prefix: &str) -> Self {
        match prefix.to_lowercase().as_str() {
            "oai_dc" => MetadataFormat::Dc,
            "oai_qdc" | "qdc" => MetadataFormat::Qdc,
            "marc21" | "marcxml" | "marc" => MetadataFormat::MarcXml,
            "didl" => MetadataFormat::Didl,
            _ => MetadataFormat::Other(prefix.to_string()),
        }
    }
}

/// OAI-PMH `ListRecords` harvest, one record per batch.
pub struct OaiAdapter<F: Fetcher> {
    fetcher: F,
    base_url: String,
    prefix: String,
    set: Option<String>,
    format: MetadataFormat,
    buffer: VecDeque<Record>,
    resumption_token: Option<String>,
    complete_list_size: Option<u64>,
    /// Records seen so far, deletion tombstones included.
    seen: u64,
    started: bool,
}

impl<F: Fetcher> OaiAdapter<F> {
    pub fn new(collection: &Collection, fetcher: F) -> Result<Self, HarvestError> {
        let base_url = collection.url_harvest.trim().to_string();
        if base_url.is_empty() {
            return Err(HarvestError::Configuration(format!(
                "Collection {} has no OAI endpoint",
                collection.id
            )));
        }

        let mut prefix = DEFAULT_PREFIX.to_string();
        let mut set = None;
        for (key, value) in extra_data_pairs(&collection.harvest_extra_data, "set") {
            match key.as_str() {
                "set" => set = Some(value),
                "metadataPrefix" => prefix = value,
                other => tracing::debug!(key = other, "Ignoring unknown OAI extra parameter"),
            }
        }

        Ok(Self {
            fetcher,
            base_url,
            format: MetadataFormat::from_prefix(&prefix),
            prefix,
            set,
            buffer: VecDeque::new(),
            resumption_token: None,
            complete_list_size: None,
            seen: 0,
            started: false,
        })
    }

    pub(crate) async fn next_batch(&mut self) -> Result<Option<Batch>, HarvestError> {
        loop {
            if let Some(record) = self.buffer.pop_front() {
                return Ok(Some(vec![record]));
            }
            if self.started && self.resumption_token.is_none() {
                if let Some(total) = self.complete_list_size {
                    verify_total("OAI-PMH", self.seen, total)?;
                }
                return Ok(None);
            }
            self.fetch_page().await?;
        }
    }

    async fn fetch_page(&mut self) -> Result<(), HarvestError> {
        let requested = self.resumption_token.take();
        let url = match &requested {
            Some(token) => build_url(
                &self.base_url,
                &[("verb", "ListRecords"), ("resumptionToken", token)],
            )?,
            None => {
                let mut params = vec![("verb", "ListRecords"), ("metadataPrefix", self.prefix.as_str())];
                if let Some(set) = &self.set {
                    params.push(("set", set.as_str()));
                }
                build_url(&self.base_url, &params)?
            }
        };
        self.started = true;

        let body = self.fetcher.fetch(&url).await?;
        let root = xml::parse(&body)?;

        if let Some(error) = root.child("error") {
            let code = error.attr("code").unwrap_or_default();
            if code == "noRecordsMatch" {
                tracing::info!(url = %url, "OAI endpoint reported noRecordsMatch");
                return Ok(());
            }
            return Err(HarvestError::Protocol(format!(
                "OAI-PMH error '{code}': {}",
                error.text()
            )));
        }

        let list = root.child("ListRecords").ok_or_else(|| {
            HarvestError::Protocol("OAI-PMH response has neither ListRecords nor error".into())
        })?;

        for record in list.children_named("record") {
            self.seen += 1;
            let Some(header) = record.child("header") else {
                return Err(HarvestError::Protocol("OAI record without header".into()));
            };
            if header.attr("status") == Some("deleted") {
                continue;
            }
            let converted = self.convert(header, record.child("metadata"));
            self.buffer.push_back(converted);
        }

        if let Some(token) = list.child("resumptionToken") {
            if let Some(size) = token.attr("completeListSize").and_then(|s| s.trim().parse().ok()) {
                self.complete_list_size = Some(size);
            }
            let text = token.text();
            if !text.is_empty() {
                if requested.as_deref() == Some(text) {
                    return Err(HarvestError::Integrity(format!(
                        "OAI-PMH resumption token '{text}' repeated after {} records",
                        self.seen
                    )));
                }
                self.resumption_token = Some(text.to_string());
            }
        }

        if let Some(total) = self.complete_list_size {
            if self.seen > total {
                verify_total("OAI-PMH", self.seen, total)?;
            }
        }

        tracing::debug!(
            seen = self.seen,
            buffered = self.buffer.len(),
            more = self.resumption_token.is_some(),
            "Fetched OAI page"
        );
        Ok(())
    }

    fn convert(&self, header: &Element, metadata: Option<&Element>) -> Record {
        let mut record = match metadata.and_then(|m| m.children.first()) {
            Some(payload) => self.flatten(payload),
            None => Record::new(),
        };

        if let Some(id) = header.child("identifier") {
            record.insert("id".into(), Value::String(id.text().to_string()));
        }
        if let Some(stamp) = header.child("datestamp") {
            record.insert("datestamp".into(), Value::String(stamp.text().to_string()));
        }
        let sets: Vec<Value> = header
            .children_named("setSpec")
            .map(|s| Value::String(s.text().to_string()))
            .collect();
        if !sets.is_empty() {
            record.insert("setSpec".into(), Value::Array(sets));
        }
        record
    }

    fn flatten(&self, payload: &Element) -> Record {
        match &self.format {
            MetadataFormat::Dc | MetadataFormat::Other(_) => {
                fields_to_record(&payload.children, |e| e.name.clone())
            }
            MetadataFormat::Qdc => fields_to_record(&payload.children, |e| e.qname.clone()),
            MetadataFormat::MarcXml => {
                let marc = if payload.name == "record" {
                    Some(payload)
                } else {
                    payload.find("record")
                };
                marc.map(marc_record_to_json).unwrap_or_default()
            }
            MetadataFormat::Didl => flatten_didl(payload),
        }
    }
}

/// Descriptive DC fields by local name, plus one `component_{n}` object per
/// DIDL component holding its resource attributes and any DC inside it.
fn flatten_didl(payload: &Element) -> Record {
    let mut components = Vec::new();
    payload.find_all("Component", &mut components);

    let mut record = Record::new();
    if let Some(dc) = payload.find("dc") {
        record = fields_to_record(&dc.children, |e| e.name.clone());
    }

    for (n, component) in components.into_iter().enumerate() {
        let mut out = Map::new();
        let mut resources = Vec::new();
        component.find_all("Resource", &mut resources);
        for resource in resources {
            for (key, value) in &resource.attrs {
                out.insert(key.clone(), Value::String(value.clone()));
            }
            if !resource.text().is_empty() {
                out.insert("content".into(), Value::String(resource.text().to_string()));
            }
        }
        if let Some(dc) = component.find("dc") {
            out.extend(fields_to_record(&dc.children, |e| e.name.clone()));
        }
        record.insert(format!("component_{n}"), Value::Object(out));
    }
    record
}
