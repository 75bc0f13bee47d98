use std::collections::VecDeque;

use serde_json::{Value, json};

use crate::config::RunConfig;
use crate::error::HarvestError;
use crate::models::{Batch, Collection, Record};
use crate::traits::Fetcher;
use crate::xml::{self, Element};

/// Maps a MARCXML `<record>` to `{leader, fields: [...]}`.
///
/// Control fields become `{tag: value}`, data fields
/// `{tag: {ind1, ind2, subfields: [{code: value}]}}`. Control field `001`
/// is also copied to `id`.
pub fn marc_record_to_json(record: &Element) -> Record {
    let mut out = Record::new();
    let mut fields = Vec::new();

    for child in &record.children {
        match child.name.as_str() {
            "leader" => {
                out.insert("leader".into(), Value::String(child.text().to_string()));
            }
            "controlfield" => {
                let tag = child.attr("tag").unwrap_or_default();
                if tag == "001" {
                    out.insert("id".into(), Value::String(child.text().to_string()));
                }
                fields.push(json!({ tag: child.text() }));
            }
            "datafield" => {
                let tag = child.attr("tag").unwrap_or_default();
                let subfields: Vec<Value> = child
                    .children_named("subfield")
                    .map(|sf| json!({ sf.attr("code").unwrap_or_default(): sf.text() }))
                    .collect();
                fields.push(json!({
                    tag: {
                        "ind1": child.attr("ind1").unwrap_or(" "),
                        "ind2": child.attr("ind2").unwrap_or(" "),
                        "subfields": subfields,
                    }
                }));
            }
            _ => {}
        }
    }

    out.insert("fields".into(), Value::Array(fields));
    out
}

/// Harvests a single MARCXML collection document, emitted in fixed-size
/// batches.
///
/// The feed reports no record count, so there is no total to verify.
pub struct MarcAdapter<F: Fetcher> {
    fetcher: F,
    url: String,
    batch_size: usize,
    pending: Option<VecDeque<Record>>,
}

impl<F: Fetcher> MarcAdapter<F> {
    pub fn new(collection: &Collection, fetcher: F, config: &RunConfig) -> Result<Self, HarvestError> {
        if collection.url_harvest.trim().is_empty() {
            return Err(HarvestError::Configuration(format!(
                "Collection {} has no MARC feed URL",
                collection.id
            )));
        }
        Ok(Self {
            fetcher,
            url: collection.url_harvest.trim().to_string(),
            batch_size: config.page_size as usize,
            pending: None,
        })
    }

    pub(crate) async fn next_batch(&mut self) -> Result<Option<Batch>, HarvestError> {
        if self.pending.is_none() {
            let body = self.fetcher.fetch(&self.url).await?;
            let records = parse_collection(&body)?;
            tracing::info!(url = %self.url, records = records.len(), "Parsed MARC feed");
            self.pending = Some(records);
        }

        let Some(pending) = self.pending.as_mut() else {
            return Ok(None);
        };
        if pending.is_empty() {
            return Ok(None);
        }

        let take = self.batch_size.min(pending.len());
        Ok(Some(pending.drain(..take).collect()))
    }
}

fn parse_collection(body: &str) -> Result<VecDeque<Record>, HarvestError> {
    let root = xml::parse(body)?;
    let records: Vec<&Element> = match root.name.as_str() {
        "record" => vec![&root],
        "collection" => root.children_named("record").collect(),
        other => {
            return Err(HarvestError::Protocol(format!(
                "Expected a MARCXML collection, found <{other}>"
            )));
        }
    };
    Ok(records.into_iter().map(marc_record_to_json).collect())
}
