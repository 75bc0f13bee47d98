use serde_json::{Value, json};

use super::{build_url, loose_count, parse_json, verify_total};
use crate::config::RunConfig;
use crate::error::HarvestError;
use crate::models::{Batch, Collection, Record};
use crate::traits::{Fetcher, ObjectStore};

const FOLDER_TYPES: [&str; 4] = ["Folder", "OrderedFolder", "Organization", "Workspace"];

#[derive(Debug, Clone)]
enum Target {
    Path(String),
    Id(String),
}

/// One folder listing still to be read, at `page`.
#[derive(Debug, Clone)]
struct Frame {
    target: Target,
    page: u64,
    fetched: u64,
}

struct Listing {
    entries: Vec<Value>,
    has_next: bool,
    results_count: Option<u64>,
}

/// Deep harvest of a folder tree.
///
/// Folders are walked depth-first; every listing page that contains leaf
/// documents becomes one batch. Each leaf is enriched with its best
/// representative image (`isShownBy`) and the structural index stored at
/// `media_json/{uid}-media.json`.
pub struct NuxeoAdapter<F: Fetcher, O: ObjectStore> {
    fetcher: F,
    index_store: O,
    api_base: String,
    page_size: u32,
    stack: Vec<Frame>,
}

impl<F: Fetcher, O: ObjectStore> NuxeoAdapter<F, O> {
    pub fn new(
        collection: &Collection,
        fetcher: F,
        index_store: O,
        config: &RunConfig,
    ) -> Result<Self, HarvestError> {
        let mut api_base = collection.url_harvest.trim().to_string();
        if api_base.is_empty() {
            return Err(HarvestError::Configuration(format!(
                "Collection {} has no Nuxeo API URL",
                collection.id
            )));
        }
        if !api_base.ends_with('/') {
            api_base.push('/');
        }

        let root = collection.harvest_extra_data.trim();
        if root.is_empty() {
            return Err(HarvestError::Configuration(format!(
                "Collection {} has no Nuxeo root path",
                collection.id
            )));
        }
        let root = format!("/{}", root.trim_matches('/'));

        Ok(Self {
            fetcher,
            index_store,
            api_base,
            page_size: config.page_size,
            stack: vec![Frame {
                target: Target::Path(root),
                page: 0,
                fetched: 0,
            }],
        })
    }

    pub(crate) async fn next_batch(&mut self) -> Result<Option<Batch>, HarvestError> {
        while let Some(mut frame) = self.stack.pop() {
            let listing = self.list(&frame.target, frame.page).await?;
            frame.fetched += listing.entries.len() as u64;

            if listing.has_next {
                if listing.entries.is_empty() {
                    return Err(HarvestError::Integrity(format!(
                        "empty Nuxeo listing page {} with more pages announced",
                        frame.page
                    )));
                }
                self.stack.push(Frame {
                    page: frame.page + 1,
                    ..frame.clone()
                });
            }
            if let Some(reported) = listing.results_count {
                if !listing.has_next || frame.fetched > reported {
                    verify_total("Nuxeo listing", frame.fetched, reported)?;
                }
            }

            let mut leaves = Vec::new();
            let mut folders = Vec::new();
            for entry in listing.entries {
                let kind = entry["type"].as_str().unwrap_or_default();
                if FOLDER_TYPES.contains(&kind) {
                    if let Some(uid) = entry["uid"].as_str() {
                        folders.push(uid.to_string());
                    }
                } else {
                    leaves.push(entry);
                }
            }
            for uid in folders.into_iter().rev() {
                self.stack.push(Frame {
                    target: Target::Id(uid),
                    page: 0,
                    fetched: 0,
                });
            }

            if leaves.is_empty() {
                continue;
            }

            let mut batch = Vec::with_capacity(leaves.len());
            for leaf in leaves {
                batch.push(self.build_record(leaf).await?);
            }
            tracing::debug!(
                page = frame.page,
                records = batch.len(),
                pending_listings = self.stack.len(),
                "Nuxeo listing page harvested"
            );
            return Ok(Some(batch));
        }
        Ok(None)
    }

    fn children_url(&self, target: &Target, page: u64) -> Result<String, HarvestError> {
        let base = match target {
            Target::Path(path) => format!("{}path{}/@children", self.api_base, path),
            Target::Id(uid) => format!("{}id/{}/@children", self.api_base, uid),
        };
        build_url(
            &base,
            &[
                ("currentPageIndex", &page.to_string()),
                ("pageSize", &self.page_size.to_string()),
            ],
        )
    }

    async fn list(&self, target: &Target, page: u64) -> Result<Listing, HarvestError> {
        let url = self.children_url(target, page)?;
        let body = self.fetcher.fetch(&url).await?;
        let json = parse_json("Nuxeo", &body)?;

        let entries = match json.get("entries") {
            Some(Value::Array(entries)) => entries.clone(),
            _ => {
                return Err(HarvestError::Protocol(format!(
                    "Nuxeo listing at {url} has no entries"
                )));
            }
        };
        Ok(Listing {
            entries,
            has_next: json["isNextPageAvailable"].as_bool().unwrap_or(false),
            // Nuxeo reports -1 when it did not count.
            results_count: loose_count(&json["resultsCount"]),
        })
    }

    async fn build_record(&self, leaf: Value) -> Result<Record, HarvestError> {
        let Value::Object(mut record) = leaf else {
            return Err(HarvestError::Protocol("Nuxeo entry is not an object".into()));
        };
        let uid = record
            .get("uid")
            .and_then(Value::as_str)
            .ok_or_else(|| HarvestError::Protocol("Nuxeo entry has no uid".into()))?
            .to_string();

        let shown_by = self.representative_image(&uid, &record).await?;
        record.insert("isShownBy".into(), shown_by.unwrap_or(Value::Null));

        let key = format!("media_json/{uid}-media.json");
        match self.index_store.get(&key).await? {
            Some(bytes) => {
                let index: Value = serde_json::from_slice(&bytes).map_err(|e| {
                    HarvestError::Protocol(format!("structural index {key} is not JSON: {e}"))
                })?;
                record.insert("structmap_text".into(), Value::String(structmap_text(&index)));
                record.insert("structmap_index".into(), index);
            }
            None => {
                tracing::warn!(%uid, %key, "No structural index for document");
                record.insert("structmap_text".into(), Value::String(String::new()));
            }
        }
        Ok(record)
    }

    async fn representative_image(
        &self,
        uid: &str,
        record: &Record,
    ) -> Result<Option<Value>, HarvestError> {
        let properties = record.get("properties").cloned().unwrap_or(Value::Null);
        if let Some(url) = image_content(&properties) {
            return Ok(Some(shown_by(url, "file:content")));
        }

        let listing = self.list(&Target::Id(uid.to_string()), 0).await?;
        if let Some(url) = listing
            .entries
            .iter()
            .find_map(|child| image_content(&child["properties"]))
        {
            return Ok(Some(shown_by(url, "component")));
        }

        let mime = properties["file:content"]["mime-type"]
            .as_str()
            .unwrap_or_default();
        if mime == "application/pdf" || mime.starts_with("video/") {
            if let Some(url) = properties["thumbnail:thumbnail"]["data"].as_str() {
                return Ok(Some(shown_by(url, "thumbnail")));
            }
        }
        Ok(None)
    }
}

fn image_content(properties: &Value) -> Option<&str> {
    let content = &properties["file:content"];
    let mime = content["mime-type"].as_str()?;
    if mime.starts_with("image/") {
        content["data"].as_str()
    } else {
        None
    }
}

fn shown_by(url: &str, source: &str) -> Value {
    json!({ "url": url, "source": source })
}

/// Labels of the object and its structMap entries, space-joined.
fn structmap_text(index: &Value) -> String {
    let mut labels = Vec::new();
    if let Some(label) = index["label"].as_str() {
        labels.push(label);
    }
    if let Some(items) = index["structMap"].as_array() {
        labels.extend(items.iter().filter_map(|item| item["label"].as_str()));
    }
    labels
        .into_iter()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
