use serde_json::Value;

use super::{build_url, extra_data_pairs, loose_count, parse_json, verify_total};
use crate::config::RunConfig;
use crate::error::HarvestError;
use crate::models::{Batch, Collection};
use crate::traits::Fetcher;

const API_URL: &str = "https://api.flickr.com/services/rest/";
const MAX_PER_PAGE: u32 = 500;
const PHOTO_EXTRAS: &str = "description,license,date_upload,date_taken,owner_name,tags,media,url_o";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Scope {
    Photoset(String),
    User(String),
}

impl Scope {
    fn method(&self) -> &'static str {
        match self {
            Scope::Photoset(_) => "flickr.photosets.getPhotos",
            Scope::User(_) => "flickr.people.getPublicPhotos",
        }
    }

    fn container(&self) -> &'static str {
        match self {
            Scope::Photoset(_) => "photoset",
            Scope::User(_) => "photos",
        }
    }
}

/// Page-numbered harvest of a Flickr photo set or a user's public photos.
///
/// `harvest_extra_data` is a bare photoset id or `user_id=...`.
pub struct FlickrAdapter<F: Fetcher> {
    fetcher: F,
    api_url: String,
    api_key: String,
    scope: Scope,
    per_page: u32,
    page: u64,
    total: Option<u64>,
    fetched: u64,
}

impl<F: Fetcher> FlickrAdapter<F> {
    pub fn new(collection: &Collection, fetcher: F, config: &RunConfig) -> Result<Self, HarvestError> {
        let api_key = config.credentials.flickr_api_key.clone().ok_or_else(|| {
            HarvestError::Configuration("FLICKR_API_KEY is required for Flickr collections".into())
        })?;

        let pairs = extra_data_pairs(&collection.harvest_extra_data, "photoset_id");
        let scope = pairs
            .into_iter()
            .find_map(|(key, value)| match key.as_str() {
                "photoset_id" => Some(Scope::Photoset(value)),
                "user_id" => Some(Scope::User(value)),
                _ => None,
            })
            .ok_or_else(|| {
                HarvestError::Configuration(format!(
                    "Collection {} needs a photoset id or user_id in harvest_extra_data",
                    collection.id
                ))
            })?;

        let api_url = match collection.url_harvest.trim() {
            "" => API_URL.to_string(),
            url => url.to_string(),
        };

        Ok(Self {
            fetcher,
            api_url,
            api_key,
            scope,
            per_page: config.page_size.min(MAX_PER_PAGE),
            page: 0,
            total: None,
            fetched: 0,
        })
    }

    pub(crate) async fn next_batch(&mut self) -> Result<Option<Batch>, HarvestError> {
        if let Some(total) = self.total {
            if self.fetched >= total {
                verify_total("Flickr", self.fetched, total)?;
                return Ok(None);
            }
        }

        self.page += 1;
        let page = self.page.to_string();
        let per_page = self.per_page.to_string();
        let (id_key, id) = match &self.scope {
            Scope::Photoset(id) => ("photoset_id", id.as_str()),
            Scope::User(id) => ("user_id", id.as_str()),
        };
        let url = build_url(
            &self.api_url,
            &[
                ("method", self.scope.method()),
                ("api_key", &self.api_key),
                (id_key, id),
                ("extras", PHOTO_EXTRAS),
                ("format", "json"),
                ("nojsoncallback", "1"),
                ("page", &page),
                ("per_page", &per_page),
            ],
        )?;

        let body = self.fetcher.fetch(&url).await?;
        let json = parse_json("Flickr", &body)?;
        if json["stat"].as_str() != Some("ok") {
            return Err(HarvestError::Protocol(format!(
                "Flickr API error {}: {}",
                json["code"],
                json["message"].as_str().unwrap_or("unknown")
            )));
        }

        let container = &json[self.scope.container()];
        let total = loose_count(&container["total"]).ok_or_else(|| {
            HarvestError::Protocol(format!("Flickr {} has no total", self.scope.container()))
        })?;
        self.total = Some(total);

        let photos: Batch = match &container["photo"] {
            Value::Array(photos) => photos.iter().filter_map(|p| p.as_object().cloned()).collect(),
            _ => Vec::new(),
        };

        if photos.is_empty() {
            verify_total("Flickr", self.fetched, total)?;
            return Ok(None);
        }

        self.fetched += photos.len() as u64;
        tracing::debug!(page = self.page, fetched = self.fetched, total, "Fetched Flickr page");
        if self.fetched > total {
            verify_total("Flickr", self.fetched, total)?;
        }
        Ok(Some(photos))
    }
}
