use serde_json::Value;

use super::{build_url, extra_data_pairs, loose_count, parse_json, verify_total};
use crate::config::RunConfig;
use crate::error::HarvestError;
use crate::models::{Batch, Collection};
use crate::traits::Fetcher;

const API_URL: &str = "https://www.googleapis.com/youtube/v3/playlistItems";
const MAX_RESULTS: u32 = 50;

/// Token-paged harvest of a YouTube playlist.
pub struct YoutubeAdapter<F: Fetcher> {
    fetcher: F,
    api_url: String,
    api_key: String,
    playlist_id: String,
    max_results: u32,
    page_token: Option<String>,
    total: Option<u64>,
    fetched: u64,
    finished: bool,
}

impl<F: Fetcher> YoutubeAdapter<F> {
    pub fn new(collection: &Collection, fetcher: F, config: &RunConfig) -> Result<Self, HarvestError> {
        let api_key = config.credentials.youtube_api_key.clone().ok_or_else(|| {
            HarvestError::Configuration("YOUTUBE_API_KEY is required for YouTube collections".into())
        })?;
        let playlist_id = extra_data_pairs(&collection.harvest_extra_data, "playlistId")
            .into_iter()
            .find(|(key, _)| key == "playlistId")
            .map(|(_, value)| value)
            .ok_or_else(|| {
                HarvestError::Configuration(format!(
                    "Collection {} needs a playlist id in harvest_extra_data",
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
            playlist_id,
            max_results: config.page_size.min(MAX_RESULTS),
            page_token: None,
            total: None,
            fetched: 0,
            finished: false,
        })
    }

    pub(crate) async fn next_batch(&mut self) -> Result<Option<Batch>, HarvestError> {
        if self.finished {
            return Ok(None);
        }
        if let Some(total) = self.total {
            if self.fetched >= total {
                verify_total("YouTube", self.fetched, total)?;
                return Ok(None);
            }
        }

        let max_results = self.max_results.to_string();
        let mut params = vec![
            ("part", "snippet"),
            ("maxResults", max_results.as_str()),
            ("playlistId", self.playlist_id.as_str()),
            ("key", self.api_key.as_str()),
        ];
        if let Some(token) = &self.page_token {
            params.push(("pageToken", token.as_str()));
        }
        let url = build_url(&self.api_url, &params)?;

        let body = self.fetcher.fetch(&url).await?;
        let json = parse_json("YouTube", &body)?;
        if let Some(error) = json.get("error") {
            return Err(HarvestError::Protocol(format!(
                "YouTube API error: {}",
                error["message"].as_str().unwrap_or("unknown")
            )));
        }

        let total = loose_count(&json["pageInfo"]["totalResults"]).ok_or_else(|| {
            HarvestError::Protocol("YouTube response has no pageInfo.totalResults".into())
        })?;
        self.total = Some(total);

        let items: Batch = match &json["items"] {
            Value::Array(items) => items.iter().filter_map(|i| i.as_object().cloned()).collect(),
            _ => Vec::new(),
        };
        self.fetched += items.len() as u64;
        self.page_token = json["nextPageToken"].as_str().map(str::to_string);

        if items.is_empty() {
            self.finished = true;
            verify_total("YouTube", self.fetched, total)?;
            return Ok(None);
        }
        if self.page_token.is_none() || self.fetched > total {
            self.finished = true;
            verify_total("YouTube", self.fetched, total)?;
        }

        tracing::debug!(fetched = self.fetched, total, "Fetched YouTube page");
        Ok(Some(items))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::config::SourceCredentials;
    use crate::models::HarvestType;
    use crate::testutil::*;

    fn page(total: u64, ids: std::ops::Range<u32>, next: Option<&str>) -> Result<String, HarvestError> {
        let items: Vec<Value> = ids
            .map(|i| json!({"id": format!("item{i}"), "snippet": {"title": format!("Video {i}")}}))
            .collect();
        let mut body = json!({"pageInfo": {"totalResults": total}, "items": items});
        if let Some(next) = next {
            body["nextPageToken"] = json!(next);
        }
        Ok(body.to_string())
    }

    fn adapter(fetcher: MockFetcher) -> YoutubeAdapter<MockFetcher> {
        let mut collection = make_test_collection(HarvestType::Youtube);
        collection.url_harvest = String::new();
        collection.harvest_extra_data = "PLabc".into();
        let config = test_run_config().with_credentials(SourceCredentials {
            flickr_api_key: None,
            youtube_api_key: Some("yt".into()),
        });
        YoutubeAdapter::new(&collection, fetcher, &config).unwrap()
    }

    #[tokio::test]
    async fn follows_page_tokens() {
        let fetcher = MockFetcher::with_responses(vec![
            page(3, 0..2, Some("CAIQAA")),
            page(3, 2..3, None),
        ]);
        let mut adapter = adapter(fetcher.clone());

        assert_eq!(adapter.next_batch().await.unwrap().unwrap().len(), 2);
        assert_eq!(adapter.next_batch().await.unwrap().unwrap().len(), 1);
        assert!(adapter.next_batch().await.unwrap().is_none());

        let requests = fetcher.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].contains("playlistId=PLabc"));
        assert!(requests[0].contains("maxResults=50"));
        assert!(!requests[0].contains("pageToken"));
        assert!(requests[1].contains("pageToken=CAIQAA"));
    }

    #[tokio::test]
    async fn last_page_short_of_total_is_integrity_error() {
        let fetcher = MockFetcher::with_responses(vec![page(4, 0..2, None)]);
        let mut adapter = adapter(fetcher);

        assert!(matches!(
            adapter.next_batch().await,
            Err(HarvestError::Integrity(_))
        ));
    }

    #[tokio::test]
    async fn more_items_than_total_fails_before_next_page() {
        let fetcher = MockFetcher::with_responses(vec![
            page(1, 0..2, Some("CAIQAA")),
            page(1, 2..3, None),
        ]);
        let mut adapter = adapter(fetcher.clone());

        assert!(matches!(
            adapter.next_batch().await,
            Err(HarvestError::Integrity(_))
        ));
        assert!(adapter.next_batch().await.unwrap().is_none());
        assert_eq!(fetcher.requests().len(), 1);
    }

    #[tokio::test]
    async fn total_reached_with_token_left_is_exhaustion() {
        let fetcher = MockFetcher::with_responses(vec![page(2, 0..2, Some("CAIQAA"))]);
        let mut adapter = adapter(fetcher.clone());

        assert_eq!(adapter.next_batch().await.unwrap().unwrap().len(), 2);
        assert!(adapter.next_batch().await.unwrap().is_none());
        assert_eq!(fetcher.requests().len(), 1);
    }

    #[tokio::test]
    async fn api_error_is_protocol_error() {
        let fetcher = MockFetcher::with_responses(vec![Ok(
            json!({"error": {"code": 404, "message": "playlistNotFound"}}).to_string(),
        )]);
        let mut adapter = adapter(fetcher);

        assert!(matches!(adapter.next_batch().await, Err(HarvestError::Protocol(_))));
    }
}
