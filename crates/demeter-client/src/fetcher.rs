use std::time::Duration;

use demeter_core::error::HarvestError;
use demeter_core::traits::Fetcher;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, StatusCode};

/// HTTP fetcher using reqwest.
///
/// Downloads raw response bodies with a fixed User-Agent and timeout.
/// Throttling (429) and server errors (5xx) surface as
/// [`HarvestError::TransientNetwork`] so callers can retry them; other
/// non-success statuses are [`HarvestError::Http`].
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: Client,
    headers: HeaderMap,
    timeout_secs: u64,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self, HarvestError> {
        Self::with_timeout(Duration::from_secs(60))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, HarvestError> {
        let client = Client::builder()
            .user_agent("Demeter/0.3 (metadata harvester)")
            .timeout(timeout)
            .build()
            .map_err(|e| HarvestError::Http(e.to_string()))?;

        Ok(Self {
            client,
            headers: HeaderMap::new(),
            timeout_secs: timeout.as_secs(),
        })
    }

    /// Sends `name: value` with every request.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, HarvestError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| HarvestError::Configuration(format!("Invalid header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| HarvestError::Configuration(format!("Invalid value for header {name}: {e}")))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Adds the headers the Nuxeo REST API expects: all document
    /// properties, plus the authentication token when one is configured.
    pub fn with_nuxeo_token(self, token: Option<&str>) -> Result<Self, HarvestError> {
        let fetcher = self.with_header("X-NXDocumentProperties", "*")?;
        match token {
            Some(token) => fetcher.with_header("X-Authentication-Token", token),
            None => Ok(fetcher),
        }
    }
}

fn classify_status(status: StatusCode, url: &str) -> HarvestError {
    let message = format!("HTTP {} for {url}", status.as_u16());
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        HarvestError::TransientNetwork(message)
    } else {
        HarvestError::Http(message)
    }
}

impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str) -> Result<String, HarvestError> {
        tracing::debug!(%url, "Fetching");

        let response = self
            .client
            .get(url)
            .headers(self.headers.clone())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    HarvestError::Timeout(self.timeout_secs)
                } else if e.is_connect() {
                    HarvestError::TransientNetwork(format!("Connection failed: {e}"))
                } else {
                    HarvestError::Http(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, url));
        }

        response.text().await.map_err(|e| {
            HarvestError::TransientNetwork(format!("Failed to read response body: {e}"))
        })
    }
}
