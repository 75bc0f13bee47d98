use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::error::HarvestError;

const DEFAULT_REGISTRY_BASE: &str = "https://registry.cdlib.org";
const DEFAULT_PAGE_SIZE: u32 = 100;

/// Bounded exponential backoff used by the grouped-paging adapter.
///
/// Attempt `n` (1-indexed) that fails waits `initial_delay * 2^(n-1)`
/// before attempt `n + 1`.
#[derive(Debug, Clone)]
pub struct PagingRetry {
    pub attempts: u32,
    pub initial_delay: Duration,
}

impl Default for PagingRetry {
    fn default() -> Self {
        Self {
            attempts: 5,
            initial_delay: Duration::from_secs(5),
        }
    }
}

impl PagingRetry {
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.initial_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// API keys for social-media sources.
#[derive(Debug, Clone, Default)]
pub struct SourceCredentials {
    pub flickr_api_key: Option<String>,
    pub youtube_api_key: Option<String>,
}

/// Settings shared by every harvest run a process performs.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Root of the local scratch buffer.
    pub scratch_dir: PathBuf,
    /// Base for resolving registry-relative URIs.
    pub registry_base: Url,
    /// Preferred page size for sources that let the client choose.
    pub page_size: u32,
    pub retry: PagingRetry,
    pub credentials: SourceCredentials,
}

impl RunConfig {
    pub fn new(scratch_dir: impl Into<PathBuf>, registry_base: Url) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            registry_base,
            page_size: DEFAULT_PAGE_SIZE,
            retry: PagingRetry::default(),
            credentials: SourceCredentials::default(),
        }
    }

    /// Read configuration from environment variables.
    ///
    /// - `DEMETER_SCRATCH_DIR` (optional, defaults to `$TMPDIR/demeter`)
    /// - `DEMETER_REGISTRY_BASE` (optional, defaults to the public registry)
    /// - `DEMETER_PAGE_SIZE` (optional, defaults to 100)
    /// - `FLICKR_API_KEY`, `YOUTUBE_API_KEY` (optional)
    pub fn from_env() -> Result<Self, HarvestError> {
        let scratch_dir = std::env::var("DEMETER_SCRATCH_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::temp_dir().join("demeter"));

        let raw_base = std::env::var("DEMETER_REGISTRY_BASE")
            .unwrap_or_else(|_| DEFAULT_REGISTRY_BASE.to_string());
        let registry_base = Url::parse(&raw_base).map_err(|e| {
            HarvestError::Configuration(format!("Invalid DEMETER_REGISTRY_BASE '{raw_base}': {e}"))
        })?;

        let page_size = match std::env::var("DEMETER_PAGE_SIZE") {
            Err(_) => DEFAULT_PAGE_SIZE,
            Ok(raw) => {
                let parsed: u32 = raw.parse().map_err(|_| {
                    HarvestError::Configuration(format!(
                        "Invalid DEMETER_PAGE_SIZE '{raw}': must be a positive integer"
                    ))
                })?;
                if parsed == 0 {
                    return Err(HarvestError::Configuration(
                        "DEMETER_PAGE_SIZE must be at least 1".into(),
                    ));
                }
                parsed
            }
        };

        Ok(Self {
            scratch_dir,
            registry_base,
            page_size,
            retry: PagingRetry::default(),
            credentials: SourceCredentials {
                flickr_api_key: std::env::var("FLICKR_API_KEY").ok(),
                youtube_api_key: std::env::var("YOUTUBE_API_KEY").ok(),
            },
        })
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_retry(mut self, retry: PagingRetry) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_credentials(mut self, credentials: SourceCredentials) -> Self {
        self.credentials = credentials;
        self
    }
}
