use thiserror::Error;

/// Failure taxonomy shared by adapters, the harvest controller, and the
/// job dispatcher.
#[derive(Error, Debug)]
pub enum HarvestError {
    /// Unsupported harvest type, malformed collection, missing credentials.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Upstream XML/JSON did not have the expected shape.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Connection-level failure worth retrying.
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    /// Non-success HTTP response or other request failure.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Fetched record count disagrees with the total reported upstream.
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// A run finished without a single record.
    #[error("Empty result: collection {collection_id} harvested zero records")]
    EmptyResult { collection_id: u64 },

    /// The source reported nothing to harvest at construction time.
    #[error("No results: {0}")]
    NoResults(String),

    /// Object store or scratch buffer write/read failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// Queue backend never became reachable.
    #[error("Queue unavailable: {0}")]
    QueueUnavailable(String),

    /// Caller broke an API contract (bad argument shape, reuse of a
    /// finished adapter).
    #[error("Contract violation: {0}")]
    ContractViolation(String),

    /// Operator notification could not be delivered.
    #[error("Notification error: {0}")]
    Notification(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl HarvestError {
    /// Returns true if this error is transient and the whole job is worth
    /// retrying later.
    pub fn is_retryable(&self) -> bool {
        match self {
            HarvestError::TransientNetwork(_)
            | HarvestError::Timeout(_)
            | HarvestError::QueueUnavailable(_) => true,
            HarvestError::Http(msg) => {
                msg.contains("timeout") || msg.contains("connect") || msg.contains("reset")
            }
            _ => false,
        }
    }

    /// Failures the grouped-paging adapter may retry in-process: a page that
    /// did not decode, or a request that never completed.
    pub fn is_transient_decode(&self) -> bool {
        matches!(
            self,
            HarvestError::Protocol(_) | HarvestError::TransientNetwork(_) | HarvestError::Timeout(_)
        )
    }
}
