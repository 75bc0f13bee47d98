use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// One raw harvested metadata mapping. Field names are source-shaped.
pub type Record = Map<String, Value>;

/// Records emitted together by one adapter fetch. Never empty.
pub type Batch = Vec<Record>;

/// Selects the source adapter variant for a collection.
///
/// Registry codes outside the known set deserialize into `Unsupported`
/// so the controller can reject them as a configuration error instead of
/// failing registry resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum HarvestType {
    Oai,
    Oac,
    Solr,
    Nuxeo,
    Flickr,
    Youtube,
    Marc,
    Unsupported(String),
}

impl HarvestType {
    pub fn as_str(&self) -> &str {
        match self {
            HarvestType::Oai => "OAI",
            HarvestType::Oac => "OAC",
            HarvestType::Solr => "SLR",
            HarvestType::Nuxeo => "NUX",
            HarvestType::Flickr => "FLK",
            HarvestType::Youtube => "YTB",
            HarvestType::Marc => "MRC",
            HarvestType::Unsupported(code) => code,
        }
    }
}

impl From<String> for HarvestType {
    fn from(code: String) -> Self {
        match code.trim().to_uppercase().as_str() {
            "OAI" => HarvestType::Oai,
            "OAC" => HarvestType::Oac,
            "SLR" => HarvestType::Solr,
            "NUX" => HarvestType::Nuxeo,
            "FLK" => HarvestType::Flickr,
            "YTB" => HarvestType::Youtube,
            "MRC" => HarvestType::Marc,
            _ => HarvestType::Unsupported(code),
        }
    }
}

impl From<HarvestType> for String {
    fn from(harvest_type: HarvestType) -> Self {
        harvest_type.as_str().to_string()
    }
}

impl fmt::Display for HarvestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A campus or repository reference as served by the registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryUnit {
    /// Registry-relative URI, e.g. `/api/v1/campus/1/`.
    #[serde(default)]
    pub resource_uri: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub name: String,
}

/// Immutable per-run snapshot of a collection's registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    pub slug: String,
    pub harvest_type: HarvestType,
    #[serde(default)]
    pub url_harvest: String,
    /// Opaque, adapter-specific configuration string.
    #[serde(default, deserialize_with = "null_as_default")]
    pub harvest_extra_data: String,
    #[serde(default)]
    pub campus: Vec<RegistryUnit>,
    #[serde(default)]
    pub repository: Vec<RegistryUnit>,
    #[serde(default, deserialize_with = "enrichment_list")]
    pub enrichments_item: Vec<String>,
    #[serde(default)]
    pub thresholds: Value,
    #[serde(default)]
    pub ready_for_publication: bool,
    #[serde(default)]
    pub resource_uri: String,
    /// Registry fields without a dedicated member yet.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn null_as_default<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// The registry serves enrichment chains either as a list or as a single
/// comma/newline separated string.
fn enrichment_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<String>),
        Joined(String),
        Missing,
    }

    let items = match Raw::deserialize(deserializer)? {
        Raw::List(items) => items,
        Raw::Joined(joined) => joined
            .split([',', '\n'])
            .map(str::to_string)
            .collect(),
        Raw::Missing => Vec::new(),
    };

    Ok(items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect())
}

/// Lifecycle of one harvest run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Complete,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Complete => "complete",
            RunStatus::Error => "error",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "running" => Ok(RunStatus::Running),
            "complete" => Ok(RunStatus::Complete),
            "error" => Ok(RunStatus::Error),
            _ => Err(format!("Unknown run status: {}", s)),
        }
    }
}

/// Externally stored record of one harvest run, keyed by run id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionStatus {
    pub id: Uuid,
    pub collection_id: u64,
    pub operator: String,
    pub status: RunStatus,
    pub data_dir: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub total_items: Option<u64>,
    pub total_collections: u32,
}

impl IngestionStatus {
    pub fn running(
        id: Uuid,
        collection_id: u64,
        operator: impl Into<String>,
        data_dir: impl Into<String>,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            collection_id,
            operator: operator.into(),
            status: RunStatus::Running,
            data_dir: data_dir.into(),
            start_time,
            end_time: None,
            error: None,
            total_items: None,
            total_collections: 1,
        }
    }

    pub fn complete(&mut self, total_items: u64) {
        self.status = RunStatus::Complete;
        self.total_items = Some(total_items);
        self.end_time = Some(Utc::now());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = RunStatus::Error;
        self.error = Some(error.into());
        self.end_time = Some(Utc::now());
    }

    /// Document form consumed by status dashboards.
    pub fn to_document(&self) -> Value {
        serde_json::json!({
            "_id": self.id.to_string(),
            "collection_id": self.collection_id,
            "operator": self.operator,
            "fetch_process": {
                "status": self.status.as_str(),
                "data_dir": self.data_dir,
                "start_time": self.start_time.to_rfc3339(),
                "end_time": self.end_time.map(|t| t.to_rfc3339()),
                "error": self.error,
                "total_items": self.total_items,
                "total_collections": self.total_collections,
            }
        })
    }
}
