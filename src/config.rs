//! Configuration types for graph-chat-export

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Page size requested for chat and message listings (the API maximum for both)
pub const PAGE_SIZE: u32 = 50;

/// Graph API endpoint settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Base URL including the API version (default: "https://graph.microsoft.com/v1.0")
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Per-request timeout (default: 120 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl GraphConfig {
    /// Join a resource path onto the endpoint
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.endpoint.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// Export run mode
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportMode {
    /// Only the first chat is exported
    Test,
    /// Every chat is exported (default)
    #[default]
    Prod,
}

impl ExportMode {
    /// Suffix used in export file names
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportMode::Test => "test",
            ExportMode::Prod => "prod",
        }
    }
}

impl std::str::FromStr for ExportMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "test" => Ok(ExportMode::Test),
            "prod" | "production" => Ok(ExportMode::Prod),
            other => Err(Error::config(
                "export.mode",
                format!("unknown mode '{other}' (expected 'test' or 'prod')"),
            )),
        }
    }
}

/// Export behavior (output location, scope, pacing, concurrency)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Output directory (default: "./exports")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Run mode; `test` limits the run to the first chat
    #[serde(default)]
    pub mode: ExportMode,

    /// Explicit cap on the number of chats traversed (overrides the mode limit)
    #[serde(default)]
    pub max_chats: Option<usize>,

    /// Download attachments while exporting (default: true)
    #[serde(default = "default_true")]
    pub download_attachments: bool,

    /// Maximum concurrent attachment downloads per chat (default: 4)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_downloads: usize,

    /// Pause between message pages of one chat (default: 100 ms)
    #[serde(default = "default_page_delay", with = "duration_millis_serde")]
    pub page_delay: Duration,

    /// Pause between chats (default: 200 ms)
    #[serde(default = "default_chat_delay", with = "duration_millis_serde")]
    pub chat_delay: Duration,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            mode: ExportMode::default(),
            max_chats: None,
            download_attachments: true,
            max_concurrent_downloads: default_max_concurrent(),
            page_delay: default_page_delay(),
            chat_delay: default_chat_delay(),
        }
    }
}

impl ExportConfig {
    /// Number of chats to traverse, if limited
    pub fn chat_limit(&self) -> Option<usize> {
        match (self.max_chats, self.mode) {
            (Some(limit), _) => Some(limit),
            (None, ExportMode::Test) => Some(1),
            (None, ExportMode::Prod) => None,
        }
    }

    /// Root directory for downloaded attachments
    pub fn attachments_dir(&self) -> PathBuf {
        self.output_dir.join("attachments")
    }
}

/// Recovery budget for rate limiting (429) and token expiry (401)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum consecutive 429 retries for one request (default: 10)
    #[serde(default = "default_max_rate_limit_retries")]
    pub max_rate_limit_retries: u32,

    /// Maximum token refreshes for one request (default: 2)
    #[serde(default = "default_max_auth_refreshes")]
    pub max_auth_refreshes: u32,

    /// Ceiling on total Retry-After sleeping for one request (default: 15 minutes)
    #[serde(default = "default_max_total_wait", with = "duration_serde")]
    pub max_total_wait: Duration,

    /// Wait used when a 429 carries no usable Retry-After (default: 60 seconds)
    #[serde(default = "default_retry_after", with = "duration_serde")]
    pub default_retry_after: Duration,

    /// Add up to 10% random extra wait on top of Retry-After (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_rate_limit_retries: default_max_rate_limit_retries(),
            max_auth_refreshes: default_max_auth_refreshes(),
            max_total_wait: default_max_total_wait(),
            default_retry_after: default_retry_after(),
            jitter: true,
        }
    }
}

/// Attachment resolution settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Hosts treated as the document library (exact host or domain suffix)
    #[serde(default = "default_document_library_hosts")]
    pub document_library_hosts: Vec<String>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            document_library_hosts: default_document_library_hosts(),
        }
    }
}

impl ResolverConfig {
    /// Whether `host` belongs to the document library vendor
    pub fn is_document_library_host(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.document_library_hosts.iter().any(|candidate| {
            let candidate = candidate.trim_start_matches('.').to_ascii_lowercase();
            host == candidate || host.ends_with(&format!(".{candidate}"))
        })
    }
}

/// Main configuration
///
/// Fields are organized into sub-configs:
/// - [`graph`](GraphConfig) - API endpoint and timeouts
/// - [`export`](ExportConfig) - output directory, scope, pacing, concurrency
/// - [`retry`](RetryConfig) - 429/401 recovery budget
/// - [`resolver`](ResolverConfig) - attachment host classification
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Graph API endpoint settings
    #[serde(default)]
    pub graph: GraphConfig,

    /// Export behavior
    #[serde(default)]
    pub export: ExportConfig,

    /// Recovery budget
    #[serde(default)]
    pub retry: RetryConfig,

    /// Attachment resolution settings
    #[serde(default)]
    pub resolver: ResolverConfig,
}

impl Config {
    /// Reject values the exporter cannot work with
    pub fn validate(&self) -> Result<()> {
        let endpoint = url::Url::parse(&self.graph.endpoint)
            .map_err(|e| Error::config("graph.endpoint", format!("invalid URL: {e}")))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(Error::config(
                "graph.endpoint",
                format!("unsupported scheme '{}'", endpoint.scheme()),
            ));
        }
        if self.export.max_concurrent_downloads == 0 {
            return Err(Error::config(
                "export.max_concurrent_downloads",
                "must be at least 1",
            ));
        }
        if self.export.max_chats == Some(0) {
            return Err(Error::config("export.max_chats", "must be at least 1"));
        }
        if self.export.output_dir.as_os_str().is_empty() {
            return Err(Error::config("export.output_dir", "must not be empty"));
        }
        Ok(())
    }
}

fn default_endpoint() -> String {
    "https://graph.microsoft.com/v1.0".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("exports")
}

fn default_max_concurrent() -> usize {
    4
}

fn default_page_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_chat_delay() -> Duration {
    Duration::from_millis(200)
}

fn default_true() -> bool {
    true
}

fn default_max_rate_limit_retries() -> u32 {
    10
}

fn default_max_auth_refreshes() -> u32 {
    2
}

fn default_max_total_wait() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_retry_after() -> Duration {
    Duration::from_secs(60)
}

fn default_document_library_hosts() -> Vec<String> {
    vec!["sharepoint.com".into()]
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Millisecond Duration serialization helper
mod duration_millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
