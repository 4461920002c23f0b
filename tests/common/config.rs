//! Test configuration helpers for mock servers and live credentials

use graph_chat_export::auth::{CachedTokenProvider, StaticTokenSource, TokenProvider};
use graph_chat_export::{ChatExporter, Config};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Config pointed at `endpoint` with all pacing delays disabled
pub fn mock_config(endpoint: &str, temp_dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.graph.endpoint = endpoint.to_string();
    config.graph.request_timeout = Duration::from_secs(5);
    config.export.output_dir = temp_dir.path().join("exports");
    config.export.page_delay = Duration::ZERO;
    config.export.chat_delay = Duration::ZERO;
    config.retry.jitter = false;
    config.retry.default_retry_after = Duration::from_millis(10);
    config
}

/// Token provider returning a fixed token
pub fn static_tokens(token: &str) -> Arc<dyn TokenProvider> {
    Arc::new(CachedTokenProvider::new(StaticTokenSource::new(token)))
}

/// Exporter against `endpoint` using a static test token
pub fn create_mock_exporter(endpoint: &str) -> (ChatExporter, TempDir) {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = mock_config(endpoint, &temp_dir);
    let exporter =
        ChatExporter::new(config, static_tokens("test-token")).expect("Failed to create exporter");
    (exporter, temp_dir)
}

/// Whether live Graph credentials are available (`.env` or environment)
///
/// - `GRAPH_ACCESS_TOKEN` - bearer token for the signed-in user
/// - `GRAPH_ENDPOINT` - API base URL (optional)
pub fn has_live_credentials() -> bool {
    dotenvy::dotenv().ok();
    std::env::var("GRAPH_ACCESS_TOKEN").is_ok_and(|t| !t.trim().is_empty())
}

/// Exporter against the live Graph API, limited to the first chat
pub fn create_live_exporter() -> Result<(ChatExporter, TempDir), String> {
    dotenvy::dotenv().ok();
    let token = std::env::var("GRAPH_ACCESS_TOKEN")
        .map_err(|_| "GRAPH_ACCESS_TOKEN not set in environment".to_string())?;

    let temp_dir = tempfile::tempdir().map_err(|e| format!("Failed to create temp dir: {}", e))?;
    let mut config = Config::default();
    if let Ok(endpoint) = std::env::var("GRAPH_ENDPOINT") {
        config.graph.endpoint = endpoint;
    }
    config.export.output_dir = temp_dir.path().join("exports");
    config.export.mode = graph_chat_export::ExportMode::Test;

    let exporter = ChatExporter::new(config, static_tokens(token.trim()))
        .map_err(|e| format!("Failed to create exporter: {}", e))?;
    Ok((exporter, temp_dir))
}
