//! End-to-end tests against the real Graph API
//!
//! These tests use a bearer token from .env. All tests are marked #[ignore]
//! to prevent running in normal CI.
//!
//! # Running the tests
//!
//! ```bash
//! cargo test --test e2e_live -- --ignored --nocapture
//! ```
//!
//! # Required environment variables (.env file)
//!
//! - `GRAPH_ACCESS_TOKEN` - token with `Chat.Read` and `Files.Read.All`
//! - `GRAPH_ENDPOINT` - API base URL (optional)

mod common;

use common::{create_live_exporter, has_live_credentials};

#[tokio::test]
#[ignore]
async fn test_live_connection() {
    if !has_live_credentials() {
        eprintln!("Skipping: GRAPH_ACCESS_TOKEN not found in .env");
        return;
    }

    let (exporter, _temp_dir) = create_live_exporter().unwrap();
    let me = exporter.test_connection().await.unwrap();
    assert!(!me.id.is_empty());
    println!("Connected as {} <{}>", me.display_name, me.user_principal_name);
}

#[tokio::test]
#[ignore]
async fn test_live_export_of_first_chat() {
    if !has_live_credentials() {
        eprintln!("Skipping: GRAPH_ACCESS_TOKEN not found in .env");
        return;
    }

    let (exporter, _temp_dir) = create_live_exporter().unwrap();
    let summary = exporter.export_all().await.unwrap();

    assert!(summary.chats_exported + summary.chats_failed <= 1);
    if summary.messages > 0 {
        assert!(summary.export_file.as_ref().is_some_and(|p| p.exists()));
    }
    println!(
        "Exported {} messages, {} attachments saved, {} failed",
        summary.messages, summary.attachments.saved, summary.attachments.failed
    );
}
